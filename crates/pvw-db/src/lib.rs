//! # pvw-db
//!
//! PostgreSQL database layer for the pvw pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for uploaded files, processing jobs, and scans
//! - Schema migrations (`migrations/` at the workspace root)
//!
//! ## Example
//!
//! ```rust,ignore
//! use pvw_db::{Database, JobRepository, OperationType};
//!
//! let db = Database::connect("postgres://localhost/pvw").await?;
//! db.migrate().await?;
//! let job = db.jobs.queue(file_id, OperationType::DataProfiling, None).await?;
//! ```

pub mod files;
pub mod jobs;
pub mod pool;
pub mod scans;
pub mod test_fixtures;

// Re-export core types
pub use pvw_core::*;

pub use files::PgFileRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use scans::PgScanRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Uploaded file records.
    pub files: PgFileRepository,
    /// Processing job queue.
    pub jobs: PgJobRepository,
    /// Locally tracked scans.
    pub scans: PgScanRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            files: PgFileRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            scans: PgScanRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Replace the job repository (e.g. with a shorter retry countdown).
    pub fn with_jobs(mut self, jobs: PgJobRepository) -> Self {
        self.jobs = jobs;
        self
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
