//! Scan repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use pvw_core::{new_v7, CreateScanRequest, Error, Result, Scan, ScanRepository, ScanStatus};

const SCAN_COLUMNS: &str = "id, name, data_source, status, created_at, started_at, stopped_at";

/// PostgreSQL implementation of ScanRepository.
#[derive(Clone)]
pub struct PgScanRepository {
    pool: Pool<Postgres>,
}

impl PgScanRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_scan_row(row: PgRow) -> Result<Scan> {
        Ok(Scan {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            data_source: row.try_get("data_source")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
        })
    }

    fn not_found(scan_id: Uuid) -> Error {
        Error::NotFound(format!("Scan {} not found", scan_id))
    }

    /// Lock the scan row and return its current status.
    async fn lock_status(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        scan_id: Uuid,
    ) -> Result<ScanStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM scan WHERE id = $1 FOR UPDATE")
                .bind(scan_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(Error::Database)?;

        status.ok_or_else(|| Self::not_found(scan_id))?.parse()
    }
}

#[async_trait]
impl ScanRepository for PgScanRepository {
    async fn create(&self, req: CreateScanRequest) -> Result<Scan> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("Scan name must not be empty".to_string()));
        }
        if req.data_source.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Scan data_source must not be empty".to_string(),
            ));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO scan (id, name, data_source, status, created_at)
             VALUES ($1, $2, $3, 'created', $4)
             RETURNING {SCAN_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(req.name.trim())
        .bind(req.data_source.trim())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_scan_row(row)
    }

    async fn get(&self, scan_id: Uuid) -> Result<Option<Scan>> {
        let row = sqlx::query(&format!("SELECT {SCAN_COLUMNS} FROM scan WHERE id = $1"))
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_scan_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Scan>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCAN_COLUMNS} FROM scan ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_scan_row).collect()
    }

    async fn start(&self, scan_id: Uuid) -> Result<Scan> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let status = Self::lock_status(&mut tx, scan_id).await?;
        if !status.can_start() {
            return Err(Error::Conflict(format!("Scan {} is already running", scan_id)));
        }

        let row = sqlx::query(&format!(
            "UPDATE scan SET status = 'running', started_at = $1, stopped_at = NULL
             WHERE id = $2
             RETURNING {SCAN_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(scan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Self::parse_scan_row(row)
    }

    async fn stop(&self, scan_id: Uuid) -> Result<Scan> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let status = Self::lock_status(&mut tx, scan_id).await?;
        if !status.can_stop() {
            return Err(Error::Conflict(format!(
                "Scan {} is not running (status: {})",
                scan_id, status
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE scan SET status = 'stopped', stopped_at = $1
             WHERE id = $2
             RETURNING {SCAN_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(scan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Self::parse_scan_row(row)
    }
}
