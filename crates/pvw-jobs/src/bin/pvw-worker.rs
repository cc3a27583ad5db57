//! pvw-worker: standalone processing worker.
//!
//! Claims jobs from the queues listed in `JOB_QUEUES` and publishes progress
//! on the `pvw_job_events` PostgreSQL channel for the API to relay to
//! WebSocket subscribers. Also runs the retention sweep.

use std::time::Duration;

use tracing::{info, warn};

use pvw_db::Database;
use pvw_jobs::{
    handlers_from_env, init_logging, relay_to_postgres, RetentionConfig, RetentionSweeper,
    WorkerBuilder, WorkerConfig,
};

/// How long in-flight jobs get to finish after ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = init_logging("pvw_jobs=debug,pvw_db=info,pvw_client=info", "pvw-worker.log");

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/pvw".to_string());

    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    db.migrate().await?;
    info!("Database connected");

    let config = WorkerConfig::from_env().with_enabled(true);
    let worker = WorkerBuilder::new(db.clone())
        .with_config(config)
        .with_handlers(handlers_from_env())
        .build()
        .await;

    let handle = worker.start();
    tokio::spawn(relay_to_postgres(handle.events(), db.pool.clone()));

    let sweeper = RetentionSweeper::new(db.clone(), RetentionConfig::from_env()).spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    sweeper.abort();
    if !handle.shutdown_and_wait(SHUTDOWN_GRACE).await? {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight jobs still running at exit; their leases will expire and they will be retried"
        );
    }

    info!("Worker exited");
    Ok(())
}
