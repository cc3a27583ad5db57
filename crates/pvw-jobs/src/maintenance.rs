//! Retention sweep: removes expired uploads from disk and prunes old
//! finished jobs.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pvw_core::{defaults, FileRepository, JobRepository, Result};
use pvw_db::{log_pool_metrics, Database};

/// Retention settings for the sweeper.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Uploaded files older than this are deleted.
    pub file_retention_days: i64,
    /// Completed/failed/cancelled jobs older than this are removed.
    pub job_history_days: i64,
    /// Time between sweeps.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            file_retention_days: defaults::FILE_RETENTION_DAYS,
            job_history_days: defaults::JOB_HISTORY_DAYS,
            interval: Duration::from_secs(defaults::RETENTION_SWEEP_INTERVAL_SECS),
        }
    }
}

impl RetentionConfig {
    /// Read `FILE_RETENTION_DAYS`, `JOB_HISTORY_DAYS` and
    /// `RETENTION_SWEEP_INTERVAL_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let file_retention_days = std::env::var("FILE_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.file_retention_days);
        let job_history_days = std::env::var("JOB_HISTORY_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.job_history_days);
        let interval = std::env::var("RETENTION_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval);

        Self {
            file_retention_days,
            job_history_days,
            interval,
        }
    }
}

/// What a single sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: usize,
    /// Files whose disk copy was already gone.
    pub files_missing: usize,
    pub jobs_removed: i64,
}

/// Periodic retention sweeper.
pub struct RetentionSweeper {
    db: Database,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(db: Database, config: RetentionConfig) -> Self {
        Self { db, config }
    }

    /// Run one sweep.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let file_cutoff = now - chrono::Duration::days(self.config.file_retention_days);
        for file in self.db.files.list_expired(file_cutoff).await? {
            match remove_stored_file(Path::new(&file.stored_path)).await {
                Ok(true) => {}
                Ok(false) => report.files_missing += 1,
                Err(e) => {
                    warn!(
                        error = %e,
                        file_id = %file.id,
                        path = %file.stored_path,
                        "Failed to remove expired upload, will retry next sweep"
                    );
                    continue;
                }
            }
            if self.db.files.mark_deleted(file.id).await? {
                report.files_deleted += 1;
            }
        }

        let job_cutoff = now - chrono::Duration::days(self.config.job_history_days);
        report.jobs_removed = self.db.jobs.cleanup_finished(job_cutoff).await?;

        info!(
            subsystem = "jobs",
            component = "retention",
            files_deleted = report.files_deleted,
            files_missing = report.files_missing,
            jobs_removed = report.jobs_removed,
            "Retention sweep complete"
        );
        Ok(report)
    }

    /// Sweep every `interval` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Retention sweep failed");
                }
                log_pool_metrics(&self.db.pool);
            }
        })
    }
}

/// Delete a stored upload. Returns `false` if it was already gone.
async fn remove_stored_file(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed expired upload");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults() {
        let config = RetentionConfig::default();
        assert_eq!(config.file_retention_days, 7);
        assert_eq!(config.job_history_days, 30);
        assert_eq!(config.interval, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_remove_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(&path, "a\n1\n").unwrap();

        assert!(remove_stored_file(&path).await.unwrap());
        assert!(!path.exists());
        assert!(!remove_stored_file(&path).await.unwrap());
    }
}
