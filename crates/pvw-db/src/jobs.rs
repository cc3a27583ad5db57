//! Processing job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use pvw_core::{
    defaults, new_v7, Error, FailOutcome, JobListFilter, JobRepository, JobStatus, OperationType,
    ProcessingJob, QueueName, QueueStats, Result,
};

const JOB_COLUMNS: &str = "id, file_id, operation_type, queue, status, progress, progress_message, \
                           options, result, error, attempts, max_retries, retry_at, created_at, \
                           started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes in-process workers when a job is queued.
    notify: Arc<Notify>,
    /// Base retry countdown; attempt N waits N times this.
    retry_countdown: Duration,
    /// How long a claim holds a job before another worker may take it.
    lease: Duration,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
            retry_countdown: Duration::seconds(defaults::JOB_RETRY_COUNTDOWN_SECS),
            lease: Duration::seconds(
                (defaults::JOB_TIMEOUT_SECS + defaults::JOB_LEASE_GRACE_SECS) as i64,
            ),
        }
    }

    /// Override the claim lease. Should exceed the worker's job timeout.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Override the base retry countdown.
    pub fn with_retry_countdown(mut self, countdown: Duration) -> Self {
        self.retry_countdown = countdown;
        self
    }

    /// Notification handle signalled on every queued job.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// When the retry following `attempt` becomes runnable.
    pub fn retry_time(&self, attempt: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.retry_countdown * attempt.max(1)
    }

    fn parse_job_row(row: PgRow) -> Result<ProcessingJob> {
        Ok(ProcessingJob {
            id: row.try_get("id")?,
            file_id: row.try_get("file_id")?,
            operation_type: row.try_get::<String, _>("operation_type")?.parse()?,
            queue: row.try_get::<String, _>("queue")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            progress: row.try_get("progress")?,
            progress_message: row.try_get("progress_message")?,
            options: row.try_get("options")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
            max_retries: row.try_get("max_retries")?,
            retry_at: row.try_get("retry_at")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl Clone for PgJobRepository {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            notify: self.notify.clone(),
            retry_countdown: self.retry_countdown,
            lease: self.lease,
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(
        &self,
        file_id: Uuid,
        operation_type: OperationType,
        options: Option<JsonValue>,
    ) -> Result<ProcessingJob> {
        let file_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM uploaded_file WHERE id = $1")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        match file_status.as_deref() {
            None | Some("deleted") => return Err(Error::FileNotFound(file_id)),
            _ => {}
        }

        let row = sqlx::query(&format!(
            "INSERT INTO processing_job (id, file_id, operation_type, queue, status, options, max_retries, created_at)
             VALUES ($1, $2, $3, $4, 'queued', $5, $6, $7)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(file_id)
        .bind(operation_type.as_str())
        .bind(operation_type.queue().as_str())
        .bind(&options)
        .bind(operation_type.max_retries())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let job = Self::parse_job_row(row)?;
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn claim_next_for_queues(&self, queues: &[QueueName]) -> Result<Option<ProcessingJob>> {
        let now = Utc::now();
        let lease_cutoff = now - self.lease;
        let queue_names: Vec<String> = queues.iter().map(|q| q.as_str().to_string()).collect();

        // An expired lease on the last allowed attempt is final.
        let abandoned: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE processing_job
             SET status = 'failed', error = 'Worker lease expired on the final attempt',
                 completed_at = $1
             WHERE (cardinality($2::text[]) = 0 OR queue = ANY($2))
               AND status = 'processing' AND retry_at IS NULL
               AND started_at <= $3 AND attempts > max_retries
             RETURNING id",
        )
        .bind(now)
        .bind(&queue_names)
        .bind(lease_cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        for job_id in &abandoned {
            warn!(
                subsystem = "database",
                component = "jobs",
                %job_id,
                "Failed job whose worker lease expired"
            );
        }

        // Runnable = never started, waiting on a retry whose countdown has
        // elapsed, or abandoned by a worker whose lease ran out. Empty
        // array = any queue.
        let row = sqlx::query(&format!(
            "UPDATE processing_job
             SET status = 'processing', started_at = $1, attempts = attempts + 1,
                 retry_at = NULL, progress = 0, progress_message = NULL
             WHERE id = (
                 SELECT id FROM processing_job
                 WHERE (cardinality($2::text[]) = 0 OR queue = ANY($2))
                   AND (status = 'queued'
                        OR (status = 'processing' AND retry_at IS NOT NULL AND retry_at <= $1)
                        OR (status = 'processing' AND retry_at IS NULL
                            AND started_at <= $3 AND attempts <= max_retries))
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .bind(&queue_names)
        .bind(lease_cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processing_job SET progress = $1, progress_message = $2
             WHERE id = $3 AND status = 'processing'",
        )
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE processing_job
             SET status = 'completed', progress = 100, result = $1, error = NULL,
                 retry_at = NULL, completed_at = $2
             WHERE id = $3 AND status = 'processing'",
        )
        .bind(&result)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let current: Option<(String, i32, i32)> = sqlx::query_as(
            "SELECT status, attempts, max_retries FROM processing_job WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some((status, attempts, max_retries)) = current else {
            return Err(Error::JobNotFound(job_id));
        };

        if status.parse::<JobStatus>()? != JobStatus::Processing {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(FailOutcome::Discarded);
        }

        // attempts counts executions; retries used so far = attempts - 1
        let outcome = if attempts <= max_retries {
            let retry_at = self.retry_time(attempts, now);
            sqlx::query(
                "UPDATE processing_job SET error = $1, retry_at = $2, progress_message = $3
                 WHERE id = $4",
            )
            .bind(error)
            .bind(retry_at)
            .bind(format!("Retry {} of {} scheduled", attempts, max_retries))
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            FailOutcome::RetryScheduled {
                attempt: attempts,
                retry_at,
            }
        } else {
            sqlx::query(
                "UPDATE processing_job
                 SET status = 'failed', error = $1, retry_at = NULL, completed_at = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            FailOutcome::Failed
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<ProcessingJob> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM processing_job WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let status: JobStatus = status.ok_or(Error::JobNotFound(job_id))?.parse()?;
        if !status.can_transition_to(JobStatus::Cancelled) {
            return Err(Error::Conflict(format!(
                "Job {} is already {}",
                job_id, status
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE processing_job
             SET status = 'cancelled', retry_at = NULL, completed_at = $1
             WHERE id = $2
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Self::parse_job_row(row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list(&self, filter: &JobListFilter) -> Result<Vec<ProcessingJob>> {
        let limit = if filter.limit > 0 {
            filter.limit.min(defaults::PAGE_LIMIT_MAX)
        } else {
            defaults::PAGE_LIMIT
        };

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR operation_type = $2)
               AND ($3::uuid IS NULL OR file_id = $3)
             ORDER BY created_at DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.operation_type.map(|o| o.as_str()))
        .bind(filter.file_id)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<ProcessingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job WHERE file_id = $1 ORDER BY created_at ASC"
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                COUNT(*) AS total
             FROM processing_job",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.try_get("queued")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            cancelled: row.try_get("cancelled")?,
            total: row.try_get("total")?,
        })
    }

    async fn cleanup_finished(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM processing_job
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
