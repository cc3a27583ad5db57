//! Repository traits implemented by the database layer.
//!
//! Handlers and services depend on these interfaces rather than on the
//! PostgreSQL implementations directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// FILE REPOSITORY
// =============================================================================

/// Persistence for uploaded file records.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a new file record with status `uploaded`.
    async fn insert(&self, file: NewUploadedFile) -> Result<UploadedFile>;

    /// Get a file by ID (deleted files included).
    async fn get(&self, file_id: Uuid) -> Result<Option<UploadedFile>>;

    /// List files newest first, excluding deleted ones.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<UploadedFile>>;

    /// Set the file's status.
    async fn update_status(&self, file_id: Uuid, status: FileStatus) -> Result<()>;

    /// Files created before `cutoff` that are not yet deleted.
    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadedFile>>;

    /// Mark a file deleted. Returns false if it was already deleted or missing.
    async fn mark_deleted(&self, file_id: Uuid) -> Result<bool>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Persistence and queue semantics for processing jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a job for a file. The queue and retry budget come from the
    /// operation type. Fails with `FileNotFound` for a missing or deleted file.
    async fn queue(
        &self,
        file_id: Uuid,
        operation_type: OperationType,
        options: Option<JsonValue>,
    ) -> Result<ProcessingJob>;

    /// Claim the oldest runnable job on any of `queues`: a `queued` job, or a
    /// `processing` job whose retry countdown has elapsed.
    async fn claim_next_for_queues(&self, queues: &[QueueName]) -> Result<Option<ProcessingJob>>;

    /// Update job progress (ignored unless the job is `processing`).
    async fn update_progress(&self, job_id: Uuid, percent: i32, message: Option<&str>)
        -> Result<()>;

    /// Mark a processing job completed. Returns false when the job was no
    /// longer processing (e.g. cancelled) and the result was discarded.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<bool>;

    /// Record a failed attempt, scheduling a retry when the budget allows.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome>;

    /// Cancel a queued or processing job.
    ///
    /// `JobNotFound` when missing, `Conflict` when already terminal.
    async fn cancel(&self, job_id: Uuid) -> Result<ProcessingJob>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// List jobs newest first with filtering.
    async fn list(&self, filter: &JobListFilter) -> Result<Vec<ProcessingJob>>;

    /// Get all jobs for a file.
    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<ProcessingJob>>;

    /// Get queue statistics.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Delete terminal jobs finished before `cutoff`. Returns rows removed.
    async fn cleanup_finished(&self, cutoff: DateTime<Utc>) -> Result<i64>;
}

// =============================================================================
// SCAN REPOSITORY
// =============================================================================

/// Local scan records backing the scanning routes.
#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn create(&self, req: CreateScanRequest) -> Result<Scan>;

    async fn get(&self, scan_id: Uuid) -> Result<Option<Scan>>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Scan>>;

    /// Move a scan to `running`. `NotFound` when missing, `Conflict` when
    /// already running.
    async fn start(&self, scan_id: Uuid) -> Result<Scan>;

    /// Move a running scan to `stopped`. `NotFound` when missing, `Conflict`
    /// when not running.
    async fn stop(&self, scan_id: Uuid) -> Result<Scan>;
}
