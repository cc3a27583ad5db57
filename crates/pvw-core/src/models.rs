//! Domain models for uploaded files, processing jobs, and scans.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{defaults, Error};

/// Implements `as_str`, `Display` and `FromStr` for a unit-variant enum
/// stored as TEXT in the database.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Database/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }

            /// All variants in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

// =============================================================================
// UPLOADED FILES
// =============================================================================

/// Lifecycle status of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
    Deleted,
}

text_enum!(FileStatus {
    Uploaded => "uploaded",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
    Deleted => "deleted",
});

/// Accepted upload formats (the extension allow-list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Xls,
    Json,
    Txt,
}

text_enum!(FileKind {
    Csv => "csv",
    Xlsx => "xlsx",
    Xls => "xls",
    Json => "json",
    Txt => "txt",
});

impl FileKind {
    /// Resolve an allowed kind from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        ext.to_ascii_lowercase().parse().ok()
    }

    /// Default maximum upload size for this kind.
    pub fn default_max_bytes(&self) -> u64 {
        match self {
            FileKind::Csv => defaults::MAX_CSV_BYTES,
            FileKind::Xlsx | FileKind::Xls => defaults::MAX_EXCEL_BYTES,
            FileKind::Json => defaults::MAX_JSON_BYTES,
            FileKind::Txt => defaults::MAX_TXT_BYTES,
        }
    }

    /// Plain-text kinds, which carry no magic-byte signature.
    pub fn is_text(&self) -> bool {
        matches!(self, FileKind::Csv | FileKind::Json | FileKind::Txt)
    }

    /// MIME type used when magic-byte detection is inconclusive.
    pub fn default_mime_type(&self) -> &'static str {
        match self {
            FileKind::Csv => "text/csv",
            FileKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileKind::Xls => "application/vnd.ms-excel",
            FileKind::Json => "application/json",
            FileKind::Txt => "text/plain",
        }
    }
}

/// A file accepted by the upload handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    /// Sanitized original filename.
    pub filename: String,
    /// Location on disk (`<upload_dir>/<id>.<ext>`).
    pub stored_path: String,
    /// Number of bytes written to disk.
    pub size_bytes: i64,
    pub mime_type: String,
    pub kind: FileKind,
    pub uploader: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new file record.
#[derive(Debug, Clone)]
pub struct NewUploadedFile {
    pub id: Uuid,
    pub filename: String,
    pub stored_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub kind: FileKind,
    pub uploader: Option<String>,
}

// =============================================================================
// PROCESSING JOBS
// =============================================================================

/// Status of a processing job.
///
/// Transitions are monotonic: `queued -> processing -> {completed, failed,
/// cancelled}` and `queued -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }
}

/// Named queues jobs are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    FileProcessing,
    DataOperations,
    Maintenance,
}

text_enum!(QueueName {
    FileProcessing => "file_processing",
    DataOperations => "data_operations",
    Maintenance => "maintenance",
});

/// Operation a job performs on its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Row/column counts, inferred column types, samples
    MetadataExtraction,
    /// Map rows to catalog entities and create them remotely
    ImportEntities,
    /// Completeness, validity and uniqueness scoring
    DataQualityCheck,
    /// Per-column statistics and value distributions
    DataProfiling,
    /// PII detection and regulation flags
    ComplianceScan,
    /// Apply classifications to existing catalog entities
    BulkClassification,
}

text_enum!(OperationType {
    MetadataExtraction => "metadata_extraction",
    ImportEntities => "import_entities",
    DataQualityCheck => "data_quality_check",
    DataProfiling => "data_profiling",
    ComplianceScan => "compliance_scan",
    BulkClassification => "bulk_classification",
});

impl OperationType {
    /// Queue this operation is routed to.
    pub fn queue(&self) -> QueueName {
        match self {
            OperationType::MetadataExtraction | OperationType::DataProfiling => {
                QueueName::FileProcessing
            }
            OperationType::ImportEntities
            | OperationType::BulkClassification
            | OperationType::DataQualityCheck
            | OperationType::ComplianceScan => QueueName::DataOperations,
        }
    }

    /// Retry budget: only the file_processing operations are retried; the
    /// rest write to the remote catalog or are cheap to resubmit.
    pub fn max_retries(&self) -> i32 {
        match self.queue() {
            QueueName::FileProcessing => defaults::JOB_MAX_RETRIES,
            _ => 0,
        }
    }
}

/// A unit of asynchronous file-processing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub file_id: Uuid,
    pub operation_type: OperationType,
    pub queue: QueueName,
    pub status: JobStatus,
    /// 0-100.
    pub progress: i32,
    pub progress_message: Option<String>,
    pub options: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    /// Executions started so far (including the current one).
    pub attempts: i32,
    pub max_retries: i32,
    /// Set while a failed attempt waits for its retry countdown.
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    /// Milliseconds between start and completion, when both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some((c - s).num_milliseconds()),
            _ => None,
        }
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Retry scheduled; the job stays `processing` until re-claimed.
    RetryScheduled { attempt: i32, retry_at: DateTime<Utc> },
    /// Retries exhausted (or none allowed); job is `failed`.
    Failed,
    /// The job was no longer processing (cancelled meanwhile); nothing written.
    Discarded,
}

/// Filters for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub status: Option<JobStatus>,
    pub operation_type: Option<OperationType>,
    pub file_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

// =============================================================================
// SCANS
// =============================================================================

/// Status of a locally tracked catalog scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Created,
    Running,
    Stopped,
    Completed,
    Failed,
}

text_enum!(ScanStatus {
    Created => "created",
    Running => "running",
    Stopped => "stopped",
    Completed => "completed",
    Failed => "failed",
});

impl ScanStatus {
    /// A scan can be (re)started unless it is already running.
    pub fn can_start(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }

    /// Only a running scan can be stopped.
    pub fn can_stop(&self) -> bool {
        matches!(self, ScanStatus::Running)
    }
}

/// A scan definition mirrored from the catalog's scanning API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub name: String,
    pub data_source: String,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Request body for creating a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanRequest {
    pub name: String,
    pub data_source: String,
}
