//! Centralized default constants for the pvw pipeline.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// UPLOADS
// =============================================================================

/// Default directory uploaded files are written to.
pub const UPLOAD_DIR: &str = "./uploads";

/// Maximum CSV upload size (100 MiB).
pub const MAX_CSV_BYTES: u64 = 100 * 1024 * 1024;

/// Maximum Excel (xlsx/xls) upload size (50 MiB).
pub const MAX_EXCEL_BYTES: u64 = 50 * 1024 * 1024;

/// Maximum JSON upload size (50 MiB).
pub const MAX_JSON_BYTES: u64 = 50 * 1024 * 1024;

/// Maximum plain-text upload size (10 MiB).
pub const MAX_TXT_BYTES: u64 = 10 * 1024 * 1024;

/// Days an uploaded file is kept before the retention sweep removes it.
pub const FILE_RETENTION_DAYS: i64 = 7;

/// Interval between retention sweeps on the maintenance queue, in seconds.
pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Maximum retries for operations on the file_processing queue.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Base countdown between retries in seconds (attempt N waits N × base).
pub const JOB_RETRY_COUNTDOWN_SECS: i64 = 60;

/// Default job worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default job execution timeout in seconds (30 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 1_800;

/// Added to the job timeout to form the claim lease. A `processing` job whose
/// lease has run out is assumed abandoned and is claimed again.
pub const JOB_LEASE_GRACE_SECS: u64 = 300;

/// Finished jobs older than this many days are removed by the retention sweep.
pub const JOB_HISTORY_DAYS: i64 = 30;

/// CSV files larger than this are read in row chunks.
pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Rows per chunk when reading large CSV files.
pub const CSV_CHUNK_ROWS: usize = 10_000;

/// Maximum distinct values tracked per column while profiling.
pub const DISTINCT_TRACKING_CAP: usize = 10_000;

/// Number of sample values recorded per column.
pub const SAMPLE_VALUES: usize = 5;

/// Number of most frequent values reported per column.
pub const TOP_VALUES: usize = 10;

// =============================================================================
// CATALOG CLIENT
// =============================================================================

/// Default number of entities submitted per bulk request.
pub const IMPORT_BATCH_SIZE: usize = 100;

/// Default Purview request timeout in seconds.
pub const PURVIEW_TIMEOUT_SECS: u64 = 60;

/// Purview data-plane API version for search/classification endpoints.
pub const PURVIEW_API_VERSION: &str = "2023-09-01";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Default rate limit: max requests per period, per client.
pub const RATE_LIMIT_REQUESTS: u32 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Maximum request body size in bytes (covers the largest upload limit).
pub const MAX_BODY_SIZE_BYTES: usize = 110 * 1024 * 1024;

/// Default page size for list endpoints.
pub const PAGE_LIMIT: i64 = 50;

/// Upper bound for caller-supplied page sizes.
pub const PAGE_LIMIT_MAX: i64 = 500;

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Expected client heartbeat interval in seconds.
pub const WS_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Connections silent for this many heartbeat intervals are dropped.
pub const WS_HEARTBEAT_TIMEOUT_FACTOR: u32 = 3;

/// PostgreSQL NOTIFY channel carrying job events between processes.
pub const JOB_EVENTS_CHANNEL: &str = "pvw_job_events";
