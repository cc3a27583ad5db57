//! Job handlers for each operation type.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use pvw_core::{OperationType, ProcessingJob, UploadedFile};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: ProcessingJob,
    /// The file the job operates on.
    pub file: UploadedFile,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: ProcessingJob, file: UploadedFile) -> Self {
        Self {
            job,
            file,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress (clamped to 0-100) to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent.clamp(0, 100), message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn file_path(&self) -> &Path {
        Path::new(&self.file.stored_path)
    }

    /// Job options, if any were given at queue time.
    pub fn options(&self) -> Option<&JsonValue> {
        self.job.options.as_ref()
    }

    /// A string option by key.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options()?.get(key)?.as_str()
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
    /// Job hit a transient problem and may be retried.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The operation this handler performs.
    fn operation_type(&self) -> OperationType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given operation.
    fn can_handle(&self, operation_type: OperationType) -> bool {
        self.operation_type() == operation_type
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use uuid::Uuid;

    use pvw_core::*;

    /// A file record pointing at `path`.
    pub fn file_at(path: &std::path::Path, kind: FileKind) -> UploadedFile {
        let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
        UploadedFile {
            id: Uuid::new_v4(),
            filename: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("data")
                .to_string(),
            stored_path: path.display().to_string(),
            size_bytes: size,
            mime_type: kind.default_mime_type().to_string(),
            kind,
            uploader: None,
            status: FileStatus::Processing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// A freshly claimed job for `file`.
    pub fn job_for(
        file: &UploadedFile,
        operation_type: OperationType,
        options: Option<JsonValue>,
    ) -> ProcessingJob {
        ProcessingJob {
            id: Uuid::new_v4(),
            file_id: file.id,
            operation_type,
            queue: operation_type.queue(),
            status: JobStatus::Processing,
            progress: 0,
            progress_message: None,
            options,
            result: None,
            error: None,
            attempts: 1,
            max_retries: operation_type.max_retries(),
            retry_at: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }
}
