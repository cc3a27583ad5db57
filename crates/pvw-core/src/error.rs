//! Error types for the pvw pipeline.

use thiserror::Error;

/// Result type alias using the pipeline's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uploaded file not found
    #[error("File not found: {0}")]
    FileNotFound(uuid::Uuid),

    /// Processing job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Invalid state transition (e.g. cancelling a finished job)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// File content could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Remote catalog rejected the call
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Authentication/authorization failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// True for errors a caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::FileNotFound(_)
                | Error::JobNotFound(_)
                | Error::Conflict(_)
                | Error::InvalidInput(_)
                | Error::Parse(_)
        )
    }
}
