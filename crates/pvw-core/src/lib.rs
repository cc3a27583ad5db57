//! # pvw-core
//!
//! Core types, traits, and abstractions for the pvw file-processing pipeline.
//!
//! This crate provides the foundational data structures (uploaded files,
//! processing jobs, scans), the shared error type, the event bus used for
//! real-time notifications, and the repository traits that the database
//! layer implements.

pub mod defaults;
pub mod error;
pub mod events;
pub mod file_safety;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, ServerEvent};
pub use file_safety::{
    detect_content_type, sanitize_filename, validate_upload, UploadConfig,
};
pub use models::*;
pub use traits::*;

/// Generate a new time-ordered (UUIDv7) identifier.
#[inline]
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
