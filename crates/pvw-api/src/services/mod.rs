//! Business logic shared by the HTTP handlers.

pub mod uploads;

pub use uploads::{remove_upload, store_upload, stored_path};
