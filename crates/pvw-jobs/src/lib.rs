//! # pvw-jobs
//!
//! Background processing for the pvw pipeline.
//!
//! This crate provides:
//! - The job worker claiming from the named queues
//! - One handler per processing operation (metadata, profiling, quality,
//!   compliance, entity import, bulk classification)
//! - Tabular parsers for CSV, Excel, JSON and text uploads
//! - Event relays to the in-process event bus or PostgreSQL `NOTIFY`
//! - The retention sweeper
//!
//! ## Example
//!
//! ```ignore
//! use pvw_jobs::{default_handlers, WorkerBuilder, WorkerConfig};
//! use pvw_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//!
//! let worker = WorkerBuilder::new(db)
//!     .with_config(WorkerConfig::from_env())
//!     .with_handlers(default_handlers(None, 100))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod logging;
pub mod maintenance;
pub mod operations;
pub mod parsers;
pub mod relay;
pub mod worker;

// Re-export core types
pub use pvw_core::*;

pub use handler::{JobContext, JobHandler, JobResult};
pub use logging::init_logging;
pub use maintenance::{RetentionConfig, RetentionSweeper, SweepReport};
pub use operations::{default_handlers, handlers_from_env};
pub use parsers::{parse_bytes, parse_file, Table};
pub use relay::{bridge_to_bus, listen_for_job_events, relay_to_postgres};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
