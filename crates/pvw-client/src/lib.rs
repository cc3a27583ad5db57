//! # pvw-client
//!
//! Client side of the pvw pipeline:
//! - [`PurviewClient`]: typed calls against the Purview data plane
//! - [`auth`]: Azure AD client-credentials tokens with classified failures
//! - [`EntityTemplate`]: declarative row-to-entity mapping
//! - [`CsvBatchProcessor`]: validated, batched import, classification and export
//! - [`mock::MockCatalog`]: in-memory catalog for tests

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod mock;
pub mod template;
pub mod types;

pub use auth::{AuthError, ClientCredentialsProvider, StaticTokenProvider, TokenProvider};
pub use batch::{
    read_csv_records, validate_records, BatchProgress, ClassificationReport, CsvBatchProcessor,
    ImportReport, ValidationReport,
};
pub use client::{CatalogApi, PurviewClient};
pub use config::PurviewConfig;
pub use template::{ColumnMapping, ColumnType, EntityTemplate, Record};
pub use types::*;
