//! Processing operations, one [`JobHandler`] per [`OperationType`].
//!
//! The analysis itself lives in plain functions over a parsed [`Table`]
//! so it can be exercised without a database or a worker.
//!
//! [`Table`]: crate::parsers::Table

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use tracing::{info, warn};

use pvw_client::{CatalogApi, PurviewClient, PurviewConfig};
use pvw_core::{defaults, FileKind, Result};

use crate::handler::JobHandler;
use crate::parsers::{parse_file, Table};

pub mod classification;
pub mod compliance;
pub mod import;
pub mod metadata;
pub mod patterns;
pub mod profiling;
pub mod quality;

pub use classification::BulkClassificationHandler;
pub use compliance::ComplianceScanHandler;
pub use import::ImportEntitiesHandler;
pub use metadata::MetadataExtractionHandler;
pub use profiling::DataProfilingHandler;
pub use quality::DataQualityHandler;

/// One handler per operation. The catalog is needed by import and
/// classification; without it those jobs fail with a configuration error.
pub fn default_handlers(
    catalog: Option<Arc<dyn CatalogApi>>,
    batch_size: usize,
) -> Vec<Box<dyn JobHandler>> {
    vec![
        Box::new(MetadataExtractionHandler::new()),
        Box::new(DataProfilingHandler::new()),
        Box::new(DataQualityHandler::new()),
        Box::new(ComplianceScanHandler::new()),
        Box::new(ImportEntitiesHandler::new(catalog.clone()).with_batch_size(batch_size)),
        Box::new(BulkClassificationHandler::new(catalog).with_batch_size(batch_size)),
    ]
}

/// Handlers wired to a catalog client built from `PURVIEW_*`/`AZURE_*`
/// environment variables. A missing or invalid configuration is logged and
/// leaves the catalog operations unconfigured.
pub fn handlers_from_env() -> Vec<Box<dyn JobHandler>> {
    let (catalog, batch_size) = match PurviewConfig::from_env().and_then(|config| {
        let client = PurviewClient::new(&config)?;
        Ok((client, config.batch_size))
    }) {
        Ok((client, batch_size)) => {
            info!("Purview catalog client configured");
            (Some(Arc::new(client) as Arc<dyn CatalogApi>), batch_size)
        }
        Err(e) => {
            warn!(error = %e, "Purview catalog not configured; import and classification jobs will fail");
            (None, defaults::IMPORT_BATCH_SIZE)
        }
    };
    default_handlers(catalog, batch_size)
}

/// Parse a stored file off the async runtime.
pub(crate) async fn load_table(path: &std::path::Path, kind: FileKind) -> Result<Table> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || parse_file(&path, kind))
        .await
        .map_err(|e| pvw_core::Error::Internal(format!("Parser task failed: {}", e)))?
}

/// Shape of a single text cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Empty,
    Integer,
    Float,
    Boolean,
    Date,
    String,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Empty => "empty",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Date => "date",
            ValueKind::String => "string",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

/// Classify one cell.
pub fn classify_value(raw: &str) -> ValueKind {
    let v = raw.trim();
    if v.is_empty() {
        return ValueKind::Empty;
    }
    if v.parse::<i64>().is_ok() {
        return ValueKind::Integer;
    }
    if v.bytes().any(|b| b.is_ascii_digit()) && v.parse::<f64>().is_ok_and(f64::is_finite) {
        return ValueKind::Float;
    }
    if matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no"
    ) {
        return ValueKind::Boolean;
    }
    if is_date(v) {
        return ValueKind::Date;
    }
    ValueKind::String
}

pub(crate) fn is_date(v: &str) -> bool {
    DateTime::parse_from_rfc3339(v).is_ok()
        || NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(v, "%m/%d/%Y").is_ok()
        || NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S").is_ok()
}

/// Column type from the kinds seen among its non-empty values.
///
/// Integers mixed with floats widen to float; any other mix is a string.
pub fn infer_column_type<I>(kinds: I) -> ValueKind
where
    I: IntoIterator<Item = ValueKind>,
{
    let mut inferred = ValueKind::Empty;
    for kind in kinds {
        inferred = match (inferred, kind) {
            (acc, ValueKind::Empty) => acc,
            (ValueKind::Empty, k) => k,
            (a, b) if a == b => a,
            (a, b) if a.is_numeric() && b.is_numeric() => ValueKind::Float,
            _ => return ValueKind::String,
        };
    }
    inferred
}

/// Round to four decimal places for stable JSON output.
pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_value() {
        assert_eq!(classify_value(""), ValueKind::Empty);
        assert_eq!(classify_value("   "), ValueKind::Empty);
        assert_eq!(classify_value("42"), ValueKind::Integer);
        assert_eq!(classify_value("-7"), ValueKind::Integer);
        assert_eq!(classify_value("3.14"), ValueKind::Float);
        assert_eq!(classify_value("1e3"), ValueKind::Float);
        assert_eq!(classify_value("TRUE"), ValueKind::Boolean);
        assert_eq!(classify_value("no"), ValueKind::Boolean);
        assert_eq!(classify_value("2024-02-29"), ValueKind::Date);
        assert_eq!(classify_value("2024-01-01T10:00:00Z"), ValueKind::Date);
        assert_eq!(classify_value("12/31/2023"), ValueKind::Date);
        assert_eq!(classify_value("hello"), ValueKind::String);
    }

    #[test]
    fn test_classify_value_not_a_number() {
        assert_eq!(classify_value("NaN"), ValueKind::String);
        assert_eq!(classify_value("inf"), ValueKind::String);
    }

    #[test]
    fn test_infer_column_type() {
        use ValueKind::*;
        assert_eq!(infer_column_type(Vec::new()), Empty);
        assert_eq!(infer_column_type([Empty, Empty]), Empty);
        assert_eq!(infer_column_type([Integer, Empty, Integer]), Integer);
        assert_eq!(infer_column_type([Integer, Float]), Float);
        assert_eq!(infer_column_type([Date, Date]), Date);
        assert_eq!(infer_column_type([Integer, Boolean]), String);
        assert_eq!(infer_column_type([Date, Integer]), String);
    }

    #[test]
    fn test_default_handlers_cover_every_operation() {
        let handlers = default_handlers(None, 10);
        for op in pvw_core::OperationType::ALL {
            assert!(
                handlers.iter().any(|h| h.can_handle(*op)),
                "no handler for {}",
                op
            );
        }
        assert_eq!(handlers.len(), pvw_core::OperationType::ALL.len());
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
