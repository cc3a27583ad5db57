//! `bulk_classification`: apply classifications to existing catalog
//! entities listed in the file.
//!
//! Rows carry `qualified_name`, `classification` and optionally `type_name`
//! (option `default_type`, default `DataSet`, otherwise).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pvw_client::{CatalogApi, CsvBatchProcessor};
use pvw_core::{defaults, OperationType};

use super::import::{batch_percent, batch_size_option, CATALOG_NOT_CONFIGURED};
use super::load_table;
use crate::handler::{JobContext, JobHandler, JobResult};

const DEFAULT_TYPE: &str = "DataSet";
const REQUIRED_COLUMNS: [&str; 2] = ["qualified_name", "classification"];

/// Handler for `bulk_classification`.
pub struct BulkClassificationHandler {
    catalog: Option<Arc<dyn CatalogApi>>,
    batch_size: usize,
}

impl BulkClassificationHandler {
    pub fn new(catalog: Option<Arc<dyn CatalogApi>>) -> Self {
        Self {
            catalog,
            batch_size: defaults::IMPORT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl JobHandler for BulkClassificationHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::BulkClassification
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(catalog) = self.catalog.clone() else {
            return JobResult::Failed(CATALOG_NOT_CONFIGURED.to_string());
        };

        ctx.report_progress(5, Some("Reading file"));
        let table = match load_table(ctx.file_path(), ctx.file.kind).await {
            Ok(t) => t,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|c| !table.headers.iter().any(|h| h == c))
            .collect();
        if !missing.is_empty() {
            return JobResult::Failed(format!(
                "Missing required columns: {}",
                missing.join(", ")
            ));
        }

        ctx.report_progress(20, Some("Resolving entities"));
        let default_type = ctx.option_str("default_type").unwrap_or(DEFAULT_TYPE);
        let batch_size = batch_size_option(ctx.options()).unwrap_or(self.batch_size);
        let processor = CsvBatchProcessor::new(catalog).with_batch_size(batch_size);
        let progress = |done: usize, total: usize| {
            ctx.report_progress(
                batch_percent(done, total),
                Some(&format!("Batch {} of {}", done, total)),
            );
        };
        let records = table.records();
        let report = processor
            .classify(&records, default_type, Some(&progress))
            .await;

        info!(
            subsystem = "jobs",
            component = "classification",
            op = "bulk_classification",
            job_id = %ctx.job_id(),
            total_rows = report.total_rows,
            classified = report.classified,
            failed = report.failed,
            "Bulk classification finished"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
