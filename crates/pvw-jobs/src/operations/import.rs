//! `import_entities`: map rows through an [`EntityTemplate`] and create the
//! entities in the catalog through the batch processor.
//!
//! Options:
//! - `template`: built-in name or inline template object (default `table`)
//! - `batch_size`: entities per bulk request

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use pvw_client::{CatalogApi, CsvBatchProcessor, EntityTemplate};
use pvw_core::{defaults, OperationType, Result};

use super::load_table;
use crate::handler::{JobContext, JobHandler, JobResult};

pub(crate) const CATALOG_NOT_CONFIGURED: &str =
    "Purview client is not configured (set PURVIEW_ACCOUNT_NAME and Azure credentials)";

/// Resolve the `template` option.
pub fn template_option(options: Option<&JsonValue>) -> Result<EntityTemplate> {
    match options.and_then(|o| o.get("template")) {
        Some(value) => EntityTemplate::from_value(value),
        None => EntityTemplate::from_value(&JsonValue::String("table".to_string())),
    }
}

/// The `batch_size` option, if a positive integer.
pub(crate) fn batch_size_option(options: Option<&JsonValue>) -> Option<usize> {
    options?
        .get("batch_size")?
        .as_u64()
        .filter(|n| *n > 0)
        .map(|n| n as usize)
}

/// Map a finished batch into the 20-95% progress band.
pub(crate) fn batch_percent(done: usize, total: usize) -> i32 {
    if total == 0 {
        return 95;
    }
    20 + (75 * done / total) as i32
}

/// Handler for `import_entities`.
pub struct ImportEntitiesHandler {
    catalog: Option<Arc<dyn CatalogApi>>,
    batch_size: usize,
}

impl ImportEntitiesHandler {
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
impl JobHandler for ImportEntitiesHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::ImportEntities
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(catalog) = self.catalog.clone() else {
            return JobResult::Failed(CATALOG_NOT_CONFIGURED.to_string());
        };
        let template = match template_option(ctx.options()) {
            Ok(t) => t,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        ctx.report_progress(5, Some("Reading file"));
        let table = match load_table(ctx.file_path(), ctx.file.kind).await {
            Ok(t) => t,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let missing = template.missing_required_headers(&table.headers);
        if !missing.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "import",
                job_id = %ctx.job_id(),
                missing = ?missing,
                "File lacks required template columns; affected rows will be rejected"
            );
        }

        ctx.report_progress(20, Some("Importing entities"));
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
            .import(&template, &records, Some(&progress))
            .await;

        info!(
            subsystem = "jobs",
            component = "import",
            op = "import_entities",
            job_id = %ctx.job_id(),
            template = %template.name,
            total_rows = report.total_rows,
            created = report.entities_created,
            failed = report.entities_failed,
            "Import finished"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
