//! Batch import/export of catalog entities from tabular records.
//!
//! Rows are mapped through an [`EntityTemplate`] first; rows with problems
//! are reported and never submitted. Valid entities are then sent in
//! fixed-size batches. A failed batch is logged and counted and the loop
//! moves on to the next one. Nothing is rolled back.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pvw_core::{defaults, Error, Result};

use crate::client::CatalogApi;
use crate::template::{EntityTemplate, Record};
use crate::types::{AtlasClassification, AtlasEntity, ClassificationRequest, SearchRequest};

/// Called after each batch with `(batches_done, batches_total)`.
pub type BatchProgress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Outcome of validating records against a template.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub total_rows: usize,
    /// Entities for rows that passed, with their 1-based row number.
    pub entities: Vec<(usize, AtlasEntity)>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn invalid_rows(&self) -> usize {
        self.total_rows - self.entities.len()
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub total_rows: usize,
    pub entities_created: usize,
    pub entities_failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of a bulk classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub total_rows: usize,
    pub classified: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Read CSV text into header-keyed records.
pub fn read_csv_records<R: Read>(reader: R) -> Result<(Vec<String>, Vec<Record>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| Error::Parse(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for (idx, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| Error::Parse(format!("Row {}: {}", idx + 1, e)))?;
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.clone(), v.to_string()))
                .collect(),
        );
    }
    Ok((headers, records))
}

/// Map every record through `template`, collecting per-row errors.
pub fn validate_records(template: &EntityTemplate, records: &[Record]) -> ValidationReport {
    let mut report = ValidationReport {
        total_rows: records.len(),
        ..Default::default()
    };
    for (idx, record) in records.iter().enumerate() {
        let row_number = idx + 1;
        match template.map_record(record, row_number) {
            Ok(entity) => report.entities.push((row_number, entity)),
            Err(errors) => report.errors.extend(errors),
        }
    }
    report
}

/// Maps records through a template and submits them to the catalog.
pub struct CsvBatchProcessor {
    catalog: Arc<dyn CatalogApi>,
    batch_size: usize,
}

impl CsvBatchProcessor {
    pub fn new(catalog: Arc<dyn CatalogApi>) -> Self {
        Self {
            catalog,
            batch_size: defaults::IMPORT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Map every record; no catalog calls are made.
    pub fn validate(&self, template: &EntityTemplate, records: &[Record]) -> ValidationReport {
        validate_records(template, records)
    }

    /// Validate then submit valid entities in batches.
    pub async fn import(
        &self,
        template: &EntityTemplate,
        records: &[Record],
        progress: Option<BatchProgress<'_>>,
    ) -> ImportReport {
        let validation = self.validate(template, records);
        let mut report = ImportReport {
            total_rows: validation.total_rows,
            entities_failed: validation.invalid_rows(),
            errors: validation.errors,
            ..Default::default()
        };

        let entities: Vec<AtlasEntity> = validation.entities.into_iter().map(|(_, e)| e).collect();
        let total_batches = entities.len().div_ceil(self.batch_size);

        for (idx, batch) in entities.chunks(self.batch_size).enumerate() {
            let batch_number = idx + 1;
            match self.catalog.create_entities(batch).await {
                Ok(_) => {
                    report.entities_created += batch.len();
                }
                Err(e) => {
                    warn!(
                        subsystem = "client",
                        component = "batch",
                        batch = batch_number,
                        batch_len = batch.len(),
                        error = %e,
                        "Batch create failed, continuing"
                    );
                    report.entities_failed += batch.len();
                    report
                        .errors
                        .push(format!("Batch {}: {}", batch_number, e));
                }
            }
            if let Some(progress) = progress {
                progress(batch_number, total_batches);
            }
        }

        info!(
            subsystem = "client",
            component = "batch",
            template = %template.name,
            total_rows = report.total_rows,
            created = report.entities_created,
            failed = report.entities_failed,
            "Import finished"
        );
        report
    }

    /// Read CSV then import.
    pub async fn import_csv<R: Read>(
        &self,
        template: &EntityTemplate,
        reader: R,
    ) -> Result<ImportReport> {
        let (_, records) = read_csv_records(reader)?;
        Ok(self.import(template, &records, None).await)
    }

    /// Apply classifications listed in records.
    ///
    /// Each record needs `qualified_name` and `classification`; `type_name`
    /// falls back to `default_type`. Entities are resolved one by one, then
    /// classifications are applied in batches per classification name.
    pub async fn classify(
        &self,
        records: &[Record],
        default_type: &str,
        progress: Option<BatchProgress<'_>>,
    ) -> ClassificationReport {
        let mut report = ClassificationReport {
            total_rows: records.len(),
            ..Default::default()
        };
        let mut by_classification: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (idx, record) in records.iter().enumerate() {
            let row_number = idx + 1;
            let field = |name: &str| {
                record
                    .get(name)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
            };

            let (Some(qualified_name), Some(classification)) =
                (field("qualified_name"), field("classification"))
            else {
                report.failed += 1;
                report.errors.push(format!(
                    "Row {}: qualified_name and classification are required",
                    row_number
                ));
                continue;
            };
            let type_name = field("type_name").unwrap_or(default_type);

            match self
                .catalog
                .get_entity_by_qualified_name(type_name, qualified_name)
                .await
            {
                Ok(Some(AtlasEntity {
                    guid: Some(guid), ..
                })) => by_classification
                    .entry(classification.to_string())
                    .or_default()
                    .push(guid),
                Ok(_) => {
                    report.failed += 1;
                    report.errors.push(format!(
                        "Row {}: entity '{}' of type '{}' not found",
                        row_number, qualified_name, type_name
                    ));
                }
                Err(e) => {
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("Row {}: lookup failed: {}", row_number, e));
                }
            }
        }

        let batches: Vec<(&String, &[String])> = by_classification
            .iter()
            .flat_map(|(name, guids)| guids.chunks(self.batch_size).map(move |c| (name, c)))
            .collect();
        let total_batches = batches.len();

        for (idx, (classification, guids)) in batches.into_iter().enumerate() {
            let request = ClassificationRequest {
                classification: AtlasClassification::new(classification.as_str()),
                entity_guids: guids.to_vec(),
            };
            match self.catalog.add_classification(&request).await {
                Ok(()) => report.classified += guids.len(),
                Err(e) => {
                    warn!(
                        subsystem = "client",
                        component = "batch",
                        classification = %classification,
                        batch_len = guids.len(),
                        error = %e,
                        "Classification batch failed, continuing"
                    );
                    report.failed += guids.len();
                    report
                        .errors
                        .push(format!("Classification '{}': {}", classification, e));
                }
            }
            if let Some(progress) = progress {
                progress(idx + 1, total_batches);
            }
        }

        report
    }

    /// Write entities as CSV using the template's headers.
    pub fn export<W: Write>(
        &self,
        template: &EntityTemplate,
        entities: &[AtlasEntity],
        writer: W,
    ) -> Result<usize> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(template.headers())
            .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;
        for entity in entities {
            wtr.write_record(template.entity_to_record(entity))
                .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;
        }
        wtr.flush()?;
        Ok(entities.len())
    }

    /// Search the catalog for the template's type and export every hit.
    pub async fn export_search<W: Write>(
        &self,
        template: &EntityTemplate,
        keywords: &str,
        limit: u32,
        writer: W,
    ) -> Result<usize> {
        let request = SearchRequest::new(keywords)
            .with_limit(limit)
            .with_entity_type(&template.type_name);
        let hits = self.catalog.search(&request).await?;

        let mut entities = Vec::with_capacity(hits.value.len());
        for hit in &hits.value {
            if let Some(entity) = self.catalog.get_entity(&hit.id).await? {
                entities.push(entity);
            }
        }
        self.export(template, &entities, writer)
    }
}
