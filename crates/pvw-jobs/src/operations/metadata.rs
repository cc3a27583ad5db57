//! Metadata extraction: row/column counts, inferred column types, null and
//! distinct counts, sample values.
//!
//! Rows are fed through a [`MetadataAccumulator`] so a large CSV can be
//! processed chunk by chunk with the same result shape as a small file.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use pvw_core::{defaults, FileKind, OperationType, Result};

use super::{classify_value, infer_column_type, load_table, ValueKind};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::parsers::{read_csv_chunks, Table};

/// Metadata for one column.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub inferred_type: ValueKind,
    pub null_count: usize,
    pub non_null_count: usize,
    pub distinct_count: usize,
    /// Set when more distinct values existed than were tracked.
    pub distinct_capped: bool,
    pub sample_values: Vec<String>,
}

/// Result of `metadata_extraction`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetadataReport {
    pub format: FileKind,
    pub file_size_bytes: i64,
    pub row_count: usize,
    pub column_count: usize,
    /// Number of row chunks read (1 for files read whole).
    pub chunks: usize,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug)]
struct ColumnAccumulator {
    name: String,
    nulls: usize,
    kinds: BTreeMap<ValueKind, usize>,
    distinct: HashSet<String>,
    distinct_capped: bool,
    samples: Vec<String>,
}

impl ColumnAccumulator {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nulls: 0,
            kinds: BTreeMap::new(),
            distinct: HashSet::new(),
            distinct_capped: false,
            samples: Vec::new(),
        }
    }

    fn add(&mut self, raw: &str) {
        let kind = classify_value(raw);
        if kind == ValueKind::Empty {
            self.nulls += 1;
            return;
        }
        *self.kinds.entry(kind).or_default() += 1;

        let value = raw.trim();
        if !self.distinct.contains(value) {
            if self.distinct.len() < defaults::DISTINCT_TRACKING_CAP {
                self.distinct.insert(value.to_string());
                if self.samples.len() < defaults::SAMPLE_VALUES {
                    self.samples.push(value.to_string());
                }
            } else {
                self.distinct_capped = true;
            }
        }
    }

    fn finish(self) -> ColumnMetadata {
        ColumnMetadata {
            inferred_type: infer_column_type(self.kinds.keys().copied()),
            non_null_count: self.kinds.values().sum(),
            null_count: self.nulls,
            distinct_count: self.distinct.len(),
            distinct_capped: self.distinct_capped,
            sample_values: self.samples,
            name: self.name,
        }
    }
}

/// Incremental metadata over rows sharing one header.
#[derive(Debug)]
pub struct MetadataAccumulator {
    columns: Vec<ColumnAccumulator>,
    rows: usize,
    chunks: usize,
}

impl MetadataAccumulator {
    pub fn new(headers: &[String]) -> Self {
        Self {
            columns: headers.iter().map(|h| ColumnAccumulator::new(h)).collect(),
            rows: 0,
            chunks: 0,
        }
    }

    /// Add a chunk of rows. Missing trailing cells count as nulls.
    pub fn add_chunk(&mut self, rows: &[Vec<String>]) {
        for row in rows {
            for (idx, column) in self.columns.iter_mut().enumerate() {
                column.add(row.get(idx).map(String::as_str).unwrap_or(""));
            }
        }
        self.rows += rows.len();
        self.chunks += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(self, format: FileKind, file_size_bytes: i64) -> MetadataReport {
        MetadataReport {
            format,
            file_size_bytes,
            row_count: self.rows,
            column_count: self.columns.len(),
            chunks: self.chunks.max(1),
            columns: self
                .columns
                .into_iter()
                .map(ColumnAccumulator::finish)
                .collect(),
        }
    }
}

/// Metadata for a table read whole.
pub fn extract_metadata(table: &Table, format: FileKind, file_size_bytes: i64) -> MetadataReport {
    let mut acc = MetadataAccumulator::new(&table.headers);
    acc.add_chunk(&table.rows);
    acc.finish(format, file_size_bytes)
}

/// Handler for `metadata_extraction`.
pub struct MetadataExtractionHandler {
    large_file_threshold: u64,
    chunk_rows: usize,
}

impl MetadataExtractionHandler {
    pub fn new() -> Self {
        Self {
            large_file_threshold: defaults::LARGE_FILE_THRESHOLD_BYTES,
            chunk_rows: defaults::CSV_CHUNK_ROWS,
        }
    }

    /// CSV files larger than `bytes` are read in chunks of `chunk_rows`.
    pub fn with_chunking(mut self, bytes: u64, chunk_rows: usize) -> Self {
        self.large_file_threshold = bytes;
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    async fn extract_chunked(&self, ctx: &JobContext) -> Result<MetadataReport> {
        let path = ctx.file_path().to_path_buf();
        let size = ctx.file.size_bytes;
        let chunk_rows = self.chunk_rows;

        tokio::task::spawn_blocking(move || -> Result<MetadataReport> {
            let mut acc: Option<MetadataAccumulator> = None;
            read_csv_chunks(&path, chunk_rows, |headers, rows| {
                let acc = acc.get_or_insert_with(|| MetadataAccumulator::new(headers));
                acc.add_chunk(rows);
                debug!(
                    subsystem = "jobs",
                    component = "metadata",
                    rows = acc.rows(),
                    "Processed CSV chunk"
                );
            })?;
            match acc {
                Some(acc) => Ok(acc.finish(FileKind::Csv, size)),
                // Header-only file: read it normally to recover the columns.
                None => Ok(extract_metadata(
                    &crate::parsers::parse_file(&path, FileKind::Csv)?,
                    FileKind::Csv,
                    size,
                )),
            }
        })
        .await
        .map_err(|e| pvw_core::Error::Internal(format!("Metadata task failed: {}", e)))?
    }
}

impl Default for MetadataExtractionHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for MetadataExtractionHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::MetadataExtraction
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let kind = ctx.file.kind;
        let chunked =
            kind == FileKind::Csv && ctx.file.size_bytes as u64 > self.large_file_threshold;

        ctx.report_progress(10, Some("Reading file"));
        let report = if chunked {
            self.extract_chunked(&ctx).await
        } else {
            load_table(ctx.file_path(), kind)
                .await
                .map(|table| extract_metadata(&table, kind, ctx.file.size_bytes))
        };

        let report = match report {
            Ok(r) => r,
            Err(e) => return JobResult::Retry(e.to_string()),
        };
        ctx.report_progress(90, Some("Metadata extracted"));

        info!(
            subsystem = "jobs",
            component = "metadata",
            op = "metadata_extraction",
            job_id = %ctx.job_id(),
            rows = report.row_count,
            columns = report.column_count,
            chunks = report.chunks,
            duration_ms = start.elapsed().as_millis() as u64,
            "Metadata extracted"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
