//! Data profiling: numeric and string-length statistics plus value
//! frequencies per column.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use pvw_core::{defaults, OperationType};

use super::{classify_value, infer_column_type, load_table, round4, ValueKind};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::parsers::Table;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NumericStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LengthStats {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred_type: ValueKind,
    pub count: usize,
    pub null_count: usize,
    pub distinct_count: usize,
    /// Present when the column holds numeric values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthStats>,
    pub top_values: Vec<ValueCount>,
}

/// Result of `data_profiling`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProfileReport {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnProfile>,
}

fn numeric_stats(values: &[f64]) -> Option<NumericStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(NumericStats {
        count: values.len(),
        min,
        max,
        mean: round4(mean),
        std_dev: round4(variance.sqrt()),
    })
}

fn length_stats(lengths: &[usize]) -> Option<LengthStats> {
    let min = *lengths.iter().min()?;
    let max = *lengths.iter().max()?;
    let mean = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    Some(LengthStats {
        min,
        max,
        mean: round4(mean),
    })
}

/// Most frequent values, ties broken alphabetically.
fn top_values(counts: HashMap<&str, usize>, n: usize) -> Vec<ValueCount> {
    let mut counts: Vec<(&str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    counts
        .into_iter()
        .take(n)
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect()
}

fn profile_column(table: &Table, col: usize) -> ColumnProfile {
    let mut kinds = Vec::new();
    let mut numbers = Vec::new();
    let mut lengths = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut nulls = 0;

    for raw in table.column(col) {
        let kind = classify_value(raw);
        if kind == ValueKind::Empty {
            nulls += 1;
            continue;
        }
        let value = raw.trim();
        kinds.push(kind);
        if kind.is_numeric() {
            if let Ok(n) = value.parse::<f64>() {
                numbers.push(n);
            }
        }
        lengths.push(value.chars().count());
        *counts.entry(value).or_default() += 1;
    }

    let inferred_type = infer_column_type(kinds.iter().copied());
    ColumnProfile {
        name: table.headers[col].clone(),
        inferred_type,
        count: kinds.len(),
        null_count: nulls,
        distinct_count: counts.len(),
        numeric: if inferred_type.is_numeric() {
            numeric_stats(&numbers)
        } else {
            None
        },
        length: length_stats(&lengths),
        top_values: top_values(counts, defaults::TOP_VALUES),
    }
}

/// Profile every column of `table`.
pub fn profile_table(table: &Table) -> ProfileReport {
    ProfileReport {
        row_count: table.row_count(),
        column_count: table.column_count(),
        columns: (0..table.column_count())
            .map(|col| profile_column(table, col))
            .collect(),
    }
}

/// Handler for `data_profiling`.
#[derive(Default)]
pub struct DataProfilingHandler;

impl DataProfilingHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DataProfilingHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::DataProfiling
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(10, Some("Reading file"));
        let table = match load_table(ctx.file_path(), ctx.file.kind).await {
            Ok(t) => t,
            Err(e) => return JobResult::Retry(e.to_string()),
        };

        ctx.report_progress(40, Some("Profiling columns"));
        let report = profile_table(&table);
        ctx.report_progress(90, Some("Profile complete"));

        info!(
            subsystem = "jobs",
            component = "profiling",
            op = "data_profiling",
            job_id = %ctx.job_id(),
            rows = report.row_count,
            columns = report.column_count,
            "Data profiled"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
