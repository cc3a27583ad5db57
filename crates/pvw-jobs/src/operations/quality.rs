//! Data quality check: completeness, validity and uniqueness scoring.
//!
//! - completeness: filled required cells / required cells, averaged per row
//! - validity: share of non-empty values in email/url/date/phone columns
//!   that match their expected pattern
//! - uniqueness: distinct rows / rows
//!
//! The overall score is the mean of the three.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use pvw_core::OperationType;

use super::patterns::{is_email, is_phone, is_url, name_tokens};
use super::{is_date, load_table, round4};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::parsers::Table;

/// Pattern a column is validated against, chosen from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityRule {
    Email,
    Url,
    Date,
    Phone,
}

impl ValidityRule {
    pub fn for_column(name: &str) -> Option<Self> {
        let tokens = name_tokens(name);
        let has = |words: &[&str]| tokens.iter().any(|t| words.contains(&t.as_str()));
        if has(&["email", "mail"]) {
            Some(ValidityRule::Email)
        } else if has(&["url", "website", "link", "homepage"]) {
            Some(ValidityRule::Url)
        } else if has(&["date", "dob", "birthday"]) {
            Some(ValidityRule::Date)
        } else if has(&["phone", "mobile", "tel", "telephone"]) {
            Some(ValidityRule::Phone)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidityRule::Email => "email",
            ValidityRule::Url => "url",
            ValidityRule::Date => "date",
            ValidityRule::Phone => "phone",
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            ValidityRule::Email => is_email(value),
            ValidityRule::Url => is_url(value),
            ValidityRule::Date => is_date(value.trim()),
            ValidityRule::Phone => is_phone(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnValidity {
    pub column: String,
    pub rule: ValidityRule,
    pub checked: usize,
    pub invalid: usize,
}

/// Result of `data_quality_check`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityReport {
    pub row_count: usize,
    pub required_columns: Vec<String>,
    pub completeness: f64,
    pub validity: f64,
    pub uniqueness: f64,
    pub overall_score: f64,
    pub incomplete_rows: usize,
    pub duplicate_rows: usize,
    pub validity_checks: Vec<ColumnValidity>,
    pub issues: Vec<String>,
}

/// Score `table`. `required` defaults to every column.
pub fn check_quality(table: &Table, required: Option<&[String]>) -> QualityReport {
    let required: Vec<String> = match required {
        Some(cols) if !cols.is_empty() => cols.to_vec(),
        _ => table.headers.clone(),
    };
    let mut issues = Vec::new();

    let required_idx: Vec<Option<usize>> = required
        .iter()
        .map(|name| {
            let idx = table.headers.iter().position(|h| h == name);
            if idx.is_none() {
                issues.push(format!("Required column '{}' is not present", name));
            }
            idx
        })
        .collect();

    // Completeness
    let mut completeness_sum = 0.0;
    let mut incomplete_rows = 0;
    for row in 0..table.row_count() {
        let filled = required_idx
            .iter()
            .filter(|idx| idx.is_some_and(|i| !table.cell(row, i).trim().is_empty()))
            .count();
        if filled < required_idx.len() {
            incomplete_rows += 1;
        }
        completeness_sum += if required_idx.is_empty() {
            1.0
        } else {
            filled as f64 / required_idx.len() as f64
        };
    }
    let completeness = if table.row_count() == 0 {
        1.0
    } else {
        completeness_sum / table.row_count() as f64
    };
    if incomplete_rows > 0 {
        issues.push(format!(
            "{} of {} rows are missing required values",
            incomplete_rows,
            table.row_count()
        ));
    }

    // Validity
    let mut validity_checks = Vec::new();
    for (col, name) in table.headers.iter().enumerate() {
        let Some(rule) = ValidityRule::for_column(name) else {
            continue;
        };
        let values: Vec<&str> = table.column(col).filter(|v| !v.trim().is_empty()).collect();
        let invalid = values.iter().filter(|v| !rule.matches(v)).count();
        if invalid > 0 {
            issues.push(format!(
                "Column '{}': {} of {} values are not a valid {}",
                name,
                invalid,
                values.len(),
                rule.as_str()
            ));
        }
        validity_checks.push(ColumnValidity {
            column: name.clone(),
            rule,
            checked: values.len(),
            invalid,
        });
    }
    let checked: usize = validity_checks.iter().map(|c| c.checked).sum();
    let invalid: usize = validity_checks.iter().map(|c| c.invalid).sum();
    let validity = if checked == 0 {
        1.0
    } else {
        (checked - invalid) as f64 / checked as f64
    };

    // Uniqueness
    let distinct: HashSet<&Vec<String>> = table.rows.iter().collect();
    let duplicate_rows = table.row_count() - distinct.len();
    let uniqueness = if table.row_count() == 0 {
        1.0
    } else {
        distinct.len() as f64 / table.row_count() as f64
    };
    if duplicate_rows > 0 {
        issues.push(format!("{} duplicate rows", duplicate_rows));
    }

    QualityReport {
        row_count: table.row_count(),
        required_columns: required,
        completeness: round4(completeness),
        validity: round4(validity),
        uniqueness: round4(uniqueness),
        overall_score: round4((completeness + validity + uniqueness) / 3.0),
        incomplete_rows,
        duplicate_rows,
        validity_checks,
        issues,
    }
}

/// `required_columns` option: an array of names or a comma-separated string.
fn required_columns_option(options: Option<&JsonValue>) -> Option<Vec<String>> {
    match options?.get("required_columns")? {
        JsonValue::Array(items) => Some(
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect(),
        ),
        JsonValue::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

/// Handler for `data_quality_check`.
#[derive(Default)]
pub struct DataQualityHandler;

impl DataQualityHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DataQualityHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::DataQualityCheck
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(10, Some("Reading file"));
        let table = match load_table(ctx.file_path(), ctx.file.kind).await {
            Ok(t) => t,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        ctx.report_progress(50, Some("Checking quality"));
        let required = required_columns_option(ctx.options());
        let report = check_quality(&table, required.as_deref());
        ctx.report_progress(90, Some("Quality check complete"));

        info!(
            subsystem = "jobs",
            component = "quality",
            op = "data_quality_check",
            job_id = %ctx.job_id(),
            rows = report.row_count,
            score = report.overall_score,
            issues = report.issues.len(),
            "Quality check finished"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
