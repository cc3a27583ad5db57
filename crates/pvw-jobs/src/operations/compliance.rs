//! Compliance scan: PII detection by column name and value pattern,
//! regulation flags and an overall risk level.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use pvw_core::OperationType;

use super::load_table;
use super::patterns::{is_credit_card, is_email, is_ip_address, is_phone, is_ssn, name_tokens};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::parsers::Table;

/// Kinds of personal data the scan recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
    PersonName,
    Address,
    DateOfBirth,
    Health,
}

impl PiiType {
    /// Types detectable from values; the rest come from column names only.
    const BY_VALUE: [PiiType; 5] = [
        PiiType::Ssn,
        PiiType::CreditCard,
        PiiType::Email,
        PiiType::IpAddress,
        PiiType::Phone,
    ];

    fn matches_value(&self, v: &str) -> bool {
        match self {
            PiiType::Email => is_email(v),
            PiiType::Phone => is_phone(v),
            PiiType::Ssn => is_ssn(v),
            PiiType::CreditCard => is_credit_card(v),
            PiiType::IpAddress => is_ip_address(v),
            _ => false,
        }
    }

    fn from_column_name(name: &str) -> Vec<PiiType> {
        let tokens = name_tokens(name);
        let has = |words: &[&str]| tokens.iter().any(|t| words.contains(&t.as_str()));
        let joined = tokens.concat();

        let mut found = Vec::new();
        if has(&["email", "mail"]) {
            found.push(PiiType::Email);
        }
        if has(&["phone", "mobile", "tel", "telephone", "fax"]) {
            found.push(PiiType::Phone);
        }
        if has(&["ssn", "sin"]) || joined.contains("socialsecurity") {
            found.push(PiiType::Ssn);
        }
        if has(&["card", "ccn", "pan"]) || joined.contains("creditcard") {
            found.push(PiiType::CreditCard);
        }
        if has(&["ip"]) || joined.contains("ipaddress") {
            found.push(PiiType::IpAddress);
        }
        if has(&["firstname", "lastname", "fullname", "surname"])
            || (has(&["name"]) && has(&["first", "last", "full", "customer", "person", "patient"]))
        {
            found.push(PiiType::PersonName);
        }
        if has(&["address", "street", "zip", "zipcode", "postcode", "postal"])
            && !found.contains(&PiiType::Email)
            && !found.contains(&PiiType::IpAddress)
        {
            found.push(PiiType::Address);
        }
        if has(&["dob", "birthdate", "birthday"]) || joined.contains("dateofbirth") {
            found.push(PiiType::DateOfBirth);
        }
        if has(&[
            "diagnosis",
            "medical",
            "health",
            "patient",
            "prescription",
            "icd",
            "treatment",
        ]) {
            found.push(PiiType::Health);
        }
        found
    }

    /// Types that raise the risk to `high` on their own.
    fn is_sensitive(&self) -> bool {
        matches!(self, PiiType::Ssn | PiiType::CreditCard | PiiType::Health)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Regulation {
    #[serde(rename = "GDPR")]
    Gdpr,
    #[serde(rename = "CCPA")]
    Ccpa,
    #[serde(rename = "PCI-DSS")]
    PciDss,
    #[serde(rename = "HIPAA")]
    Hipaa,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnFinding {
    pub column: String,
    pub pii_types: Vec<PiiType>,
    pub matched_by_name: bool,
    /// Values matching a PII pattern.
    pub matching_values: usize,
    pub values_scanned: usize,
}

/// Result of `compliance_scan`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComplianceReport {
    pub row_count: usize,
    pub columns_scanned: usize,
    pub pii_columns: usize,
    pub findings: Vec<ColumnFinding>,
    pub regulations: Vec<Regulation>,
    pub risk_level: RiskLevel,
}

fn scan_column(table: &Table, col: usize) -> Option<ColumnFinding> {
    let name = &table.headers[col];
    let mut types: BTreeSet<PiiType> = PiiType::from_column_name(name).into_iter().collect();
    let matched_by_name = !types.is_empty();

    let mut scanned = 0;
    let mut matching = 0;
    for value in table.column(col).filter(|v| !v.trim().is_empty()) {
        scanned += 1;
        // First matching pattern wins so an SSN is not also counted as a phone.
        if let Some(t) = PiiType::BY_VALUE.iter().find(|t| t.matches_value(value)) {
            matching += 1;
            types.insert(*t);
        }
    }

    if types.is_empty() {
        return None;
    }
    Some(ColumnFinding {
        column: name.clone(),
        pii_types: types.into_iter().collect(),
        matched_by_name,
        matching_values: matching,
        values_scanned: scanned,
    })
}

fn regulations_for(types: &BTreeSet<PiiType>) -> Vec<Regulation> {
    let mut regs = BTreeSet::new();
    if !types.is_empty() {
        regs.insert(Regulation::Gdpr);
    }
    if types.iter().any(|t| *t != PiiType::Health) {
        regs.insert(Regulation::Ccpa);
    }
    if types.contains(&PiiType::CreditCard) {
        regs.insert(Regulation::PciDss);
    }
    if types.contains(&PiiType::Health) {
        regs.insert(Regulation::Hipaa);
    }
    regs.into_iter().collect()
}

/// Scan every column of `table`.
pub fn scan_compliance(table: &Table) -> ComplianceReport {
    let findings: Vec<ColumnFinding> = (0..table.column_count())
        .filter_map(|col| scan_column(table, col))
        .collect();

    let types: BTreeSet<PiiType> = findings
        .iter()
        .flat_map(|f| f.pii_types.iter().copied())
        .collect();

    let risk_level = if types.iter().any(PiiType::is_sensitive) {
        RiskLevel::High
    } else if !types.is_empty() {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    ComplianceReport {
        row_count: table.row_count(),
        columns_scanned: table.column_count(),
        pii_columns: findings.len(),
        regulations: regulations_for(&types),
        findings,
        risk_level,
    }
}

/// Handler for `compliance_scan`.
#[derive(Default)]
pub struct ComplianceScanHandler;

impl ComplianceScanHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for ComplianceScanHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::ComplianceScan
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(10, Some("Reading file"));
        let table = match load_table(ctx.file_path(), ctx.file.kind).await {
            Ok(t) => t,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        ctx.report_progress(50, Some("Scanning for personal data"));
        let report = scan_compliance(&table);
        ctx.report_progress(90, Some("Compliance scan complete"));

        info!(
            subsystem = "jobs",
            component = "compliance",
            op = "compliance_scan",
            job_id = %ctx.job_id(),
            pii_columns = report.pii_columns,
            risk = ?report.risk_level,
            "Compliance scan finished"
        );

        match serde_json::to_value(&report) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
