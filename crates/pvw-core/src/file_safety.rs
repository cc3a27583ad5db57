//! Upload validation: extension allow-list, per-kind size limits, executable
//! detection, and filename sanitization.
//!
//! Checks run in order and the first failure wins:
//! 1. Filename present
//! 2. Extension in the allow-list (`csv`, `xlsx`, `xls`, `json`, `txt`)
//! 3. Non-empty and within the size limit for that kind
//! 4. Text kinds (csv, json, txt) must not carry binary content;
//!    spreadsheets must not start with an executable signature

use std::collections::HashMap;
use std::path::PathBuf;

use crate::{defaults, Error, FileKind, Result};

/// Magic byte signatures for executable files
const MAGIC_SIGNATURES: &[(&str, &[u8])] = &[
    ("Windows PE/MZ", &[0x4D, 0x5A]),
    ("ELF", &[0x7F, 0x45, 0x4C, 0x46]),
    ("Mach-O 32", &[0xFE, 0xED, 0xFA, 0xCE]),
    ("Mach-O 64", &[0xFE, 0xED, 0xFA, 0xCF]),
    ("Mach-O Fat/Java Class", &[0xCA, 0xFE, 0xBA, 0xBE]),
    ("WebAssembly", &[0x00, 0x61, 0x73, 0x6D]),
];

/// Upload configuration: storage location, size limits, retention.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory files are written to.
    pub upload_dir: PathBuf,
    /// Per-kind maximum size in bytes.
    pub max_bytes: HashMap<FileKind, u64>,
    /// Days before the retention sweep deletes a file.
    pub retention_days: i64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            max_bytes: FileKind::ALL
                .iter()
                .map(|k| (*k, k.default_max_bytes()))
                .collect(),
            retention_days: defaults::FILE_RETENTION_DAYS,
        }
    }
}

impl UploadConfig {
    /// Create configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `UPLOAD_DIR` | `./uploads` |
    /// | `UPLOAD_MAX_CSV_BYTES` | 100 MiB |
    /// | `UPLOAD_MAX_EXCEL_BYTES` | 50 MiB (xlsx and xls) |
    /// | `UPLOAD_MAX_JSON_BYTES` | 50 MiB |
    /// | `UPLOAD_MAX_TXT_BYTES` | 10 MiB |
    /// | `FILE_RETENTION_DAYS` | 7 |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                config.upload_dir = PathBuf::from(dir);
            }
        }

        let overrides: [(&str, &[FileKind]); 4] = [
            ("UPLOAD_MAX_CSV_BYTES", &[FileKind::Csv]),
            ("UPLOAD_MAX_EXCEL_BYTES", &[FileKind::Xlsx, FileKind::Xls]),
            ("UPLOAD_MAX_JSON_BYTES", &[FileKind::Json]),
            ("UPLOAD_MAX_TXT_BYTES", &[FileKind::Txt]),
        ];
        for (var, kinds) in overrides {
            if let Some(limit) = std::env::var(var).ok().and_then(|v| v.parse::<u64>().ok()) {
                for kind in kinds {
                    config.max_bytes.insert(*kind, limit);
                }
            }
        }

        if let Some(days) = std::env::var("FILE_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
        {
            config.retention_days = days;
        }

        config
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn with_max_bytes(mut self, kind: FileKind, limit: u64) -> Self {
        self.max_bytes.insert(kind, limit);
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Size limit for a kind.
    pub fn max_bytes_for(&self, kind: FileKind) -> u64 {
        self.max_bytes
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_max_bytes())
    }
}

/// Validate an upload before anything is persisted.
///
/// Returns the resolved [`FileKind`] on success.
pub fn validate_upload(
    filename: Option<&str>,
    data: &[u8],
    config: &UploadConfig,
) -> Result<FileKind> {
    let filename = filename
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::InvalidInput("No filename provided".to_string()))?;

    let kind = FileKind::from_filename(filename).ok_or_else(|| {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, e)| format!(".{}", e))
            .unwrap_or_else(|| "(none)".to_string());
        Error::InvalidInput(format!(
            "File type {} not allowed. Allowed types: csv, xlsx, xls, json, txt",
            ext
        ))
    })?;

    if data.is_empty() {
        return Err(Error::InvalidInput("File is empty".to_string()));
    }

    let limit = config.max_bytes_for(kind);
    if data.len() as u64 > limit {
        return Err(Error::InvalidInput(format!(
            "File too large: {} bytes exceeds the {} byte limit for .{} files",
            data.len(),
            limit,
            kind
        )));
    }

    if kind.is_text() {
        if looks_binary(data) {
            return Err(Error::InvalidInput(format!(
                "Binary content is not allowed in .{} files",
                kind
            )));
        }
    } else {
        for (name, magic) in MAGIC_SIGNATURES {
            if data.starts_with(magic) {
                return Err(Error::InvalidInput(format!(
                    "Executable content detected: {}",
                    name
                )));
            }
        }
    }

    Ok(kind)
}

/// Bytes inspected by [`looks_binary`].
const TEXT_SNIFF_BYTES: usize = 1024;

/// NUL bytes or invalid UTF-8 in the leading bytes. A multi-byte character
/// cut off at the end of the window is not an error.
fn looks_binary(data: &[u8]) -> bool {
    let head = &data[..data.len().min(TEXT_SNIFF_BYTES)];
    if head.contains(&0) {
        return true;
    }
    match std::str::from_utf8(head) {
        Ok(_) => false,
        Err(e) => e.error_len().is_some(),
    }
}

/// Content type of an upload. Text kinds have no signature, so their
/// default MIME type is used; spreadsheets are sniffed with `infer`.
pub fn detect_content_type(kind: FileKind, data: &[u8]) -> String {
    if kind.is_text() {
        return kind.default_mime_type().to_string();
    }
    match infer::get(data) {
        Some(detected) => detected.mime_type().to_string(),
        None => kind.default_mime_type().to_string(),
    }
}

/// Sanitize filename for safe storage
pub fn sanitize_filename(filename: &str) -> String {
    // Remove path components
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "unnamed_file".to_string();
    }

    // Truncate to 255 bytes, keeping the extension
    if sanitized.len() > 255 {
        let (stem, ext) = match sanitized.rfind('.') {
            Some(pos) if sanitized.len() - pos <= 16 => sanitized.split_at(pos),
            _ => (sanitized, ""),
        };
        let mut cut = 255 - ext.len();
        while !stem.is_char_boundary(cut) {
            cut -= 1;
        }
        return format!("{}{}", &stem[..cut], ext);
    }

    sanitized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UploadConfig {
        UploadConfig::default()
    }

    #[test]
    fn test_validate_accepts_csv() {
        let kind = validate_upload(Some("people.csv"), b"name,age\nada,36\n", &config()).unwrap();
        assert_eq!(kind, FileKind::Csv);
    }

    #[test]
    fn test_validate_missing_filename() {
        let err = validate_upload(None, b"x", &config()).unwrap_err();
        assert!(err.to_string().contains("No filename"));

        let err = validate_upload(Some("   "), b"x", &config()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_validate_disallowed_extension() {
        let err = validate_upload(Some("run.sh"), b"echo hi", &config()).unwrap_err();
        assert!(err.to_string().contains(".sh not allowed"));

        let err = validate_upload(Some("README"), b"hello", &config()).unwrap_err();
        assert!(err.to_string().contains("(none)"));
    }

    #[test]
    fn test_validate_empty_file() {
        let err = validate_upload(Some("empty.json"), b"", &config()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_validate_oversize_per_kind() {
        let cfg = config().with_max_bytes(FileKind::Txt, 4);
        let err = validate_upload(Some("notes.txt"), b"hello", &cfg).unwrap_err();
        assert!(err.to_string().contains("too large"));

        // Limit applies per kind only
        assert!(validate_upload(Some("notes.csv"), b"hello", &cfg).is_ok());
    }

    #[test]
    fn test_validate_rejects_executable_spreadsheet() {
        let mut data = b"MZ".to_vec();
        data.extend_from_slice(&[0x90, 0x00, 0x03, 0x00]);
        let err = validate_upload(Some("report.xlsx"), &data, &config()).unwrap_err();
        assert!(err.to_string().contains("Windows PE/MZ"));

        let elf = [0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00];
        let err = validate_upload(Some("legacy.xls"), &elf, &config()).unwrap_err();
        assert!(err.to_string().contains("ELF"));
    }

    #[test]
    fn test_validate_rejects_binary_in_text_kind() {
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
        let err = validate_upload(Some("table.csv"), &png, &config()).unwrap_err();
        assert!(err.to_string().contains("Binary content"));

        let elf = [0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00];
        assert!(validate_upload(Some("data.txt"), &elf, &config()).is_err());

        let latin1 = b"name,city\nJos\xe9,M\xe1laga\n";
        assert!(validate_upload(Some("people.csv"), latin1, &config()).is_err());
    }

    #[test]
    fn test_validate_accepts_text_resembling_signatures() {
        let cases: [(&str, &[u8]); 5] = [
            ("health.csv", b"BMI,weight\n22.5,70\n"),
            ("codes.txt", b"MZ-1001 Mazda part\n"),
            ("tags.csv", b"ID3,label\n1,rock\n"),
            ("notes.txt", b"%PDF export notes\n"),
            ("rows.json", b"[{\"PK\": 1}]"),
        ];
        for (name, data) in cases {
            let kind = validate_upload(Some(name), data, &config())
                .unwrap_or_else(|e| panic!("{name} rejected: {e}"));
            assert!(kind.is_text());
        }
    }

    #[test]
    fn test_validate_accepts_utf8_cut_at_sniff_window() {
        let mut data = "a".repeat(TEXT_SNIFF_BYTES - 1).into_bytes();
        data.extend_from_slice("é,ü\n".as_bytes());
        assert!(validate_upload(Some("wide.csv"), &data, &config()).is_ok());
    }

    #[test]
    fn test_detect_content_type_falls_back_to_kind() {
        assert_eq!(detect_content_type(FileKind::Csv, b"a,b\n1,2"), "text/csv");
        assert_eq!(
            detect_content_type(FileKind::Json, b"{\"a\":1}"),
            "application/json"
        );
    }

    #[test]
    fn test_detect_content_type_ignores_signatures_in_text() {
        let pdf = b"%PDF-1.4 fake content";
        assert_eq!(detect_content_type(FileKind::Txt, pdf), "text/plain");
        assert_eq!(detect_content_type(FileKind::Csv, b"BMI,weight\n"), "text/csv");
    }

    #[test]
    fn test_detect_content_type_sniffs_spreadsheets() {
        let zip = b"PK\x03\x04\x14\x00\x06\x00rest";
        assert!(detect_content_type(FileKind::Xlsx, zip).starts_with("application/"));
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.csv"), "passwd.csv");
        assert_eq!(sanitize_filename("C:\\data\\in.xlsx"), "in.xlsx");
    }

    #[test]
    fn test_sanitize_replaces_dangerous_chars() {
        assert_eq!(sanitize_filename("a<b>:c|d?.csv"), "a_b__c_d_.csv");
        assert_eq!(sanitize_filename("tab\there.txt"), "tab_here.txt");
    }

    #[test]
    fn test_sanitize_empty_becomes_placeholder() {
        assert_eq!(sanitize_filename("   "), "unnamed_file");
        assert_eq!(sanitize_filename("dir/"), "unnamed_file");
        assert_eq!(sanitize_filename(".."), "unnamed_file");
    }

    #[test]
    fn test_sanitize_truncates_preserving_extension() {
        let long = format!("{}.csv", "x".repeat(400));
        let out = sanitize_filename(&long);
        assert_eq!(out.len(), 255);
        assert!(out.ends_with(".csv"));
    }

    #[test]
    fn test_config_builders() {
        let cfg = UploadConfig::default()
            .with_upload_dir("/tmp/uploads")
            .with_max_bytes(FileKind::Json, 10)
            .with_retention_days(1);
        assert_eq!(cfg.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(cfg.max_bytes_for(FileKind::Json), 10);
        assert_eq!(cfg.max_bytes_for(FileKind::Csv), defaults::MAX_CSV_BYTES);
        assert_eq!(cfg.retention_days, 1);
    }
}
