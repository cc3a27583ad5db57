//! Format-specific readers turning uploaded files into rows of text cells.
//!
//! Every format lands in the same [`Table`] shape so the operations never
//! care where the data came from. CSV files above the large-file threshold
//! can instead be streamed with [`read_csv_chunks`].

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use calamine::Reader;
use serde_json::Value as JsonValue;

use pvw_client::Record;
use pvw_core::{Error, FileKind, Result};

/// Header row plus data rows, all cells as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Cell at (`row`, `col`); ragged rows read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = &str> + '_ {
        (0..self.rows.len()).map(move |row| self.cell(row, col))
    }

    /// Rows keyed by header, for template mapping.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Read and parse a stored file.
pub fn parse_file(path: &Path, kind: FileKind) -> Result<Table> {
    let data = std::fs::read(path)?;
    parse_bytes(kind, &data)
}

/// Parse file contents according to `kind`.
pub fn parse_bytes(kind: FileKind, data: &[u8]) -> Result<Table> {
    match kind {
        FileKind::Csv => parse_csv(data),
        FileKind::Xlsx | FileKind::Xls => parse_spreadsheet(data),
        FileKind::Json => parse_json(data),
        FileKind::Txt => parse_txt(data),
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader)
}

fn csv_headers<R: Read>(rdr: &mut csv::Reader<R>) -> Result<Vec<String>> {
    Ok(rdr
        .headers()
        .map_err(|e| Error::Parse(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect())
}

fn parse_csv(data: &[u8]) -> Result<Table> {
    let mut rdr = csv_reader(data);
    let headers = csv_headers(&mut rdr)?;

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| Error::Parse(format!("Row {}: {}", idx + 1, e)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

/// Stream a CSV file in chunks of `chunk_rows` rows.
///
/// `on_chunk` receives the headers and each chunk in order. Returns the
/// number of chunks read.
pub fn read_csv_chunks<F>(path: &Path, chunk_rows: usize, mut on_chunk: F) -> Result<usize>
where
    F: FnMut(&[String], &[Vec<String>]),
{
    let chunk_rows = chunk_rows.max(1);
    let mut rdr = csv_reader(BufReader::new(File::open(path)?));
    let headers = csv_headers(&mut rdr)?;

    let mut chunk: Vec<Vec<String>> = Vec::with_capacity(chunk_rows);
    let mut chunks = 0;
    for (idx, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| Error::Parse(format!("Row {}: {}", idx + 1, e)))?;
        chunk.push(record.iter().map(str::to_string).collect());
        if chunk.len() == chunk_rows {
            on_chunk(&headers, &chunk);
            chunks += 1;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        on_chunk(&headers, &chunk);
        chunks += 1;
    }
    Ok(chunks)
}

/// First worksheet with data; its first non-empty row is the header.
fn parse_spreadsheet(data: &[u8]) -> Result<Table> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(data))
        .map_err(|e| Error::Parse(format!("Failed to open workbook: {}", e)))?;

    for sheet_name in workbook.sheet_names().to_vec() {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::debug!(sheet = %sheet_name, error = %e, "Skipping unreadable sheet");
                continue;
            }
        };

        let mut rows = range.rows().map(|row| {
            row.iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    calamine::Data::String(s) => s.clone(),
                    calamine::Data::Float(f) => f.to_string(),
                    calamine::Data::Int(i) => i.to_string(),
                    calamine::Data::Bool(b) => b.to_string(),
                    calamine::Data::DateTime(dt) => dt.to_string(),
                    calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
                    _ => String::new(),
                })
                .collect::<Vec<String>>()
        });

        let Some(headers) = rows.by_ref().find(|r| r.iter().any(|c| !c.is_empty())) else {
            continue;
        };
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
        let rows = rows.filter(|r| r.iter().any(|c| !c.is_empty())).collect();
        return Ok(Table { headers, rows });
    }

    Ok(Table::default())
}

/// An array of objects (or a single object). Headers are the union of keys
/// in first-seen order.
fn parse_json(data: &[u8]) -> Result<Table> {
    let value: JsonValue = serde_json::from_slice(data)
        .map_err(|e| Error::Parse(format!("Invalid JSON: {}", e)))?;

    let items = match value {
        JsonValue::Array(items) => items,
        obj @ JsonValue::Object(_) => vec![obj],
        other => {
            return Err(Error::Parse(format!(
                "Expected a JSON array of objects, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut headers: Vec<String> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Err(Error::Parse(format!(
                "Item {}: expected an object, got {}",
                idx + 1,
                json_kind(item)
            )));
        };
        for key in obj.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }

    let rows = items
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| {
            headers
                .iter()
                .map(|h| obj.get(h).map(json_cell).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(Table { headers, rows })
}

fn json_cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// One `line` column, blank lines skipped.
fn parse_txt(data: &[u8]) -> Result<Table> {
    let text = String::from_utf8_lossy(data);
    let rows = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| vec![l.to_string()])
        .collect();
    Ok(Table {
        headers: vec!["line".to_string()],
        rows,
    })
}
