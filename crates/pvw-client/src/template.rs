//! Declarative mapping from tabular rows to catalog entities.
//!
//! An [`EntityTemplate`] names the entity type and lists column mappings.
//! Each mapping says which source column feeds which entity attribute,
//! whether the column is required, how its text is coerced, and an optional
//! default used when the cell is empty.
//!
//! ```json
//! {
//!   "name": "table",
//!   "type_name": "azure_sql_table",
//!   "columns": [
//!     {"column": "qualified_name", "attribute": "qualifiedName", "required": true},
//!     {"column": "row_count", "attribute": "rowCount", "column_type": "integer"}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

use pvw_core::{Error, Result};

use crate::types::AtlasEntity;

/// One source row keyed by column header.
pub type Record = HashMap<String, String>;

/// Separator for `list` columns.
pub const LIST_SEPARATOR: char = ';';

/// How a cell's text is converted into an attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 or `YYYY-MM-DD`; stored as epoch milliseconds.
    Date,
    /// `;`-separated values.
    List,
}

impl ColumnType {
    /// Coerce cell text into a JSON value.
    pub fn coerce(&self, raw: &str) -> std::result::Result<JsonValue, String> {
        match self {
            ColumnType::String => Ok(JsonValue::String(raw.to_string())),
            ColumnType::Integer => raw
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| format!("invalid integer '{}'", raw)),
            ColumnType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("invalid float '{}'", raw)),
            ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(JsonValue::Bool(true)),
                "false" | "no" | "n" | "0" => Ok(JsonValue::Bool(false)),
                _ => Err(format!("invalid boolean '{}'", raw)),
            },
            ColumnType::Date => parse_date(raw)
                .map(|d| JsonValue::from(d.timestamp_millis()))
                .ok_or_else(|| format!("invalid date '{}'", raw)),
            ColumnType::List => Ok(JsonValue::Array(
                raw.split(LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| JsonValue::String(s.to_string()))
                    .collect(),
            )),
        }
    }

    /// Render an attribute value back into cell text.
    pub fn render(&self, value: &JsonValue) -> String {
        match (self, value) {
            (_, JsonValue::Null) => String::new(),
            (ColumnType::Date, JsonValue::Number(n)) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_else(|| n.to_string()),
            (_, JsonValue::Array(items)) => items
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&LIST_SEPARATOR.to_string()),
            (_, JsonValue::String(s)) => s.clone(),
            (_, other) => other.to_string(),
        }
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Maps one source column to one entity attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source column header.
    pub column: String,
    /// Target attribute name.
    pub attribute: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub column_type: ColumnType,
    /// Used when the cell is missing or blank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnMapping {
    fn new(column: &str, attribute: &str) -> Self {
        Self {
            column: column.to_string(),
            attribute: attribute.to_string(),
            required: false,
            column_type: ColumnType::String,
            default: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn typed(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }
}

/// Declarative row-to-entity mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub name: String,
    /// Atlas type name of the created entities.
    pub type_name: String,
    pub columns: Vec<ColumnMapping>,
}

impl EntityTemplate {
    /// Names of the built-in templates.
    pub const BUILTIN: &'static [&'static str] = &["table", "column", "dataset"];

    /// Built-in template by name.
    pub fn builtin(name: &str) -> Option<Self> {
        use ColumnType::*;

        let (type_name, columns) = match name {
            "table" => (
                "azure_sql_table",
                vec![
                    ColumnMapping::new("qualified_name", "qualifiedName").required(),
                    ColumnMapping::new("name", "name").required(),
                    ColumnMapping::new("description", "description"),
                    ColumnMapping::new("owner", "owner"),
                    ColumnMapping::new("schema", "schemaName"),
                    ColumnMapping::new("row_count", "rowCount").typed(Integer),
                    ColumnMapping::new("created", "createTime").typed(Date),
                    ColumnMapping::new("tags", "userTags").typed(List),
                ],
            ),
            "column" => (
                "azure_sql_column",
                vec![
                    ColumnMapping::new("qualified_name", "qualifiedName").required(),
                    ColumnMapping::new("name", "name").required(),
                    ColumnMapping::new("data_type", "data_type")
                        .required()
                        .default_value("string"),
                    ColumnMapping::new("description", "description"),
                    ColumnMapping::new("nullable", "isNullable").typed(Boolean),
                    ColumnMapping::new("length", "length").typed(Integer),
                ],
            ),
            "dataset" => (
                "DataSet",
                vec![
                    ColumnMapping::new("qualified_name", "qualifiedName").required(),
                    ColumnMapping::new("name", "name").required(),
                    ColumnMapping::new("description", "description"),
                    ColumnMapping::new("owner", "owner"),
                    ColumnMapping::new("size_mb", "sizeMb").typed(Float),
                    ColumnMapping::new("tags", "userTags").typed(List),
                ],
            ),
            _ => return None,
        };

        Some(Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            columns,
        })
    }

    /// Parse and check a template from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let template: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Invalid template: {}", e)))?;
        template.check()?;
        Ok(template)
    }

    /// Resolve a template from a JSON value: a built-in name or an inline object.
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::String(name) => Self::builtin(name)
                .ok_or_else(|| Error::InvalidInput(format!("Unknown template '{}'", name))),
            JsonValue::Object(_) => {
                let template: Self = serde_json::from_value(value.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid template: {}", e)))?;
                template.check()?;
                Ok(template)
            }
            other => Err(Error::InvalidInput(format!(
                "Template must be a name or an object, got {}",
                other
            ))),
        }
    }

    /// Resolve a built-in name or a path to a JSON template file.
    pub fn load(spec: &str) -> Result<Self> {
        if let Some(template) = Self::builtin(spec) {
            return Ok(template);
        }
        let path = Path::new(spec);
        if !path.exists() {
            return Err(Error::InvalidInput(format!(
                "Unknown template '{}' (built-ins: {})",
                spec,
                Self::BUILTIN.join(", ")
            )));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn check(&self) -> Result<()> {
        if self.type_name.trim().is_empty() {
            return Err(Error::InvalidInput("Template type_name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(Error::InvalidInput("Template has no columns".to_string()));
        }
        if !self.columns.iter().any(|c| c.attribute == "qualifiedName") {
            return Err(Error::InvalidInput(
                "Template must map a column to qualifiedName".to_string(),
            ));
        }
        Ok(())
    }

    /// Column headers in template order.
    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.column.as_str()).collect()
    }

    /// Required columns absent from `headers`.
    pub fn missing_required_headers(&self, headers: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.required && c.default.is_none())
            .filter(|c| !headers.iter().any(|h| h == &c.column))
            .map(|c| c.column.clone())
            .collect()
    }

    /// Map one record to an entity, or return every problem in the row.
    ///
    /// `row_number` is the 1-based data row (header excluded).
    pub fn map_record(
        &self,
        record: &Record,
        row_number: usize,
    ) -> std::result::Result<AtlasEntity, Vec<String>> {
        let mut entity = AtlasEntity::new(&self.type_name);
        let mut errors = Vec::new();

        for mapping in &self.columns {
            let raw = record
                .get(&mapping.column)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .or(mapping.default.as_deref());

            let Some(raw) = raw else {
                if mapping.required {
                    errors.push(format!(
                        "Row {}: missing required column '{}'",
                        row_number, mapping.column
                    ));
                }
                continue;
            };

            match mapping.column_type.coerce(raw) {
                Ok(value) => {
                    entity.attributes.insert(mapping.attribute.clone(), value);
                }
                Err(reason) => errors.push(format!(
                    "Row {}: column '{}': {}",
                    row_number, mapping.column, reason
                )),
            }
        }

        if errors.is_empty() {
            Ok(entity)
        } else {
            Err(errors)
        }
    }

    /// Render an entity as a record with this template's headers.
    pub fn entity_to_record(&self, entity: &AtlasEntity) -> Vec<String> {
        self.columns
            .iter()
            .map(|mapping| {
                entity
                    .attributes
                    .get(&mapping.attribute)
                    .map(|v| mapping.column_type.render(v))
                    .unwrap_or_default()
            })
            .collect()
    }
}
