//! Typed value and row representation shared by every engine component.
//!
//! A canonical row is a map from canonical field name to a tagged [`Value`];
//! absence of a key means the value is unknown (null). All parsing from raw
//! string cells into typed values happens here, so reconciliation, merging,
//! and scoring never operate on untyped data.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::schema::{FieldType, SchemaDefinition};
use crate::store::RawTable;

/// A single typed cell. Nulls are modelled by omission from the row map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
}

/// One canonical row: field name to present value. Missing keys are nulls.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    (*n as i64).to_string()
                } else {
                    n.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

/// Lowercases and collapses every non-alphanumeric character to `_`, so that
/// `"ASIN"`, `"Asin Code"`, and `"asin-code"` compare structurally.
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Parses one raw cell into a typed value. Empty cells are null.
pub fn parse_typed_value(value: &str, ty: FieldType) -> Result<Option<Value>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let parsed = match ty {
        FieldType::String => Value::String(value.to_string()),
        FieldType::Number => {
            let parsed: f64 = trimmed
                .parse()
                .with_context(|| format!("Failed to parse '{trimmed}' as number"))?;
            Value::Number(parsed)
        }
        FieldType::Boolean => {
            let lowered = trimmed.to_ascii_lowercase();
            let parsed = match lowered.as_str() {
                "true" | "t" | "yes" | "y" | "1" => true,
                "false" | "f" | "no" | "n" | "0" => false,
                _ => bail!("Failed to parse '{trimmed}' as boolean"),
            };
            Value::Boolean(parsed)
        }
        FieldType::Date => Value::Date(parse_naive_date(trimmed)?),
    };
    Ok(Some(parsed))
}

/// Reads a raw table whose headers are already canonical field names into
/// typed rows. Cells that fail to parse under the declared type become null
/// (logged); headers without a schema counterpart are ignored with a warning.
pub fn typed_rows_from_raw(raw: &RawTable, schema: &SchemaDefinition) -> Vec<Row> {
    let mut column_types: Vec<Option<FieldType>> = Vec::with_capacity(raw.columns.len());
    for name in &raw.columns {
        match schema.field(name) {
            Some(field) => column_types.push(Some(field.field_type)),
            None => {
                warn!(
                    "Column '{}' is not a canonical field of dataset '{}'; ignoring",
                    name, schema.dataset
                );
                column_types.push(None);
            }
        }
    }
    let mut rows = Vec::with_capacity(raw.rows.len());
    for (row_idx, raw_row) in raw.rows.iter().enumerate() {
        let mut row = Row::new();
        for (col_idx, name) in raw.columns.iter().enumerate() {
            let Some(ty) = column_types[col_idx] else {
                continue;
            };
            let cell = raw_row.get(col_idx).map(String::as_str).unwrap_or("");
            match parse_typed_value(cell, ty) {
                Ok(Some(value)) => {
                    row.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "Row {}, column '{}': {err:#}; treating as null",
                        row_idx + 1,
                        name
                    );
                }
            }
        }
        rows.push(row);
    }
    rows
}

/// Serializes typed rows back into a raw table with columns in schema
/// declaration order. Null values render as empty cells.
pub fn raw_from_typed_rows(rows: &[Row], schema: &SchemaDefinition) -> RawTable {
    let columns: Vec<String> = schema.field_names();
    let raw_rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|name| row.get(name).map(Value::as_display).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect();
    RawTable {
        columns,
        rows: raw_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_support::review_schema;

    #[test]
    fn normalize_column_name_replaces_non_alphanumeric() {
        assert_eq!(normalize_column_name("Asin Code"), "asin_code");
        assert_eq!(normalize_column_name("ASIN"), "asin");
        assert_eq!(normalize_column_name("$Rating%"), "_rating_");
    }

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06").unwrap(), expected);
        assert_eq!(parse_naive_date("06/05/2024").unwrap(), expected);
        assert!(parse_naive_date("May sixth").is_err());
    }

    #[test]
    fn parse_typed_value_handles_each_type() {
        assert_eq!(
            parse_typed_value("4.5", FieldType::Number).unwrap(),
            Some(Value::Number(4.5))
        );
        assert_eq!(
            parse_typed_value("yes", FieldType::Boolean).unwrap(),
            Some(Value::Boolean(true))
        );
        assert_eq!(parse_typed_value("  ", FieldType::String).unwrap(), None);
        assert!(parse_typed_value("abc", FieldType::Number).is_err());
    }

    #[test]
    fn typed_round_trip_preserves_values_and_nulls() {
        let schema = review_schema();
        let raw = RawTable {
            columns: vec!["asin".into(), "title".into(), "rating".into()],
            rows: vec![
                vec!["B001".into(), "Opener".into(), "4.5".into()],
                vec!["B002".into(), "".into(), "3".into()],
            ],
        };
        let rows = typed_rows_from_raw(&raw, &schema);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("rating"), Some(&Value::Number(4.5)));
        assert!(!rows[1].contains_key("title"));

        let back = raw_from_typed_rows(&rows, &schema);
        assert_eq!(back.columns, schema.field_names());
        let title_idx = back.column_index("title").unwrap();
        assert_eq!(back.rows[1][title_idx], "");
    }

    #[test]
    fn unparseable_cells_become_null_not_errors() {
        let schema = review_schema();
        let raw = RawTable {
            columns: vec!["asin".into(), "rating".into()],
            rows: vec![vec!["B001".into(), "five stars".into()]],
        };
        let rows = typed_rows_from_raw(&raw, &schema);
        assert!(!rows[0].contains_key("rating"));
        assert!(rows[0].contains_key("asin"));
    }
}
