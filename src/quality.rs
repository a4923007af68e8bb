//! Quality Scorer: per-record completeness and validity, per-table aggregates.
//!
//! Scoring only annotates. Rows are never filtered, reordered, or mutated,
//! so the scorer can run after every merge without affecting table content.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::Row;
use crate::schema::{FieldType, SchemaDefinition};

/// Score for one row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordScore {
    /// Fraction of required fields present and non-null, in [0, 1].
    pub completeness: f64,
    /// Fields whose present value fails a declared validity check.
    pub invalid_fields: Vec<String>,
}

/// Aggregate quality of a whole table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableQuality {
    pub records: Vec<RecordScore>,
    pub average_completeness: f64,
    /// Fraction of rows missing each canonical field.
    pub field_null_rate: BTreeMap<String, f64>,
}

impl TableQuality {
    pub fn row_count(&self) -> usize {
        self.records.len()
    }

    pub fn invalid_value_count(&self) -> usize {
        self.records.iter().map(|r| r.invalid_fields.len()).sum()
    }
}

/// Scores every row of a table against its schema.
///
/// Validity checks are the declared simple ones: numeric min/max bounds.
/// Type conformance (parseable date, numeric cell) is enforced upstream at
/// reconciliation time, where nonconforming cells already became nulls.
pub fn score(rows: &[Row], schema: &SchemaDefinition) -> TableQuality {
    let required = schema.required_fields();
    let mut records = Vec::with_capacity(rows.len());
    let mut null_counts: BTreeMap<String, usize> = schema
        .fields
        .iter()
        .map(|f| (f.name.clone(), 0usize))
        .collect();

    for row in rows {
        let completeness = if required.is_empty() {
            1.0
        } else {
            let present = required.iter().filter(|f| row.contains_key(*f)).count();
            present as f64 / required.len() as f64
        };

        let mut invalid_fields = Vec::new();
        for field in &schema.fields {
            match row.get(&field.name) {
                None => {
                    *null_counts.entry(field.name.clone()).or_default() += 1;
                }
                Some(value) => {
                    if field.field_type == FieldType::Number
                        && let Some(n) = value.as_number()
                    {
                        let below = field.min.is_some_and(|min| n < min);
                        let above = field.max.is_some_and(|max| n > max);
                        if below || above {
                            invalid_fields.push(field.name.clone());
                        }
                    }
                }
            }
        }
        records.push(RecordScore {
            completeness,
            invalid_fields,
        });
    }

    let average_completeness = if records.is_empty() {
        // Vacuously complete: an empty table has no incomplete record.
        1.0
    } else {
        records.iter().map(|r| r.completeness).sum::<f64>() / records.len() as f64
    };
    let field_null_rate = null_counts
        .into_iter()
        .map(|(field, nulls)| {
            let rate = if rows.is_empty() {
                0.0
            } else {
                nulls as f64 / rows.len() as f64
            };
            (field, rate)
        })
        .collect();

    TableQuality {
        records,
        average_completeness,
        field_null_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::schema::test_support::review_schema;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn full_row_scores_one_empty_row_scores_zero() {
        let schema = review_schema();
        let rows = vec![
            row(&[
                ("asin", s("B001")),
                ("title", s("Opener")),
                ("rating", Value::Number(4.0)),
            ]),
            Row::new(),
        ];
        let quality = score(&rows, &schema);
        assert_eq!(quality.records[0].completeness, 1.0);
        assert_eq!(quality.records[1].completeness, 0.0);
        assert_eq!(quality.average_completeness, 0.5);
    }

    #[test]
    fn completeness_is_always_within_bounds() {
        let schema = review_schema();
        let rows = vec![
            row(&[("asin", s("B001"))]),
            row(&[("asin", s("B002")), ("title", s("T"))]),
            row(&[("rating", Value::Number(3.0))]),
        ];
        let quality = score(&rows, &schema);
        for record in &quality.records {
            assert!((0.0..=1.0).contains(&record.completeness));
        }
        assert!((0.0..=1.0).contains(&quality.average_completeness));
    }

    #[test]
    fn out_of_range_numbers_are_flagged_not_dropped() {
        let schema = review_schema();
        let rows = vec![row(&[
            ("asin", s("B001")),
            ("title", s("Opener")),
            ("rating", Value::Number(12.0)),
        ])];
        let quality = score(&rows, &schema);
        assert_eq!(quality.row_count(), 1);
        assert_eq!(quality.records[0].invalid_fields, vec!["rating".to_string()]);
        assert_eq!(quality.invalid_value_count(), 1);
    }

    #[test]
    fn null_rates_count_missing_fields_per_column() {
        let schema = review_schema();
        let rows = vec![
            row(&[("asin", s("B001")), ("title", s("A"))]),
            row(&[("asin", s("B002"))]),
        ];
        let quality = score(&rows, &schema);
        assert_eq!(quality.field_null_rate["asin"], 0.0);
        assert_eq!(quality.field_null_rate["title"], 0.5);
        assert_eq!(quality.field_null_rate["body"], 1.0);
    }

    #[test]
    fn empty_table_is_vacuously_complete() {
        let schema = review_schema();
        let quality = score(&[], &schema);
        assert_eq!(quality.average_completeness, 1.0);
        assert!(quality.records.is_empty());
        assert!(quality.field_null_rate.values().all(|r| *r == 0.0));
    }
}
