//! Column Reconciler: maps arbitrary source columns onto canonical fields.
//!
//! Matching runs in two passes. The first pass claims case-insensitive
//! exact/alias matches at distance 0. The second scores every remaining
//! source column against every canonical field with Jaro-Winkler distance and
//! takes the argmin, breaking ties by schema declaration order. A column whose
//! best distance clears the threshold but whose winning field is already
//! claimed is the ambiguity the engine refuses to guess about: reconciliation
//! aborts with a schema conflict naming the field and both source candidates.
//!
//! The function is pure apart from structured log output.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rapidfuzz::distance::jaro_winkler;
use serde::Serialize;

use crate::data::{Row, normalize_column_name, parse_typed_value};
use crate::error::EngineError;
use crate::schema::SchemaDefinition;
use crate::store::RawTable;

/// Default maximum distance for a fuzzy mapping to be accepted.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.3;

/// One accepted source-to-canonical column mapping.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnMapping {
    pub source: String,
    pub canonical: String,
    /// Jaro-Winkler distance in [0, 1]; 0 for exact/alias matches.
    pub distance: f64,
}

impl ColumnMapping {
    pub fn confidence(&self) -> f64 {
        1.0 - self.distance
    }
}

/// Outcome of reconciling one source header row against a schema.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub mappings: Vec<ColumnMapping>,
    /// Source columns dropped because no canonical field was close enough.
    pub extras: Vec<String>,
}

impl Reconciliation {
    /// Canonical fields covered by the accepted mappings.
    pub fn mapped_fields(&self) -> Vec<&str> {
        self.mappings.iter().map(|m| m.canonical.as_str()).collect()
    }
}

/// A row renamed to canonical field names, with unmapped source cells
/// retained in an extras bag that business logic never reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledRow {
    pub fields: Row,
    pub extras: BTreeMap<String, String>,
}

/// Jaro-Winkler distance between two column names after structural
/// normalization (case and punctuation removed).
pub fn column_distance(left: &str, right: &str) -> f64 {
    let a = normalize_column_name(left);
    let b = normalize_column_name(right);
    1.0 - jaro_winkler::similarity(a.chars(), b.chars())
}

pub fn reconcile(
    source_columns: &[String],
    schema: &SchemaDefinition,
    threshold: f64,
) -> Result<Reconciliation, EngineError> {
    // canonical field name -> source column that claimed it
    let mut claimed: BTreeMap<String, String> = BTreeMap::new();
    let mut mappings = Vec::new();
    let mut unmatched: Vec<&String> = Vec::new();

    for source in source_columns {
        let normalized = normalize_column_name(source);
        let exact = schema
            .fields
            .iter()
            .find(|field| field.matches_normalized(&normalized));
        match exact {
            Some(field) => {
                claim(&mut claimed, &field.name, source)?;
                debug!(
                    "Column '{}' matched canonical field '{}' exactly",
                    source, field.name
                );
                mappings.push(ColumnMapping {
                    source: source.clone(),
                    canonical: field.name.clone(),
                    distance: 0.0,
                });
            }
            None => unmatched.push(source),
        }
    }

    let mut extras = Vec::new();
    for source in unmatched {
        let mut best: Option<(usize, f64)> = None;
        for (idx, field) in schema.fields.iter().enumerate() {
            let distance = std::iter::once(&field.name)
                .chain(field.aliases.iter())
                .map(|name| column_distance(source, name))
                .fold(f64::INFINITY, f64::min);
            match best {
                None => best = Some((idx, distance)),
                Some((best_idx, best_distance)) => {
                    if distance < best_distance {
                        best = Some((idx, distance));
                    } else if distance == best_distance {
                        info!(
                            "Column '{}' is equidistant ({:.3}) from '{}' and '{}'; \
                             keeping '{}' by declaration order",
                            source,
                            distance,
                            schema.fields[best_idx].name,
                            field.name,
                            schema.fields[best_idx].name
                        );
                    }
                }
            }
        }
        let Some((idx, distance)) = best else {
            extras.push(source.clone());
            continue;
        };
        if distance >= threshold {
            warn!(
                "Column '{}' has no canonical field within distance {:.2} \
                 (closest: '{}' at {:.3}); dropping into extras",
                source, threshold, schema.fields[idx].name, distance
            );
            extras.push(source.clone());
            continue;
        }
        let field = &schema.fields[idx];
        claim(&mut claimed, &field.name, source)?;
        debug!(
            "Column '{}' mapped to canonical field '{}' at distance {:.3}",
            source, field.name, distance
        );
        mappings.push(ColumnMapping {
            source: source.clone(),
            canonical: field.name.clone(),
            distance,
        });
    }

    Ok(Reconciliation { mappings, extras })
}

fn claim(
    claimed: &mut BTreeMap<String, String>,
    field: &str,
    source: &str,
) -> Result<(), EngineError> {
    if let Some(previous) = claimed.get(field) {
        return Err(EngineError::SchemaConflict {
            field: field.to_string(),
            candidates: vec![previous.clone(), source.to_string()],
        });
    }
    claimed.insert(field.to_string(), source.to_string());
    Ok(())
}

/// Applies an accepted reconciliation to a raw source table, producing typed
/// rows under canonical names. Cells that fail to parse under the declared
/// type become null (logged); unmapped columns land in each row's extras bag.
pub fn apply(
    reconciliation: &Reconciliation,
    table: &RawTable,
    schema: &SchemaDefinition,
) -> Vec<ReconciledRow> {
    let mapped: Vec<(usize, &ColumnMapping)> = reconciliation
        .mappings
        .iter()
        .filter_map(|m| table.column_index(&m.source).map(|idx| (idx, m)))
        .collect();
    let extra_indices: Vec<(usize, &String)> = reconciliation
        .extras
        .iter()
        .filter_map(|name| table.column_index(name).map(|idx| (idx, name)))
        .collect();

    let mut rows = Vec::with_capacity(table.rows.len());
    for (row_idx, raw_row) in table.rows.iter().enumerate() {
        let mut row = ReconciledRow::default();
        for (col_idx, mapping) in &mapped {
            let Some(field) = schema.field(&mapping.canonical) else {
                continue;
            };
            let cell = raw_row.get(*col_idx).map(String::as_str).unwrap_or("");
            match parse_typed_value(cell, field.field_type) {
                Ok(Some(value)) => {
                    row.fields.insert(mapping.canonical.clone(), value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "Row {}, column '{}': {err:#}; treating as null",
                        row_idx + 1,
                        mapping.source
                    );
                }
            }
        }
        for (col_idx, name) in &extra_indices {
            let cell = raw_row.get(*col_idx).map(String::as_str).unwrap_or("");
            if !cell.is_empty() {
                row.extras.insert((*name).clone(), cell.to_string());
            }
        }
        rows.push(row);
    }
    rows
}
