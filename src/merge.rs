//! Patch Merger: upserts reconciled rows into a target table by key tuple.
//!
//! Semantics are "source overrides only if present": an incoming null never
//! clobbers a previously known value. The merge is a pure function over row
//! sets; persisting the result is the orchestrator's job, which is what makes
//! the missing-key precondition an abort-before-any-write guarantee.

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::data::Row;
use crate::error::EngineError;
use crate::reconcile::ReconciledRow;

/// Separator for joining key parts into a lookup string; not a legal CSV
/// cell character, so composite keys cannot collide by concatenation.
const KEY_SEPARATOR: char = '\u{1f}';

/// A key tuple that appeared more than once in a single incoming batch.
/// Last write won per field; reported, not fatal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DuplicateKeyConflict {
    pub key: Vec<String>,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MergeResult {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: Vec<DuplicateKeyConflict>,
}

impl MergeResult {
    pub fn absorb(&mut self, other: &MergeResult) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.conflicts.extend(other.conflicts.iter().cloned());
    }
}

fn key_of(row: &Row, key_fields: &[String]) -> Option<(String, Vec<String>)> {
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        parts.push(row.get(field)?.as_display());
    }
    let joined = parts.join(&KEY_SEPARATOR.to_string());
    Some((joined, parts))
}

/// Merges `incoming` into `existing`, returning the new row set alongside a
/// [`MergeResult`]. Existing row order is preserved; new keys append in
/// first-seen order. Fails with [`EngineError::MissingKey`] before producing
/// any output when a key field is absent or null in any incoming row.
pub fn merge(
    existing: &[Row],
    incoming: &[ReconciledRow],
    key_fields: &[String],
) -> Result<(Vec<Row>, MergeResult), EngineError> {
    let mut missing: Vec<String> = Vec::new();
    for row in incoming {
        for field in key_fields {
            if !row.fields.contains_key(field) && !missing.contains(field) {
                missing.push(field.clone());
            }
        }
    }
    if !missing.is_empty() {
        return Err(EngineError::MissingKey { keys: missing });
    }

    let mut rows: Vec<Row> = Vec::with_capacity(existing.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(existing.len());
    for row in existing {
        match key_of(row, key_fields) {
            Some((key, parts)) => {
                if index.contains_key(&key) {
                    warn!(
                        "Target already holds a duplicate row for key {:?}; keeping the first",
                        parts
                    );
                    continue;
                }
                index.insert(key, rows.len());
                rows.push(row.clone());
            }
            None => {
                // A keyless target row cannot be addressed by any merge;
                // retained untouched.
                warn!("Target row without a complete key tuple retained as-is");
                rows.push(row.clone());
            }
        }
    }

    // Per distinct key: whether it was new this batch, and (for existing
    // keys) the row content before the first patch. Updated vs unchanged is
    // decided by comparing against the final content, so a batch that ends up
    // rewriting the same values reports unchanged.
    let mut batch_state: HashMap<String, (bool, Option<Row>)> = HashMap::new();
    let mut occurrences: HashMap<String, (Vec<String>, usize)> = HashMap::new();
    let mut key_order: Vec<String> = Vec::new();

    for row in incoming {
        let (key, parts) =
            key_of(&row.fields, key_fields).expect("precondition: key fields present");
        let entry = occurrences.entry(key.clone()).or_insert_with(|| {
            key_order.push(key.clone());
            (parts, 0)
        });
        entry.1 += 1;

        match index.get(&key) {
            Some(&pos) => {
                batch_state
                    .entry(key)
                    .or_insert_with(|| (false, Some(rows[pos].clone())));
                let target = &mut rows[pos];
                for (field, value) in &row.fields {
                    if key_fields.contains(field) {
                        continue;
                    }
                    target.insert(field.clone(), value.clone());
                }
            }
            None => {
                index.insert(key.clone(), rows.len());
                rows.push(row.fields.clone());
                batch_state.insert(key, (true, None));
            }
        }
    }

    let mut result = MergeResult::default();
    for key in &key_order {
        let (is_new, before) = &batch_state[key];
        if *is_new {
            result.inserted += 1;
        } else {
            let changed = match before {
                Some(before) => index.get(key).is_some_and(|&pos| &rows[pos] != before),
                None => false,
            };
            if changed {
                result.updated += 1;
            } else {
                result.unchanged += 1;
            }
        }
        let (parts, count) = &occurrences[key];
        if *count > 1 {
            debug!(
                "Key {:?} appeared {} times in one batch; last write wins per field",
                parts, count
            );
            result.conflicts.push(DuplicateKeyConflict {
                key: parts.clone(),
                occurrences: *count,
            });
        }
    }
    debug!(
        "Merge complete: {} inserted, {} updated, {} unchanged, {} conflict(s)",
        result.inserted,
        result.updated,
        result.unchanged,
        result.conflicts.len()
    );
    Ok((rows, result))
}
