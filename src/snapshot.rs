//! Snapshot Manager: immutable, timestamped copies taken before mutation.
//!
//! Snapshots are append-only table versions named
//! `<table>__snap_<timestamp>`; this engine never deletes or rewrites one.
//! Retention is an external concern.

use chrono::Utc;
use log::{debug, info};

use crate::error::EngineError;
use crate::store::{TableStore, WriteMode};

pub const SNAPSHOT_INFIX: &str = "__snap_";

/// Creates and lists snapshots through a [`TableStore`].
pub struct SnapshotManager<'a> {
    store: &'a dyn TableStore,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        Self { store }
    }

    /// Copies `table_name` to an immutable snapshot, returning the snapshot
    /// id. Returns `Ok(None)` when the table does not yet exist: the pending
    /// merge is then a first write and there is no prior state to preserve.
    ///
    /// The caller must hold the table's write serialization for the whole
    /// snapshot-then-merge pair so the copy reflects state strictly prior to
    /// the pending mutation.
    pub fn snapshot(&self, table_name: &str) -> Result<Option<String>, EngineError> {
        if !self.store.table_exists(table_name)? {
            debug!("Table '{table_name}' does not exist; snapshot skipped for first write");
            return Ok(None);
        }
        let table = self.store.read_table(table_name)?;
        let name = self.free_snapshot_name(table_name)?;
        self.store.write_table(&name, &table, WriteMode::Create)?;
        info!(
            "Snapshot '{}' captured for table '{}' ({} rows)",
            name,
            table_name,
            table.row_count()
        );
        Ok(Some(name))
    }

    /// Snapshot names for `table_name`, oldest first (the timestamp format
    /// sorts lexicographically).
    pub fn list_snapshots(&self, table_name: &str) -> Result<Vec<String>, EngineError> {
        let prefix = format!("{table_name}{SNAPSHOT_INFIX}");
        self.store.list_tables(&prefix)
    }

    fn free_snapshot_name(&self, table_name: &str) -> Result<String, EngineError> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let base = format!("{table_name}{SNAPSHOT_INFIX}{stamp}");
        if !self.store.table_exists(&base)? {
            return Ok(base);
        }
        // Same-millisecond collision: disambiguate with a counter suffix.
        for counter in 2.. {
            let candidate = format!("{base}_{counter}");
            if !self.store.table_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        unreachable!("counter space exhausted");
    }
}
