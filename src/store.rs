//! Table store collaborators.
//!
//! The engine is agnostic to storage technology: everything flows through the
//! [`TableStore`] trait. Two implementations ship with the crate: a
//! directory-of-CSV-files store for the CLI, and an in-memory store used by
//! tests and embedders. Store failures surface as
//! [`EngineError::StoreIo`](crate::error::EngineError) so the caller can treat
//! each call as all-or-nothing.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use csv::QuoteStyle;
use log::debug;

use crate::error::EngineError;

/// Rows with their original column names; no typing applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Write disposition for [`TableStore::write_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the table already exists (snapshots are append-only).
    Create,
    /// Replace the table contents atomically per call.
    Overwrite,
}

pub trait TableStore: Send + Sync {
    fn read_table(&self, name: &str) -> Result<RawTable, EngineError>;
    fn write_table(&self, name: &str, table: &RawTable, mode: WriteMode)
    -> Result<(), EngineError>;
    fn table_exists(&self, name: &str) -> Result<bool, EngineError>;
    /// Lists table names starting with `prefix`, sorted ascending.
    fn list_tables(&self, prefix: &str) -> Result<Vec<String>, EngineError>;
}

/// Stores each table as `<name>.csv` under a root directory.
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self, name: &str) -> Result<PathBuf, EngineError> {
        validate_table_name(name)?;
        Ok(self.root.join(format!("{name}.csv")))
    }
}

fn validate_table_name(name: &str) -> Result<(), EngineError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::store_io(
            name,
            "table names may only contain alphanumerics, '_' and '-'",
        ))
    }
}

impl TableStore for CsvStore {
    fn read_table(&self, name: &str) -> Result<RawTable, EngineError> {
        let path = self.table_path(name)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .double_quote(true)
            .flexible(false)
            .from_path(&path)
            .map_err(|err| EngineError::store_io(name, err))?;
        let columns = reader
            .headers()
            .map_err(|err| EngineError::store_io(name, err))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| EngineError::store_io(name, err))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        debug!("Read table '{name}' ({} rows) from {path:?}", rows.len());
        Ok(RawTable { columns, rows })
    }

    fn write_table(
        &self,
        name: &str,
        table: &RawTable,
        mode: WriteMode,
    ) -> Result<(), EngineError> {
        let path = self.table_path(name)?;
        if mode == WriteMode::Create && path.exists() {
            return Err(EngineError::store_io(name, "table already exists"));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| EngineError::store_io(name, err))?;
        }
        // Write to a sibling temp file and rename so readers never observe a
        // partially written table.
        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = csv::WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_path(&tmp_path)
            .map_err(|err| EngineError::store_io(name, err))?;
        writer
            .write_record(&table.columns)
            .map_err(|err| EngineError::store_io(name, err))?;
        for row in &table.rows {
            writer
                .write_record(row)
                .map_err(|err| EngineError::store_io(name, err))?;
        }
        writer
            .flush()
            .map_err(|err| EngineError::store_io(name, err))?;
        drop(writer);
        fs::rename(&tmp_path, &path).map_err(|err| EngineError::store_io(name, err))?;
        debug!("Wrote table '{name}' ({} rows) to {path:?}", table.rows.len());
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.table_path(name)?.exists())
    }

    fn list_tables(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(EngineError::store_io(prefix, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| EngineError::store_io(prefix, err))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && stem.starts_with(prefix)
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests and embedding; interior mutability behind an
/// `RwLock` so the orchestrator's worker threads can share one instance.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, RawTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, table: RawTable) -> Self {
        self.tables
            .write()
            .expect("store lock")
            .insert(name.to_string(), table);
        self
    }
}

impl TableStore for MemoryStore {
    fn read_table(&self, name: &str) -> Result<RawTable, EngineError> {
        self.tables
            .read()
            .expect("store lock")
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::store_io(name, "table not found"))
    }

    fn write_table(
        &self,
        name: &str,
        table: &RawTable,
        mode: WriteMode,
    ) -> Result<(), EngineError> {
        validate_table_name(name)?;
        let mut tables = self.tables.write().expect("store lock");
        if mode == WriteMode::Create && tables.contains_key(name) {
            return Err(EngineError::store_io(name, "table already exists"));
        }
        tables.insert(name.to_string(), table.clone());
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.tables.read().expect("store lock").contains_key(name))
    }

    fn list_tables(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        Ok(self
            .tables
            .read()
            .expect("store lock")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
