//! Error taxonomy for the reconciliation engine.
//!
//! Every fatal condition the engine can raise is a variant of [`EngineError`],
//! so a CLI wrapper can map failures onto distinct exit codes without parsing
//! messages. Recoverable conditions (unmappable columns, duplicate incoming
//! keys) are not errors: they are logged and reported through result structs.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Two source columns resolved to the same canonical field.
    #[error(
        "schema conflict on canonical field '{field}': source columns {candidates:?} both map to it"
    )]
    SchemaConflict {
        field: String,
        candidates: Vec<String>,
    },
    /// Declared key fields are absent (or null) in the incoming batch.
    #[error("missing key field(s) {keys:?} in incoming rows; merge aborted before any write")]
    MissingKey { keys: Vec<String> },
    /// The underlying table store failed; treated as all-or-nothing per call.
    #[error("store I/O failure on table '{table}': {message}")]
    StoreIo { table: String, message: String },
    /// Cancellation was observed at a stage boundary.
    #[error("run cancelled before stage '{stage}'")]
    Cancelled { stage: String },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SchemaConflict { .. } => ErrorKind::SchemaConflict,
            EngineError::MissingKey { .. } => ErrorKind::MissingKey,
            EngineError::StoreIo { .. } => ErrorKind::StoreIo,
            EngineError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn store_io(table: &str, err: impl std::fmt::Display) -> Self {
        EngineError::StoreIo {
            table: table.to_string(),
            message: err.to_string(),
        }
    }
}

/// Stable discriminant for reporting and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaConflict,
    MissingKey,
    StoreIo,
    Cancelled,
}

impl ErrorKind {
    /// CLI exit code: 1 schema conflict, 2 missing key, 3 store I/O.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::SchemaConflict | ErrorKind::Cancelled => 1,
            ErrorKind::MissingKey => 2,
            ErrorKind::StoreIo => 3,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::SchemaConflict => "schema_conflict",
            ErrorKind::MissingKey => "missing_key",
            ErrorKind::StoreIo => "store_io",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Maps any error chain onto a process exit code, defaulting to 1 for
/// failures outside the engine taxonomy (bad arguments, unreadable schema).
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(engine) => engine.kind().exit_code(),
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        assert_eq!(ErrorKind::SchemaConflict.exit_code(), 1);
        assert_eq!(ErrorKind::MissingKey.exit_code(), 2);
        assert_eq!(ErrorKind::StoreIo.exit_code(), 3);
    }

    #[test]
    fn anyhow_chains_preserve_the_engine_kind() {
        let err = anyhow::Error::new(EngineError::MissingKey {
            keys: vec!["asin".to_string()],
        })
        .context("merging partition 'openers'");
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn foreign_errors_default_to_one() {
        let err = anyhow::anyhow!("unreadable schema file");
        assert_eq!(exit_code_for(&err), 1);
    }
}
