//! Error types for the code-intelligence indexer.
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for indexing operations.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {language} file '{path}': {reason}")]
    ParseError {
        path: PathBuf,
        language: String,
        reason: String,
    },

    #[error("Invalid UTF-8 in source file '{path}'")]
    InvalidUtf8 { path: PathBuf },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Get recovery suggestions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Store(StoreError::Integrity { .. }) => vec![
                "The offending transaction was rolled back; the database is in a consistent state",
                "Re-run the scan; duplicate-path inserts fall through to the update path automatically",
            ],
            Self::Store(StoreError::MigrationFailed { .. }) => vec![
                "The pre-migration backup was restored automatically",
                "Inspect the backup file named '<db>.<version>.backup' before retrying",
            ],
            Self::Store(StoreError::UnknownMigration { .. }) => vec![
                "Only the catalogued v0.2 -> v0.3 -> v0.4 transitions are supported",
                "Run 'cmm-index migrate' with an adjacent version pair",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::Rpc(_) => vec![
                "Language-server unavailability only disables Pass 2; syntactic results are unaffected",
                "Check that the configured language-server command is on PATH",
            ],
            _ => vec![],
        }
    }
}

/// Errors specific to the SQLite-backed store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Integrity violation: {reason}")]
    Integrity { reason: String },

    #[error("Database at '{path}' could not be opened: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Failed to read '{path}' for content hashing: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Backup of '{path}' to '{backup}' failed: {source}")]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown migration transition {from} -> {to}")]
    UnknownMigration { from: String, to: String },

    #[error("Migration failed and was rolled back from backup '{backup}': {reason}")]
    MigrationFailed { backup: PathBuf, reason: String },
}

/// Errors specific to the language-server RPC client.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Failed to spawn language server '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Language server is not available")]
    Unavailable,

    #[error("I/O error communicating with language server: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed response from language server: {0}")]
    MalformedResponse(String),

    #[error("Request issued while client was not in a Ready state")]
    NotReady,
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Helper trait for adding context to errors at a boundary.
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, IndexError>;
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("Error processing '{}': {e}", path.display())))
    }
}
