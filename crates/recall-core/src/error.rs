//! Core error types for recall-core.
//!
//! The hierarchy follows the failure taxonomy of the synchronization core:
//! missing records, malformed cards, optimistic-concurrency conflicts and
//! partial failures, plus the storage and configuration layers underneath.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for recall-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A referenced card or container does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A record with this id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    /// A card's fields contradict the card invariants.
    #[error("Invariant violation on card {card_id}: {message}")]
    InvariantViolation { card_id: String, message: String },

    /// The card changed since it was read.
    #[error("Write conflict on card {card_id}: expected version {expected}, found {actual}")]
    WriteConflict {
        card_id: String,
        expected: u64,
        actual: u64,
    },

    /// Some units of a multi-unit operation failed.
    #[error("{failed} of {total} units failed")]
    PartialFailure { failed: usize, total: usize },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// The kind of record a [`CoreError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Card,
    Container,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Card => write!(f, "Card"),
            EntityKind::Container => write!(f, "Container"),
        }
    }
}

impl CoreError {
    pub fn card_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind: EntityKind::Card,
            id: id.into(),
        }
    }

    pub fn container_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind: EntityKind::Container,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    pub fn is_write_conflict(&self) -> bool {
        matches!(self, CoreError::WriteConflict { .. })
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be decoded.
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// The data directory could not be resolved or created.
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_kind() {
        let err = CoreError::card_not_found("abc");
        assert_eq!(err.to_string(), "Card not found: abc");
        assert!(err.is_not_found());
    }

    #[test]
    fn busy_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(DatabaseError::from(err), DatabaseError::Locked));
    }
}
