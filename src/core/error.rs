use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// Missing statement mapping, invalid configuration or an uninitialised schema.
    /// Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An update touched a row count other than one.
    #[error(
        "Optimistic lock conflict: {entity_type}[{id}] was updated by another transaction concurrently ({affected_rows} rows affected)"
    )]
    OptimisticLockConflict {
        entity_type: String,
        id: String,
        affected_rows: u64,
    },

    #[error("Schema version mismatch: library version is '{expected}', database version is '{found}'")]
    SchemaMismatch { expected: String, found: String },

    /// Failure reported by the backing store (connectivity, I/O, ...).
    #[error("Store error: {0}")]
    Store(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Unknown statement '{0}'")]
    UnknownStatement(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    pub fn is_optimistic_lock_conflict(&self) -> bool {
        matches!(self, Self::OptimisticLockConflict { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

