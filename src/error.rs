use thiserror::Error;

/// Every failure mode the engine's public API can surface.
///
/// Each variant carries the offending table/column/index name where one
/// exists, per the error-handling policy: callers should never have to
/// re-derive "which table" from a bare string message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine is not connected")]
    NotConnected,

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("table already exists: {table}")]
    TableAlreadyExists { table: String },

    #[error("table is not writable: {table}")]
    NotWritable { table: String },

    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("type mismatch: {context}")]
    TypeMismatch { context: String },

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("unique constraint violated on index {index} for key {key}")]
    UniqueViolation { index: String, key: String },

    #[error("index not found: {index}")]
    IndexNotFound { index: String },

    #[error("failed to create index {index}: {reason}")]
    IndexCreationFailed { index: String, reason: String },

    #[error("failed to drop index {index}: {reason}")]
    IndexDropFailed { index: String, reason: String },

    #[error("generated column validation failed for {table}.{column}: {reason}")]
    GeneratedColumnValidation {
        table: String,
        column: String,
        reason: String,
    },

    #[error("spill I/O error: {reason}")]
    SpillIo { reason: String },

    #[error("codec corrupt: {reason}")]
    CodecCorrupt { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::SpillIo {
            reason: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
