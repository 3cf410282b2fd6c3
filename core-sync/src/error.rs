use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Retryable I/O failure; retried with backoff before being reported.
    #[error("Transient failure during {operation}: {message}")]
    TransientIo { operation: String, message: String },

    #[error("Failed to parse record {record_id} at {path}: {reason}")]
    ParseFailure {
        record_id: String,
        path: String,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The artifact state store cannot be trusted. Processing must stop.
    #[error("Artifact state store is corrupt: {0}")]
    StateStoreCorruption(String),

    /// Permanent failure reported by the index or object store.
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Classify a bridge failure for the named operation.
    pub fn bridge(operation: &str, error: BridgeError) -> Self {
        if error.is_not_found() {
            SyncError::NotFound(format!("{}: {}", operation, error))
        } else if error.is_transient() {
            SyncError::TransientIo {
                operation: operation.to_string(),
                message: error.to_string(),
            }
        } else {
            SyncError::Backend {
                operation: operation.to_string(),
                message: error.to_string(),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Errors after which no further event may be processed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StateStoreCorruption(_))
    }

    /// Short operation label for reporting.
    pub fn operation(&self) -> &str {
        match self {
            SyncError::TransientIo { operation, .. } | SyncError::Backend { operation, .. } => {
                operation
            }
            SyncError::ParseFailure { .. } => "parse",
            SyncError::NotFound(_) => "lookup",
            SyncError::StateStoreCorruption(_) | SyncError::Database(_) => "state_store",
            SyncError::Config(_) => "config",
            SyncError::Cancelled => "cancel",
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        SyncError::bridge("bridge", error)
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Database(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
