use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),

    #[error("File watcher failed: {0}")]
    Watch(#[source] BridgeError),

    /// Processing stopped because the state store cannot be trusted.
    #[error("Fatal error, refusing to continue: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn is_fatal(&self) -> bool {
        match self {
            ServiceError::Fatal(_) => true,
            ServiceError::Sync(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
