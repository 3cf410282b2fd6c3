//! Error types for the Solr provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Solr provider errors
#[derive(Error, Debug)]
pub enum SolrError {
    /// Solr rejected the request (bad field, malformed document, missing core)
    #[error("Solr API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Solr is overloaded or temporarily down
    #[error("Solr unavailable (status {status_code}): {message}")]
    Unavailable { status_code: u16, message: String },

    /// Document could not be sent as-is
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Failed to parse API response
    #[error("Failed to parse Solr response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Solr operations
pub type Result<T> = std::result::Result<T, SolrError>;

impl From<SolrError> for BridgeError {
    fn from(error: SolrError) -> Self {
        match error {
            SolrError::Unavailable { .. } => BridgeError::Transient(error.to_string()),
            SolrError::ApiError { .. }
            | SolrError::InvalidDocument(_)
            | SolrError::ParseError(_) => BridgeError::OperationFailed(error.to_string()),
            SolrError::BridgeError(e) => e,
        }
    }
}
