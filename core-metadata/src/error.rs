use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("No Dublin Core <dc> element found")]
    MissingDublinCore,

    #[error("Invalid record path {path}: {reason}")]
    InvalidRecordPath { path: String, reason: String },

    #[error("Invalid harvest settings: {0}")]
    InvalidSettings(String),

    #[error("OAI-PMH repository {base_url} has no set with setSpec '{set_spec}'")]
    UnknownSet { base_url: String, set_spec: String },

    #[error("Failed to list sets from OAI-PMH repository {base_url}: {source}")]
    SetLookup {
        base_url: String,
        source: bridge_traits::error::BridgeError,
    },

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, MetadataError>;
