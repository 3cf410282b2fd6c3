//! Record identity and the transformed record model

use bridge_traits::index::IndexDocument;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MetadataError, Result};

/// Stable record identifier.
///
/// Derived from the record file name: the file stem, percent-decoded.
/// `oai%3Arepo%3A123.xml` becomes `oai:repo:123`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identifier of the record stored at `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let invalid = |reason: &str| MetadataError::InvalidRecordPath {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| invalid("file name is missing or not UTF-8"))?;

        let decoded = urlencoding::decode(stem)
            .map_err(|_| invalid("percent-encoded name does not decode to UTF-8"))?;

        if decoded.trim().is_empty() {
            return Err(invalid("empty record identifier"));
        }

        Ok(Self(decoded.into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id follows the `oai:<repository>:<local>` syntax.
    pub fn is_oai(&self) -> bool {
        self.0.splitn(3, ':').count() == 3 && self.0.starts_with("oai:")
    }

    /// Local part of an OAI identifier, or the whole id otherwise.
    pub fn local_identifier(&self) -> &str {
        if self.is_oai() {
            self.0.splitn(3, ':').nth(2).unwrap_or(&self.0)
        } else {
            &self.0
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cheap change detector for a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size_bytes: u64,
    pub modified_ms: Option<i64>,
}

impl Fingerprint {
    pub fn new(size_bytes: u64, modified_ms: Option<i64>) -> Self {
        Self {
            size_bytes,
            modified_ms,
        }
    }
}

/// A parsed and transformed metadata record.
///
/// `fields` is the complete document for the index; an update replaces it
/// wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub fields: IndexDocument,
    /// Remote image addresses in first-seen order, without duplicates
    pub image_addresses: Vec<String>,
    pub source_path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Hex SHA-256 of the document and image addresses
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_decodes_stem() {
        let id = RecordId::from_path(Path::new("/h/inst/coll/oai%3Arepo%3A123.xml")).unwrap();
        assert_eq!(id.as_str(), "oai:repo:123");
        assert!(id.is_oai());
        assert_eq!(id.local_identifier(), "123");
    }

    #[test]
    fn test_from_path_plain_name() {
        let id = RecordId::from_path(Path::new("coll/record-7.xml")).unwrap();
        assert_eq!(id.as_str(), "record-7");
        assert!(!id.is_oai());
        assert_eq!(id.local_identifier(), "record-7");
    }

    #[test]
    fn test_local_identifier_keeps_colons() {
        let id = RecordId::new("oai:repo:a:b");
        assert_eq!(id.local_identifier(), "a:b");
    }

    #[test]
    fn test_from_path_rejects_empty_and_bad_encoding() {
        assert!(RecordId::from_path(Path::new("/")).is_err());
        assert!(RecordId::from_path(Path::new("/h/%20.xml")).is_err());
        assert!(RecordId::from_path(Path::new("/h/%FF%FE.xml")).is_err());
    }

    #[test]
    fn test_serializes_transparently() {
        let id = RecordId::new("oai:x:1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"oai:x:1\"");
    }
}
