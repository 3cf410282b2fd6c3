//! Search Index Abstraction
//!
//! A document is a flat map of field names to a single string or a list of
//! strings. The index is keyed by document id and every upsert replaces the
//! whole document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Field value of an index document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// All values of the field in order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Text(value) => vec![value.as_str()],
            FieldValue::List(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// First value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            FieldValue::List(values) => values.first().map(String::as_str),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        FieldValue::List(values)
    }
}

/// Field map sent to the index
pub type IndexDocument = BTreeMap<String, FieldValue>;

/// Search index trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::index::{IndexDocument, SearchIndex};
///
/// async fn publish(index: &dyn SearchIndex, doc: IndexDocument) -> Result<()> {
///     index.upsert("oai:repo:1", doc).await
/// }
/// ```
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Replace (or create) the document with the given id.
    async fn upsert(&self, id: &str, document: IndexDocument) -> Result<()>;

    /// Remove the document with the given id. Implementations may return
    /// `BridgeError::NotFound` when the id was never indexed.
    async fn delete(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_serializes_untagged() {
        let mut doc = IndexDocument::new();
        doc.insert("id".to_string(), "oai:x:1".into());
        doc.insert(
            "title_keyword".to_string(),
            vec!["A".to_string(), "B".to_string()].into(),
        );

        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"id":"oai:x:1","title_keyword":["A","B"]}"#);
    }

    #[test]
    fn test_field_value_accessors() {
        let list = FieldValue::List(vec!["a".into(), "b".into()]);
        assert_eq!(list.first(), Some("a"));
        assert_eq!(list.values(), vec!["a", "b"]);
        assert_eq!(FieldValue::List(vec![]).first(), None);
    }
}
