//! Index client: whole-document upsert and idempotent delete with retries

use bridge_traits::http::RetryPolicy;
use bridge_traits::index::{FieldValue, IndexDocument, SearchIndex};
use core_metadata::fields;
use std::sync::Arc;
use tracing::debug;

use crate::record::RecordId;
use crate::retry::with_backoff;
use crate::{Result, SyncError};

pub struct IndexClient {
    index: Arc<dyn SearchIndex>,
    retry: RetryPolicy,
}

impl IndexClient {
    pub fn new(index: Arc<dyn SearchIndex>, retry: RetryPolicy) -> Self {
        Self { index, retry }
    }

    /// Replace the document for `id`. The document's `id` field is forced to
    /// the record id; a conflicting value is rejected.
    pub async fn upsert(&self, id: &RecordId, mut document: IndexDocument) -> Result<()> {
        if let Some(existing) = document.get(fields::ID).and_then(FieldValue::first) {
            if existing != id.as_str() {
                return Err(SyncError::Backend {
                    operation: "index upsert".to_string(),
                    message: format!("document id '{}' does not match record '{}'", existing, id),
                });
            }
        }
        document.insert(fields::ID.to_string(), FieldValue::Text(id.to_string()));

        let document = &document;
        with_backoff(&self.retry, "index upsert", || async move {
            self.index
                .upsert(id.as_str(), document.clone())
                .await
                .map_err(|e| SyncError::bridge("index upsert", e))
        })
        .await?;

        debug!(record_id = %id, fields = document.len(), "Upserted index document");
        Ok(())
    }

    /// Remove the document for `id`. A missing document is success.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        with_backoff(&self.retry, "index delete", || async move {
            match self.index.delete(id.as_str()).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!(record_id = %id, "Index document already absent");
                    Ok(())
                }
                Err(e) => Err(SyncError::bridge("index delete", e)),
            }
        })
        .await
    }
}
