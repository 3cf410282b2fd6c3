//! # Asset Synchronizer
//!
//! Mirrors the images referenced by a record into the object store under
//! deterministic [`ObjectKey`]s and removes objects a record no longer
//! references.
//!
//! Uploads and removals are independent per image: one failing image never
//! blocks the others. Failed uploads are reported back so the caller can
//! keep them as pending images, and failed removals are reported as orphans.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bridge_traits::storage::ObjectStore;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::record::{ObjectKey, RecordId};
use crate::retry::with_backoff;
use crate::{Result, SyncError};

/// Limits applied to image downloads
#[derive(Debug, Clone)]
pub struct AssetSyncConfig {
    pub max_bytes: u64,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AssetSyncConfig {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// An image that is live in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredImage {
    pub key: ObjectKey,
    pub address: String,
}

/// An image that could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub address: String,
    pub reason: String,
    pub transient: bool,
}

/// Result of [`AssetSynchronizer::upload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Live images in desired order, including ones that were already present
    pub published: Vec<MirroredImage>,
    /// Keys written by this call
    pub uploaded: Vec<ObjectKey>,
    pub failed: Vec<ImageFailure>,
}

impl UploadOutcome {
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.published.iter().map(|image| image.key.clone()).collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failed_addresses(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.address.clone()).collect()
    }
}

/// Result of [`AssetSynchronizer::remove`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub removed: Vec<ObjectKey>,
    /// Keys that are still in the store after retries
    pub orphaned: Vec<ObjectKey>,
}

/// Image mirror between remote addresses and the object store
pub struct AssetSynchronizer {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn ObjectStore>,
    config: AssetSyncConfig,
}

impl AssetSynchronizer {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn ObjectStore>,
        config: AssetSyncConfig,
    ) -> Self {
        Self {
            http,
            store,
            config,
        }
    }

    /// Public URL of a mirrored object.
    pub fn public_url(&self, key: &ObjectKey) -> String {
        self.store.public_url(key.as_str())
    }

    /// Make every desired image live.
    ///
    /// Keys in `existing` are assumed live and are not re-uploaded.
    /// Addresses mapping to the same key are mirrored once.
    pub async fn upload(
        &self,
        id: &RecordId,
        desired: &[String],
        existing: &BTreeSet<ObjectKey>,
    ) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();
        let mut seen = BTreeSet::new();

        for address in desired {
            let key = ObjectKey::derive(id, address);
            if !seen.insert(key.clone()) {
                continue;
            }

            if existing.contains(&key) {
                outcome.published.push(MirroredImage {
                    key,
                    address: address.clone(),
                });
                continue;
            }

            match self.mirror(&key, address).await {
                Ok(()) => {
                    debug!(record_id = %id, object_key = %key, "Mirrored image");
                    outcome.uploaded.push(key.clone());
                    outcome.published.push(MirroredImage {
                        key,
                        address: address.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        record_id = %id,
                        address = %address,
                        operation = e.operation(),
                        error = %e,
                        "Image could not be mirrored"
                    );
                    outcome.failed.push(ImageFailure {
                        address: address.clone(),
                        reason: e.to_string(),
                        transient: e.is_transient(),
                    });
                }
            }
        }

        if !outcome.uploaded.is_empty() || outcome.is_partial() {
            info!(
                record_id = %id,
                uploaded = outcome.uploaded.len(),
                failed = outcome.failed.len(),
                "Image upload finished"
            );
        }
        outcome
    }

    /// Delete `keys` from the object store. Missing objects count as removed.
    pub async fn remove(&self, id: &RecordId, keys: &[ObjectKey]) -> RemovalOutcome {
        let mut outcome = RemovalOutcome::default();

        for key in keys {
            let result = with_backoff(&self.config.retry, "object delete", || async move {
                match self.store.delete(key.as_str()).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(SyncError::bridge("object delete", e)),
                }
            })
            .await;

            match result {
                Ok(()) => outcome.removed.push(key.clone()),
                Err(e) => {
                    warn!(
                        record_id = %id,
                        object_key = %key,
                        error = %e,
                        "Failed to delete object"
                    );
                    outcome.orphaned.push(key.clone());
                }
            }
        }

        if !outcome.removed.is_empty() {
            debug!(record_id = %id, removed = outcome.removed.len(), "Removed objects");
        }
        outcome
    }

    async fn mirror(&self, key: &ObjectKey, address: &str) -> Result<()> {
        let (body, content_type) = with_backoff(&self.config.retry, "image fetch", || async move {
            self.fetch(address).await
        })
        .await?;

        let content_type = content_type.or_else(|| key.content_type());
        with_backoff(&self.config.retry, "object put", || {
            let body = body.clone();
            let content_type = content_type.as_deref();
            async move {
                self.store
                    .put(key.as_str(), body, content_type)
                    .await
                    .map_err(|e| SyncError::bridge("object put", e))
            }
        })
        .await
    }

    /// Download one image, returning its bytes and the served content type.
    async fn fetch(&self, address: &str) -> Result<(Bytes, Option<String>)> {
        let request = HttpRequest::new(HttpMethod::Get, address)
            .timeout(self.config.fetch_timeout)
            .max_response_bytes(self.config.max_bytes);
        let response = self
            .http
            .execute(request)
            .await
            .and_then(|response| response.error_for_status("image fetch"))
            .map_err(|e| SyncError::bridge("image fetch", e))?;

        if response.body.len() as u64 > self.config.max_bytes {
            return Err(SyncError::Backend {
                operation: "image fetch".to_string(),
                message: format!(
                    "{} is {} bytes, limit is {}",
                    address,
                    response.body.len(),
                    self.config.max_bytes
                ),
            });
        }

        let content_type = response
            .header("Content-Type")
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| value.starts_with("image/"));
        Ok((response.body, content_type))
    }
}
