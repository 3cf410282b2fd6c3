//! # Sync Coordinator
//!
//! Drives the index and object store to match one record file.
//!
//! ## Workflow
//!
//! ### Created / Updated
//! 1. Read the file; if it is gone the event is skipped (no resurrection)
//! 2. Parse and transform; a parse failure is reported and the previously
//!    published state is left untouched
//! 3. Compare with the committed [`ArtifactSet`]; an identical document with no
//!    pending images and no outstanding intent is `Unchanged`
//! 4. Record a publish intent covering previous and desired object keys
//! 5. Mirror new images, then upsert the whole index document
//! 6. Remove objects the record no longer references
//! 7. Commit the new artifact set, clearing the intent
//!
//! ### Deleted
//! 1. A delete whose file exists again is processed as an update
//! 2. Look up the artifact set and intent; nothing published means no-op
//! 3. A delete for a path other than the published source path is stale
//! 4. Delete the index document, then every object key
//! 5. Remove the state entry last
//!
//! Every step is idempotent, so replays and duplicated notifications are
//! harmless. State is only committed after the external effects succeed.

use bridge_traits::index::{FieldValue, IndexDocument, SearchIndex};
use bridge_traits::storage::{FileSystemAccess, ObjectStore};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::http::HttpClient;
use core_metadata::{fields, MetadataError, Record, RecordTransformer};
use core_runtime::events::{CoreEvent, EventBus, RecordEvent};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::asset_sync::{AssetSyncConfig, AssetSynchronizer, MirroredImage};
use crate::index_client::IndexClient;
use crate::record::{ChangeEvent, ChangeKind, Fingerprint, ObjectKey, RecordId};
use crate::state_store::{ArtifactSet, ArtifactStateStore, PublishIntent};
use crate::{Result, SyncError};

/// Sync coordinator configuration
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Parse and log only; never touch the index, object store or state
    pub dry_run: bool,

    /// Image download limits and retry policy for index and store calls
    pub assets: AssetSyncConfig,
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Published { images: usize, pending: usize },
    Unchanged,
    Removed,
    Skipped(String),
    /// Dry run: the effects were logged, not applied
    Previewed,
}

/// External collaborators of the coordinator
pub struct SyncTargets {
    pub file_system: Arc<dyn FileSystemAccess>,
    pub state: Arc<dyn ArtifactStateStore>,
    pub http: Arc<dyn HttpClient>,
    pub object_store: Arc<dyn ObjectStore>,
    pub index: Arc<dyn SearchIndex>,
}

/// Record-lifecycle synchronizer
///
/// One instance is shared by all dispatcher workers; per-record ordering is
/// the dispatcher's job.
pub struct SyncCoordinator {
    config: SyncConfig,
    file_system: Arc<dyn FileSystemAccess>,
    transformer: RecordTransformer,
    state: Arc<dyn ArtifactStateStore>,
    assets: AssetSynchronizer,
    index: IndexClient,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SyncCoordinator {
    /// Create a new coordinator
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let coordinator = SyncCoordinator::new(
    ///     SyncConfig::default(),
    ///     RecordTransformer::default(),
    ///     targets,
    ///     event_bus,
    /// );
    /// coordinator.process(ChangeEvent::created(path)).await?;
    /// ```
    pub fn new(
        config: SyncConfig,
        transformer: RecordTransformer,
        targets: SyncTargets,
        event_bus: EventBus,
    ) -> Self {
        let assets = AssetSynchronizer::new(
            targets.http,
            targets.object_store,
            config.assets.clone(),
        );
        let index = IndexClient::new(targets.index, config.assets.retry.clone());

        Self {
            config,
            file_system: targets.file_system,
            transformer,
            state: targets.state,
            assets,
            index,
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for commit timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Process one change event.
    ///
    /// Failures are reported on the event bus and in the log with record id,
    /// operation and cause before being returned.
    ///
    /// # Errors
    ///
    /// - [`SyncError::ParseFailure`] when the file is not a valid record
    /// - [`SyncError::TransientIo`] when retries were exhausted
    /// - [`SyncError::StateStoreCorruption`] when state cannot be trusted
    #[instrument(skip(self, event), fields(kind = %event.kind, path = %event.path.display()))]
    pub async fn process(&self, event: ChangeEvent) -> Result<ProcessOutcome> {
        let id = match event.record_id() {
            Ok(id) => id,
            Err(e) => {
                let error = SyncError::ParseFailure {
                    record_id: event.path.display().to_string(),
                    path: event.path.display().to_string(),
                    reason: e.to_string(),
                };
                self.report_failure(&event.path.display().to_string(), &error);
                return Err(error);
            }
        };

        let result = match event.kind {
            ChangeKind::Created | ChangeKind::Updated => self.publish(&id, &event.path).await,
            ChangeKind::Deleted => self.remove_or_refresh(&id, &event.path).await,
        };

        match result {
            Ok(outcome) => {
                self.report_outcome(&id, &outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.report_failure(id.as_str(), &e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Created / Updated
    // ------------------------------------------------------------------------

    async fn publish(&self, id: &RecordId, path: &Path) -> Result<ProcessOutcome> {
        let Some((bytes, fingerprint)) = self.read_record_file(id, path).await? else {
            return Ok(ProcessOutcome::Skipped("record file no longer exists".to_string()));
        };

        let record = self
            .transformer
            .transform(path, &bytes, fingerprint)
            .await
            .map_err(|e| transform_error(id, path, e))?;

        if self.config.dry_run {
            info!(
                record_id = %id,
                fields = record.fields.len(),
                images = record.image_addresses.len(),
                "Dry run: would publish record"
            );
            return Ok(ProcessOutcome::Previewed);
        }

        let previous = self.state.get(id).await?;
        let intent = self.state.get_intent(id).await?;

        if let Some(previous) = &previous {
            if intent.is_none()
                && previous.content_hash == record.content_hash
                && previous.source_path == record.source_path
                && !previous.has_pending_images()
            {
                if previous.fingerprint != record.fingerprint {
                    // Touched but identical; refresh the fingerprint only.
                    let mut refreshed = previous.clone();
                    refreshed.fingerprint = record.fingerprint;
                    self.state.put(id, &refreshed).await?;
                }
                return Ok(ProcessOutcome::Unchanged);
            }
        }

        let previous_keys = previous
            .as_ref()
            .map(ArtifactSet::key_set)
            .unwrap_or_default();
        let intent_keys: BTreeSet<ObjectKey> = intent
            .map(|i| i.object_keys.into_iter().collect())
            .unwrap_or_default();
        let desired_keys: BTreeSet<ObjectKey> = record
            .image_addresses
            .iter()
            .map(|address| ObjectKey::derive(id, address))
            .collect();

        self.state
            .record_intent(&PublishIntent {
                record_id: id.clone(),
                source_path: record.source_path.clone(),
                object_keys: previous_keys.union(&desired_keys).cloned().collect(),
                created_at: self.clock.unix_timestamp_millis(),
            })
            .await?;

        let upload = self
            .assets
            .upload(id, &record.image_addresses, &previous_keys)
            .await;
        for failure in &upload.failed {
            self.emit(RecordEvent::ImageMirrorFailed {
                record_id: id.to_string(),
                address: failure.address.clone(),
                reason: failure.reason.clone(),
            });
        }

        let document = self.build_document(&record, &upload.published);
        self.index.upsert(id, document).await?;

        let live: BTreeSet<ObjectKey> = upload.keys().into_iter().collect();
        let stale: Vec<ObjectKey> = previous_keys
            .union(&intent_keys)
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();
        let removal = self.assets.remove(id, &stale).await;

        let set = ArtifactSet {
            document_id: id.to_string(),
            object_keys: upload.keys(),
            source_path: record.source_path.clone(),
            fingerprint: record.fingerprint,
            content_hash: record.content_hash.clone(),
            pending_images: upload.failed_addresses(),
            updated_at: self.clock.unix_timestamp_millis(),
        };
        self.state.put(id, &set).await?;

        if !removal.orphaned.is_empty() {
            warn!(
                record_id = %id,
                orphaned = removal.orphaned.len(),
                "Stale objects left behind; keeping them in a publish intent"
            );
            self.state
                .record_intent(&PublishIntent {
                    record_id: id.clone(),
                    source_path: record.source_path.clone(),
                    object_keys: removal.orphaned,
                    created_at: self.clock.unix_timestamp_millis(),
                })
                .await?;
        }

        Ok(ProcessOutcome::Published {
            images: set.object_keys.len(),
            pending: set.pending_images.len(),
        })
    }

    /// Read the file and its fingerprint; `None` if it does not exist.
    ///
    /// Any other read failure is also treated as absence: the reconciler
    /// will see the file again once it is readable.
    async fn read_record_file(
        &self,
        id: &RecordId,
        path: &Path,
    ) -> Result<Option<(bytes::Bytes, Fingerprint)>> {
        let metadata = match self.file_system.metadata(path).await {
            Ok(metadata) if !metadata.is_directory => metadata,
            Ok(_) => return Ok(None),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(record_id = %id, error = %e, "Record file unreadable");
                }
                return Ok(None);
            }
        };

        match self.file_system.read_file(path).await {
            Ok(bytes) => Ok(Some((
                bytes,
                Fingerprint::new(metadata.size, metadata.modified_at_ms),
            ))),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(record_id = %id, error = %e, "Record file unreadable");
                }
                Ok(None)
            }
        }
    }

    fn build_document(&self, record: &Record, images: &[MirroredImage]) -> IndexDocument {
        let mut document = record.fields.clone();
        let urls: Vec<String> = images
            .iter()
            .map(|image| self.assets.public_url(&image.key))
            .collect();

        if let Some(first) = urls.first() {
            document.insert(
                fields::THUMBNAIL_URL.to_string(),
                FieldValue::Text(first.clone()),
            );
            document.insert(fields::IMAGE_URLS.to_string(), FieldValue::List(urls));
        }
        document
    }

    // ------------------------------------------------------------------------
    // Deleted
    // ------------------------------------------------------------------------

    async fn remove_or_refresh(&self, id: &RecordId, path: &Path) -> Result<ProcessOutcome> {
        let exists = self
            .file_system
            .exists(path)
            .await
            .map_err(|e| SyncError::bridge("file check", e))?;
        if exists {
            debug!(record_id = %id, "Deleted file is present again; refreshing");
            return self.publish(id, path).await;
        }

        let previous = self.state.get(id).await?;
        let intent = self.state.get_intent(id).await?;

        if let Some(previous) = &previous {
            if previous.source_path.as_path() != path {
                return Ok(ProcessOutcome::Skipped(format!(
                    "record is published from {}",
                    previous.source_path.display()
                )));
            }
        }
        if previous.is_none() && intent.is_none() {
            return Ok(ProcessOutcome::Skipped("record was never published".to_string()));
        }

        if self.config.dry_run {
            info!(record_id = %id, "Dry run: would remove record");
            return Ok(ProcessOutcome::Previewed);
        }

        self.index.delete(id).await?;

        let mut keys: BTreeSet<ObjectKey> = previous
            .as_ref()
            .map(ArtifactSet::key_set)
            .unwrap_or_default();
        if let Some(intent) = intent {
            keys.extend(intent.object_keys);
        }
        let keys: Vec<ObjectKey> = keys.into_iter().collect();
        let removal = self.assets.remove(id, &keys).await;

        if !removal.orphaned.is_empty() {
            // Keep the entry so the delete is retried.
            return Err(SyncError::Backend {
                operation: "object delete".to_string(),
                message: format!("{} object(s) could not be deleted", removal.orphaned.len()),
            });
        }

        self.state.delete(id).await?;
        Ok(ProcessOutcome::Removed)
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    fn emit(&self, event: RecordEvent) {
        // No subscribers is fine.
        let _ = self.event_bus.emit(CoreEvent::Record(event));
    }

    fn report_outcome(&self, id: &RecordId, outcome: &ProcessOutcome) {
        let record_id = id.to_string();
        match outcome {
            ProcessOutcome::Published { images, pending } => {
                info!(record_id = %id, images, pending, "Record published");
                self.emit(RecordEvent::Published {
                    record_id,
                    images: *images,
                    pending_images: *pending,
                });
            }
            ProcessOutcome::Unchanged => {
                debug!(record_id = %id, "Record unchanged");
                self.emit(RecordEvent::Unchanged { record_id });
            }
            ProcessOutcome::Removed => {
                info!(record_id = %id, "Record removed");
                self.emit(RecordEvent::Removed { record_id });
            }
            ProcessOutcome::Skipped(reason) => {
                debug!(record_id = %id, reason = %reason, "Event skipped");
                self.emit(RecordEvent::Skipped {
                    record_id,
                    reason: reason.clone(),
                });
            }
            ProcessOutcome::Previewed => {}
        }
    }

    fn report_failure(&self, record_id: &str, error: &SyncError) {
        error!(
            record_id,
            operation = error.operation(),
            error = %error,
            "Record processing failed"
        );
        self.emit(RecordEvent::Failed {
            record_id: record_id.to_string(),
            message: error.to_string(),
            transient: error.is_transient(),
        });
    }
}

/// Set listing failures keep their bridge classification so they are
/// retried like any other I/O; everything else is a parse failure.
fn transform_error(id: &RecordId, path: &Path, error: MetadataError) -> SyncError {
    match error {
        MetadataError::SetLookup { source, .. } => SyncError::bridge("set lookup", source),
        other => SyncError::ParseFailure {
            record_id: id.to_string(),
            path: path.display().to_string(),
            reason: other.to_string(),
        },
    }
}
