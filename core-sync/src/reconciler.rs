//! # Event Reconciler
//!
//! Diffs the watched directory against the artifact state store and
//! synthesizes the change events that notifications missed: while the
//! process was down, when the watcher overflowed, or when a previous attempt
//! failed part-way.
//!
//! | On disk | State | Event |
//! |---------|-------|-------|
//! | yes | no entry | `Created` |
//! | yes | entry, fingerprint differs / pending images / intent | `Updated` |
//! | no | entry | `Deleted` (published source path) |
//! | no | intent only | `Deleted` (intent source path) |
//!
//! The events go through the same coordinator path as watcher events.

use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::record::{ChangeEvent, Fingerprint, RecordId};
use crate::state_store::ArtifactStateStore;
use crate::{Result, SyncError};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Record files found on disk
    pub scanned: usize,
    /// Synthesized events, ordered by path
    pub events: Vec<ChangeEvent>,
    pub duration_ms: u64,
}

pub struct EventReconciler {
    file_system: Arc<dyn FileSystemAccess>,
    state: Arc<dyn ArtifactStateStore>,
    root: PathBuf,
    record_extensions: Vec<String>,
}

impl EventReconciler {
    pub fn new(
        file_system: Arc<dyn FileSystemAccess>,
        state: Arc<dyn ArtifactStateStore>,
        root: impl Into<PathBuf>,
        record_extensions: Vec<String>,
    ) -> Self {
        Self {
            file_system,
            state,
            root: root.into(),
            record_extensions: record_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` names a record file (by extension; hidden files excluded).
    pub fn is_record_path(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.record_extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }

    /// Compute the events that bring the published state in line with disk.
    ///
    /// # Errors
    ///
    /// Fails if the root cannot be walked or the state store cannot be read.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started = Instant::now();

        let on_disk = self.scan_disk().await?;
        let published: BTreeMap<RecordId, _> = self.state.scan().await?.into_iter().collect();
        let intents = self.state.scan_intents().await?;
        let with_intent: BTreeSet<RecordId> =
            intents.iter().map(|i| i.record_id.clone()).collect();

        let mut events = Vec::new();

        for (id, files) in &on_disk {
            match published.get(id) {
                None => {
                    let (path, _) = &files[0];
                    events.push(ChangeEvent::created(path.clone()).from_reconciler());
                }
                Some(set) => {
                    let current = files.iter().find(|(path, _)| *path == set.source_path);
                    let (path, needs_update) = match current {
                        Some((path, metadata)) => (
                            path,
                            fingerprint_of(metadata) != set.fingerprint
                                || set.has_pending_images()
                                || with_intent.contains(id),
                        ),
                        // Published from a path that is gone; the record moved.
                        None => (&files[0].0, true),
                    };
                    if needs_update {
                        events.push(ChangeEvent::updated(path.clone()).from_reconciler());
                    }
                }
            }
        }

        for (id, set) in &published {
            if !on_disk.contains_key(id) {
                events.push(ChangeEvent::deleted(set.source_path.clone()).from_reconciler());
            }
        }

        for intent in &intents {
            if !on_disk.contains_key(&intent.record_id) && !published.contains_key(&intent.record_id) {
                debug!(record_id = %intent.record_id, "Dangling publish intent");
                events.push(ChangeEvent::deleted(intent.source_path.clone()).from_reconciler());
            }
        }

        events.sort_by(|a, b| a.path.cmp(&b.path));

        let report = ReconcileReport {
            scanned: on_disk.values().map(Vec::len).sum(),
            events,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            root = %self.root.display(),
            scanned = report.scanned,
            published = published.len(),
            changes = report.events.len(),
            duration_ms = report.duration_ms,
            "Reconciliation diff computed"
        );
        Ok(report)
    }

    /// Record files under the root grouped by id, in path order.
    async fn scan_disk(&self) -> Result<BTreeMap<RecordId, Vec<(PathBuf, FileMetadata)>>> {
        let files = self
            .file_system
            .walk_files(&self.root)
            .await
            .map_err(|e| SyncError::bridge("directory scan", e))?;

        let mut by_id: BTreeMap<RecordId, Vec<(PathBuf, FileMetadata)>> = BTreeMap::new();
        for (path, metadata) in files {
            if !self.is_record_path(&path) {
                continue;
            }
            match RecordId::from_path(&path) {
                Ok(id) => by_id.entry(id).or_default().push((path, metadata)),
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring record file"),
            }
        }

        for (id, files) in &by_id {
            if files.len() > 1 {
                warn!(record_id = %id, copies = files.len(), "Record id appears at several paths");
            }
        }
        Ok(by_id)
    }
}

fn fingerprint_of(metadata: &FileMetadata) -> Fingerprint {
    Fingerprint::new(metadata.size, metadata.modified_at_ms)
}
