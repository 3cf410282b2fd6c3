//! File Watching Abstraction
//!
//! Filesystem change notifications as delivered by the host. Notifications may
//! be duplicated, coalesced or reordered across paths; consumers must treat
//! them as hints and re-read the filesystem.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::Result;

/// Kind of change reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: FileChangeKind,
    pub detected_at: DateTime<Utc>,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            detected_at: Utc::now(),
        }
    }
}

/// Signal delivered by a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Change(FileChange),
    /// Events were dropped by the host; the consumer should rescan.
    Rescan,
}

/// Live subscription returned by [`FileWatcher::watch`].
///
/// The queue is bounded; a watcher that cannot enqueue a change sends
/// [`WatchSignal::Rescan`] instead of growing without limit. Dropping the
/// handle stops the underlying watcher.
pub struct WatchHandle {
    pub receiver: mpsc::Receiver<WatchSignal>,
    _guard: Box<dyn Any + Send>,
}

impl WatchHandle {
    pub fn new(receiver: mpsc::Receiver<WatchSignal>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Wait for the next signal; `None` once the watcher has shut down.
    pub async fn recv(&mut self) -> Option<WatchSignal> {
        self.receiver.recv().await
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Recursive directory watcher
pub trait FileWatcher: Send + Sync {
    /// Start watching `root` recursively.
    fn watch(&self, root: &Path) -> Result<WatchHandle>;

    /// Watch a single file, including replacement by rename.
    ///
    /// Only changes to `path` itself are reported.
    fn watch_file(&self, path: &Path) -> Result<WatchHandle>;
}
