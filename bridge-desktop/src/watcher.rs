//! Recursive directory watching on top of `notify`

use bridge_traits::{
    error::{BridgeError, Result},
    watch::{FileChange, FileChangeKind, FileWatcher, WatchHandle, WatchSignal},
};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default number of signals buffered per watch handle.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Native watcher backed by the platform's recommended `notify` backend
/// (inotify, FSEvents, ReadDirectoryChangesW).
#[derive(Debug, Clone)]
pub struct NotifyWatcher {
    queue_capacity: usize,
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn start(
        &self,
        target: &Path,
        mode: RecursiveMode,
        only: Option<PathBuf>,
    ) -> Result<WatchHandle> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut forwarder = SignalForwarder::new(tx);

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for signal in translate_event(&event) {
                        if let (Some(only), WatchSignal::Change(change)) = (&only, &signal) {
                            if &change.path != only {
                                continue;
                            }
                        }
                        if !forwarder.forward(signal) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "File watcher reported an error; requesting rescan");
                    forwarder.forward(WatchSignal::Rescan);
                }
            },
            Config::default(),
        )
        .map_err(map_notify_error)?;

        watcher.watch(target, mode).map_err(map_notify_error)?;

        debug!(path = ?target, recursive = matches!(mode, RecursiveMode::Recursive), "Watching");
        Ok(WatchHandle::new(rx, Box::new(watcher)))
    }
}

/// Pushes signals into the bounded watch queue from the notify thread.
///
/// When the queue is full the change is dropped and a single
/// [`WatchSignal::Rescan`] is queued in its place, waiting for room. Further
/// drops are covered by that rescan until a later change is accepted again.
pub(crate) struct SignalForwarder {
    tx: mpsc::Sender<WatchSignal>,
    rescan_queued: bool,
}

impl SignalForwarder {
    pub(crate) fn new(tx: mpsc::Sender<WatchSignal>) -> Self {
        Self {
            tx,
            rescan_queued: false,
        }
    }

    /// Returns `false` once the receiver is gone.
    pub(crate) fn forward(&mut self, signal: WatchSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => {
                self.rescan_queued = false;
                true
            }
            Err(TrySendError::Full(_)) => {
                if self.rescan_queued {
                    return true;
                }
                warn!("Watch queue full; dropping changes and requesting rescan");
                // Runs on the notify thread, outside the async runtime.
                if self.tx.blocking_send(WatchSignal::Rescan).is_err() {
                    return false;
                }
                self.rescan_queued = true;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Watch receiver dropped; discarding event");
                false
            }
        }
    }
}

fn map_notify_error(error: notify::Error) -> BridgeError {
    BridgeError::NotAvailable(format!("File watcher unavailable: {}", error))
}

fn change(path: &Path, kind: FileChangeKind) -> WatchSignal {
    WatchSignal::Change(FileChange::new(path, kind))
}

/// Translate one `notify` event into zero or more watch signals.
///
/// Directory creation and removal become [`WatchSignal::Rescan`] because the
/// files below them are not reported individually on every platform.
pub(crate) fn translate_event(event: &Event) -> Vec<WatchSignal> {
    if event.need_rescan() {
        return vec![WatchSignal::Rescan];
    }

    let each = |kind: FileChangeKind| -> Vec<WatchSignal> {
        event.paths.iter().map(|p| change(p, kind)).collect()
    };

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => vec![WatchSignal::Rescan],
        EventKind::Create(_) => each(FileChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(FileChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(FileChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                change(from, FileChangeKind::Removed),
                change(to, FileChangeKind::Created),
            ],
            _ => vec![WatchSignal::Rescan],
        },
        // Backends that cannot tell the two halves of a rename apart.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    change(p, FileChangeKind::Created)
                } else {
                    change(p, FileChangeKind::Removed)
                }
            })
            .collect(),
        EventKind::Modify(_) => each(FileChangeKind::Modified),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => each(FileChangeKind::Modified),
        EventKind::Remove(RemoveKind::Folder) => vec![WatchSignal::Rescan],
        EventKind::Remove(_) => each(FileChangeKind::Removed),
        _ => Vec::new(),
    }
}

impl FileWatcher for NotifyWatcher {
    fn watch(&self, root: &Path) -> Result<WatchHandle> {
        self.start(root, RecursiveMode::Recursive, None)
    }

    /// Watches the parent directory so a file replaced by rename is still
    /// seen.
    fn watch_file(&self, path: &Path) -> Result<WatchHandle> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.start(parent, RecursiveMode::NonRecursive, Some(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, Flag};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn kinds(signals: &[WatchSignal]) -> Vec<(PathBuf, FileChangeKind)> {
        signals
            .iter()
            .filter_map(|s| match s {
                WatchSignal::Change(c) => Some((c.path.clone(), c.kind)),
                WatchSignal::Rescan => None,
            })
            .collect()
    }

    #[test]
    fn test_translate_create_modify_remove() {
        let path = PathBuf::from("/h/inst/coll/a.xml");

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(
            kinds(&translate_event(&created)),
            vec![(path.clone(), FileChangeKind::Created)]
        );

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert_eq!(
            kinds(&translate_event(&modified)),
            vec![(path.clone(), FileChangeKind::Modified)]
        );

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(
            kinds(&translate_event(&removed)),
            vec![(path, FileChangeKind::Removed)]
        );
    }

    #[test]
    fn test_translate_rename_both() {
        let from = PathBuf::from("/h/a.xml");
        let to = PathBuf::from("/h/b.xml");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());

        assert_eq!(
            kinds(&translate_event(&event)),
            vec![(from, FileChangeKind::Removed), (to, FileChangeKind::Created)]
        );
    }

    #[test]
    fn test_translate_rescan_cases() {
        let flagged = Event::new(EventKind::Any).set_flag(Flag::Rescan);
        assert_eq!(translate_event(&flagged), vec![WatchSignal::Rescan]);

        let folder = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(PathBuf::from("/h/inst"));
        assert_eq!(translate_event(&folder), vec![WatchSignal::Rescan]);

        let access = Event::new(EventKind::Access(AccessKind::Read)).add_path(PathBuf::from("/h/a.xml"));
        assert!(translate_event(&access).is_empty());
    }

    #[test]
    fn test_full_queue_turns_into_one_rescan() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut forwarder = SignalForwarder::new(tx);
        let a = change(Path::new("/h/a.xml"), FileChangeKind::Created);
        let b = change(Path::new("/h/b.xml"), FileChangeKind::Created);
        assert!(forwarder.forward(a.clone()));
        assert!(forwarder.forward(b.clone()));

        // The third change finds the queue full and waits for room to queue a
        // rescan, so drain one slot from another thread.
        let producer = std::thread::spawn(move || {
            assert!(forwarder.forward(change(Path::new("/h/c.xml"), FileChangeKind::Created)));
            assert!(forwarder.forward(change(Path::new("/h/d.xml"), FileChangeKind::Created)));
            forwarder
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(rx.blocking_recv(), Some(a));
        let mut forwarder = producer.join().unwrap();

        assert_eq!(rx.blocking_recv(), Some(b));
        assert_eq!(rx.blocking_recv(), Some(WatchSignal::Rescan));
        assert!(rx.try_recv().is_err());

        // Room again: changes flow normally.
        let e = change(Path::new("/h/e.xml"), FileChangeKind::Modified);
        assert!(forwarder.forward(e.clone()));
        assert_eq!(rx.blocking_recv(), Some(e));

        drop(rx);
        assert!(!forwarder.forward(WatchSignal::Rescan));
    }

    #[tokio::test]
    async fn test_watch_file_ignores_siblings() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("harvests.json");
        std::fs::write(&settings, b"{}").unwrap();
        let mut handle = NotifyWatcher::new().watch_file(&settings).unwrap();

        std::fs::write(dir.path().join("other.json"), b"{}").unwrap();
        std::fs::write(&settings, b"{\"a/b\": null}").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match handle.recv().await {
                    Some(WatchSignal::Change(c)) => break Some(c.path),
                    Some(WatchSignal::Rescan) => continue,
                    None => break None,
                }
            }
        })
        .await
        .expect("watcher produced no event");

        assert_eq!(seen, Some(settings));
    }

    #[tokio::test]
    async fn test_watch_reports_new_file() {
        let dir = TempDir::new().unwrap();
        let mut handle = NotifyWatcher::new().watch(dir.path()).unwrap();

        let file = dir.path().join("record.xml");
        std::fs::write(&file, b"<dc/>").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match handle.recv().await {
                    Some(WatchSignal::Change(c)) if c.path.ends_with("record.xml") => break Some(c),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .expect("watcher produced no event");

        assert!(signal.is_some());
    }
}
