//! # Sharded Event Dispatcher
//!
//! Routes change events to a fixed set of worker tasks. Each worker owns a
//! bounded queue and processes its events strictly in arrival order; the
//! shard is chosen by hashing the record id, so all events for one record
//! land on the same worker while different records proceed concurrently.
//!
//! ## Back-pressure
//!
//! [`SyncDispatcher::dispatch`] waits for queue capacity, so a burst of
//! notifications slows intake instead of growing memory.
//!
//! ## Shutdown
//!
//! [`SyncDispatcher::shutdown`] closes every queue and waits for the workers
//! to finish what is already queued. Each event runs to its commit point.
//!
//! ## Fatal errors
//!
//! A [`SyncError::is_fatal`] failure stops every worker; queued events are
//! dropped and later dispatches fail. The reconciler recovers the dropped
//! work on the next start.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordinator::{ProcessOutcome, SyncCoordinator};
use crate::record::ChangeEvent;
use crate::{Result, SyncError};

/// Anything that can process a change event.
#[async_trait]
pub trait EventProcessor: Send + Sync + 'static {
    async fn process(&self, event: ChangeEvent) -> Result<ProcessOutcome>;
}

#[async_trait]
impl EventProcessor for SyncCoordinator {
    async fn process(&self, event: ChangeEvent) -> Result<ProcessOutcome> {
        SyncCoordinator::process(self, event).await
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Counters shared by the workers
#[derive(Debug, Default)]
pub struct DispatcherStats {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl DispatcherStats {
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct SyncDispatcher {
    senders: Vec<mpsc::Sender<ChangeEvent>>,
    workers: Vec<JoinHandle<()>>,
    fatal: Arc<watch::Sender<Option<String>>>,
    stats: Arc<DispatcherStats>,
}

impl SyncDispatcher {
    /// Spawn the workers on the current tokio runtime.
    pub fn spawn<P: EventProcessor>(processor: Arc<P>, config: DispatcherConfig) -> Self {
        let worker_count = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let (fatal, _) = watch::channel(None);
        let fatal = Arc::new(fatal);
        let stats = Arc::new(DispatcherStats::default());

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for shard in 0..worker_count {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                shard,
                processor.clone(),
                rx,
                fatal.clone(),
                stats.clone(),
            )));
        }

        info!(workers = worker_count, queue_capacity = capacity, "Dispatcher started");
        Self {
            senders,
            workers,
            fatal,
            stats,
        }
    }

    /// Shard responsible for `event`.
    pub fn shard_for(&self, event: &ChangeEvent) -> usize {
        let mut hasher = DefaultHasher::new();
        match event.record_id() {
            Ok(id) => id.hash(&mut hasher),
            // Unparseable paths still reach a worker so the failure is reported.
            Err(_) => event.path.hash(&mut hasher),
        }
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue `event`, waiting for capacity on its shard.
    ///
    /// # Errors
    ///
    /// Returns the fatal error once a worker has hit one, or
    /// [`SyncError::Cancelled`] if the shard's worker is gone.
    pub async fn dispatch(&self, event: ChangeEvent) -> Result<()> {
        if let Some(message) = self.fatal_error() {
            return Err(SyncError::StateStoreCorruption(message));
        }
        let shard = self.shard_for(&event);
        self.senders[shard]
            .send(event)
            .await
            .map_err(|_| SyncError::Cancelled)
    }

    /// Message of the fatal error that stopped the workers, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.borrow().clone()
    }

    /// Receiver that changes when a fatal error occurs.
    pub fn fatal_signal(&self) -> watch::Receiver<Option<String>> {
        self.fatal.subscribe()
    }

    pub fn stats(&self) -> Arc<DispatcherStats> {
        self.stats.clone()
    }

    /// Close the queues and wait for the workers to drain them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StateStoreCorruption`] if a worker stopped on a
    /// fatal error.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            senders,
            workers,
            fatal,
            stats,
        } = self;
        drop(senders);

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }

        info!(
            processed = stats.processed(),
            failed = stats.failed(),
            "Dispatcher drained"
        );
        let fatal = fatal.borrow().clone();
        match fatal {
            Some(message) => Err(SyncError::StateStoreCorruption(message)),
            None => Ok(()),
        }
    }
}

async fn run_worker<P: EventProcessor>(
    shard: usize,
    processor: Arc<P>,
    mut queue: mpsc::Receiver<ChangeEvent>,
    fatal: Arc<watch::Sender<Option<String>>>,
    stats: Arc<DispatcherStats>,
) {
    debug!(shard, "Worker started");

    while let Some(event) = queue.recv().await {
        if fatal.borrow().is_some() {
            break;
        }

        match processor.process(event).await {
            Ok(_) => {
                stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_fatal() => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(shard, error = %e, "Fatal error; stopping all workers");
                fatal.send_replace(Some(e.to_string()));
                break;
            }
            Err(_) => {
                // Already reported by the processor.
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    debug!(shard, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records (record id, kind) in processing order.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        corrupt_on: Option<String>,
    }

    #[async_trait]
    impl EventProcessor for Recorder {
        async fn process(&self, event: ChangeEvent) -> Result<ProcessOutcome> {
            let id = event.record_id().map(|id| id.to_string()).unwrap_or_default();
            // Interleave workers.
            tokio::time::sleep(Duration::from_millis(1)).await;
            if self.corrupt_on.as_deref() == Some(id.as_str()) {
                return Err(SyncError::StateStoreCorruption("bad row".to_string()));
            }
            self.seen.lock().unwrap().push((id, event.kind.to_string()));
            Ok(ProcessOutcome::Unchanged)
        }
    }

    #[tokio::test]
    async fn test_per_record_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = SyncDispatcher::spawn(
            recorder.clone(),
            DispatcherConfig {
                workers: 3,
                queue_capacity: 2,
            },
        );

        for round in 0..5 {
            for id in ["a", "b", "c", "d"] {
                let path = format!("/h/i/c/{}.xml", id);
                let event = if round % 2 == 0 {
                    ChangeEvent::updated(path)
                } else {
                    ChangeEvent::deleted(path)
                };
                dispatcher.dispatch(event).await.unwrap();
            }
        }
        let stats = dispatcher.stats();
        dispatcher.shutdown().await.unwrap();

        assert_eq!(stats.processed(), 20);
        let seen = recorder.seen.lock().unwrap();
        for id in ["a", "b", "c", "d"] {
            let kinds: Vec<&str> = seen
                .iter()
                .filter(|(seen_id, _)| seen_id == id)
                .map(|(_, kind)| kind.as_str())
                .collect();
            assert_eq!(kinds, vec!["updated", "deleted", "updated", "deleted", "updated"]);
        }
    }

    #[tokio::test]
    async fn test_same_record_always_same_shard() {
        let dispatcher = SyncDispatcher::spawn(Arc::new(Recorder::default()), DispatcherConfig::default());
        let a = dispatcher.shard_for(&ChangeEvent::created("/x/y/rec.xml"));
        let b = dispatcher.shard_for(&ChangeEvent::deleted("/other/dir/rec.xml"));
        assert_eq!(a, b);
        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_stops_dispatching() {
        let recorder = Arc::new(Recorder {
            corrupt_on: Some("bad".to_string()),
            ..Recorder::default()
        });
        let dispatcher = SyncDispatcher::spawn(recorder, DispatcherConfig::default());
        let mut signal = dispatcher.fatal_signal();

        dispatcher.dispatch(ChangeEvent::updated("/h/i/c/bad.xml")).await.unwrap();
        signal.changed().await.unwrap();

        assert!(dispatcher.fatal_error().is_some());
        let error = dispatcher
            .dispatch(ChangeEvent::updated("/h/i/c/good.xml"))
            .await
            .unwrap_err();
        assert!(error.is_fatal());
        assert!(dispatcher.shutdown().await.unwrap_err().is_fatal());
    }
}
