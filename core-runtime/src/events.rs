//! # Event Bus System
//!
//! Broadcasts typed lifecycle events from the sync pipeline to any number of
//! observers (status reporters, tests, audit sinks) using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`RecordEvent`], [`ReconcileEvent`] and [`ServiceEvent`]
//!   wrapped in [`CoreEvent`]
//! - **EventBus**: central broadcast channel
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! Publishing never blocks and never fails the pipeline: with no subscribers
//! the event is dropped.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, RecordEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Record(RecordEvent::Removed {
//!     record_id: "oai:repo:1".to_string(),
//! }))
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Record removed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and may keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-record outcomes
    Record(RecordEvent),
    /// Full-tree reconciliation passes
    Reconcile(ReconcileEvent),
    /// Service lifecycle
    Service(ServiceEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Record(e) => e.description(),
            CoreEvent::Reconcile(e) => e.description(),
            CoreEvent::Service(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Record(RecordEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Record(RecordEvent::ImageMirrorFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Record(RecordEvent::Skipped { .. }) => EventSeverity::Warning,
            CoreEvent::Record(RecordEvent::Published { .. })
            | CoreEvent::Record(RecordEvent::Removed { .. }) => EventSeverity::Info,
            CoreEvent::Reconcile(ReconcileEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Service(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Record id carried by the event, if any.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Record(e) => Some(e.record_id()),
            _ => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Record Events
// ============================================================================

/// Outcome of processing one change event for a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RecordEvent {
    /// Index document and images are live and the artifact set committed.
    Published {
        record_id: String,
        /// Number of mirrored images
        images: usize,
        /// Images that could not be mirrored this time
        pending_images: usize,
    },
    /// Content was identical to the last committed state; nothing to do.
    Unchanged { record_id: String },
    /// Record was deleted from the index, store and state.
    Removed { record_id: String },
    /// Processing failed; the previous published state is untouched.
    Failed {
        record_id: String,
        message: String,
        /// Whether a later retry or reconcile may succeed
        transient: bool,
    },
    /// One remote image could not be fetched.
    ImageMirrorFailed {
        record_id: String,
        address: String,
        reason: String,
    },
    /// Event ignored (file vanished, stale delete for a moved record).
    Skipped { record_id: String, reason: String },
}

impl RecordEvent {
    fn description(&self) -> &str {
        match self {
            RecordEvent::Published { .. } => "Record published",
            RecordEvent::Unchanged { .. } => "Record unchanged",
            RecordEvent::Removed { .. } => "Record removed",
            RecordEvent::Failed { .. } => "Record processing failed",
            RecordEvent::ImageMirrorFailed { .. } => "Image mirroring failed",
            RecordEvent::Skipped { .. } => "Change event skipped",
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            RecordEvent::Published { record_id, .. }
            | RecordEvent::Unchanged { record_id }
            | RecordEvent::Removed { record_id }
            | RecordEvent::Failed { record_id, .. }
            | RecordEvent::ImageMirrorFailed { record_id, .. }
            | RecordEvent::Skipped { record_id, .. } => record_id,
        }
    }
}

// ============================================================================
// Reconcile Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReconcileEvent {
    Started {
        /// `startup`, `rescan`, `interval` or `once`
        trigger: String,
    },
    Completed {
        /// Record files seen on disk
        scanned: usize,
        /// Change events synthesized
        changes: usize,
        duration_ms: u64,
    },
}

impl ReconcileEvent {
    fn description(&self) -> &str {
        match self {
            ReconcileEvent::Started { .. } => "Reconciliation started",
            ReconcileEvent::Completed { .. } => "Reconciliation completed",
        }
    }
}

// ============================================================================
// Service Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ServiceEvent {
    Started { root: String, dry_run: bool },
    Stopping { reason: String },
    Stopped,
    SettingsReloaded { path: String, entries: usize },
}

impl ServiceEvent {
    fn description(&self) -> &str {
        match self {
            ServiceEvent::Started { .. } => "Indexer started",
            ServiceEvent::Stopping { .. } => "Indexer stopping",
            ServiceEvent::Stopped => "Indexer stopped",
            ServiceEvent::SettingsReloaded { .. } => "Harvest settings reloaded",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning the bus clones the sender; all clones publish to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Creates a filtered stream over a new subscription.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventSeverity};
///
/// let bus = EventBus::new(16);
/// let errors = bus
///     .stream()
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
