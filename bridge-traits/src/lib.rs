//! # Host Bridge Traits
//!
//! Boundary traits between the record synchronizer and the outside world.
//!
//! ## Overview
//!
//! The core never talks to the filesystem, the network, the search index or
//! the object store directly. Each capability is a trait defined here and
//! implemented by `bridge-desktop` (native adapters) or `provider-*` crates,
//! so the lifecycle logic can be tested against in-memory fakes.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Read access to the harvest directory
//! - [`FileWatcher`](watch::FileWatcher) - Recursive change notifications
//!
//! ### Publication targets
//! - [`SearchIndex`](index::SearchIndex) - Upsert/delete documents by id
//! - [`ObjectStore`](storage::ObjectStore) - Put/delete/exists for mirrored images
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to an external pipeline
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should report retryable failures as `Transient` and missing resources as
//! `NotFound`; callers rely on that classification for retry and idempotence.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! synchronizer's worker tasks.

pub mod error;
pub mod http;
pub mod index;
pub mod storage;
pub mod time;
pub mod watch;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use index::{FieldValue, IndexDocument, SearchIndex};
pub use storage::{FileMetadata, FileSystemAccess, ObjectStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use watch::{FileChange, FileChangeKind, FileWatcher, WatchHandle, WatchSignal};
