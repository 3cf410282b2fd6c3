//! # Record Lifecycle Synchronizer
//!
//! Keeps a search index and an object store consistent with a directory of
//! harvested metadata records.
//!
//! ## Overview
//!
//! This module handles:
//! - Turning filesystem notifications into per-record change events
//! - Publishing records: mirror images, upsert the index document, commit
//! - Removing records: delete the document and objects, then the state entry
//! - Recovering from crashes and missed notifications by reconciliation
//!
//! ## Components
//!
//! - **Records** (`record`): change events, record ids and object keys
//! - **State Store** (`state_store`, `db`): durable record id to artifact set map in SQLite
//! - **Asset Synchronizer** (`asset_sync`): image mirroring and orphan cleanup
//! - **Index Client** (`index_client`): whole-document upsert, idempotent delete
//! - **Sync Coordinator** (`coordinator`): the per-event lifecycle
//! - **Dispatcher** (`dispatcher`): sharded workers with per-record ordering
//! - **Reconciler** (`reconciler`): disk vs. state diff

pub mod asset_sync;
pub mod coordinator;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod index_client;
pub mod reconciler;
pub mod record;
pub mod retry;
pub mod state_store;

pub use asset_sync::{AssetSyncConfig, AssetSynchronizer, ImageFailure, MirroredImage};
pub use coordinator::{ProcessOutcome, SyncConfig, SyncCoordinator, SyncTargets};
pub use db::DatabaseConfig;
pub use dispatcher::{DispatcherConfig, EventProcessor, SyncDispatcher};
pub use error::{Result, SyncError};
pub use index_client::IndexClient;
pub use reconciler::{EventReconciler, ReconcileReport};
pub use record::{ChangeEvent, ChangeKind, EventOrigin, Fingerprint, ObjectKey, RecordId};
pub use state_store::{ArtifactSet, ArtifactStateStore, PublishIntent, SqliteArtifactStateStore};
