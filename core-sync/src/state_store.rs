//! # Artifact State Store
//!
//! Durable map from record id to the [`ArtifactSet`] published for it. This
//! is the only persisted state of the synchronizer: an entry exists iff the
//! record's document is in the index and its images are in the object store.
//!
//! ## Publish intents
//!
//! Before a create/update touches the index or object store, the coordinator
//! records a [`PublishIntent`] naming every object key the attempt may write
//! or remove. [`ArtifactStateStore::put`] commits the set and clears the
//! intent in one transaction, and [`ArtifactStateStore::delete`] removes
//! both. An intent that outlives its attempt marks a crash between the first
//! external effect and the commit; the reconciler uses it to find artifacts
//! that have no entry yet.

use crate::db::{create_pool, DatabaseConfig};
use crate::record::{Fingerprint, ObjectKey, RecordId};
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

// ============================================================================
// Types
// ============================================================================

/// Artifacts published for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    /// Index document id; always equal to the record id
    pub document_id: String,
    /// Object-store keys of mirrored images, in image order
    pub object_keys: Vec<ObjectKey>,
    /// File the record was last published from
    pub source_path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Hex SHA-256 of the published file contents
    pub content_hash: String,
    /// Image addresses that failed to mirror and will be re-attempted
    pub pending_images: Vec<String>,
    /// Commit time in Unix milliseconds
    pub updated_at: i64,
}

impl ArtifactSet {
    pub fn key_set(&self) -> BTreeSet<ObjectKey> {
        self.object_keys.iter().cloned().collect()
    }

    pub fn has_pending_images(&self) -> bool {
        !self.pending_images.is_empty()
    }
}

/// Keys a create/update may have written before its commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub record_id: RecordId,
    /// Record file the attempt was made for
    pub source_path: PathBuf,
    pub object_keys: Vec<ObjectKey>,
    pub created_at: i64,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Crash-safe store of published artifact sets
///
/// Every mutation is atomic with respect to crashes.
#[async_trait]
pub trait ArtifactStateStore: Send + Sync {
    async fn get(&self, id: &RecordId) -> Result<Option<ArtifactSet>>;

    /// Commit `set` for `id` and clear any publish intent for it.
    async fn put(&self, id: &RecordId, set: &ArtifactSet) -> Result<()>;

    /// Remove the entry and any publish intent for `id`.
    async fn delete(&self, id: &RecordId) -> Result<()>;

    /// Every committed entry, ordered by record id.
    async fn scan(&self) -> Result<Vec<(RecordId, ArtifactSet)>>;

    /// Record (or widen) the publish intent for `intent.record_id`. Keys are
    /// merged with those of an existing intent.
    async fn record_intent(&self, intent: &PublishIntent) -> Result<()>;

    async fn get_intent(&self, id: &RecordId) -> Result<Option<PublishIntent>>;

    /// Every outstanding publish intent, ordered by record id.
    async fn scan_intents(&self) -> Result<Vec<PublishIntent>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ArtifactStateStore`]
pub struct SqliteArtifactStateStore {
    pool: SqlitePool,
}

impl SqliteArtifactStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database described by `config`.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory()).await
    }

    /// Close the pool, waiting for in-flight statements.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    record_id: String,
    document_id: String,
    object_keys: String,
    source_path: String,
    size_bytes: i64,
    modified_ms: Option<i64>,
    content_hash: String,
    pending_images: String,
    updated_at: i64,
}

impl ArtifactRow {
    fn into_entry(self) -> Result<(RecordId, ArtifactSet)> {
        let row = self;
        if row.document_id != row.record_id {
            return Err(SyncError::StateStoreCorruption(format!(
                "Entry {} points at document {}",
                row.record_id, row.document_id
            )));
        }
        if row.size_bytes < 0 {
            return Err(SyncError::StateStoreCorruption(format!(
                "Entry {} has negative size {}",
                row.record_id, row.size_bytes
            )));
        }

        let object_keys: Vec<String> = decode_json(&row.record_id, "object_keys", &row.object_keys)?;
        let pending_images: Vec<String> =
            decode_json(&row.record_id, "pending_images", &row.pending_images)?;

        let set = ArtifactSet {
            document_id: row.document_id,
            object_keys: object_keys.into_iter().map(ObjectKey::from_stored).collect(),
            source_path: PathBuf::from(row.source_path),
            fingerprint: Fingerprint::new(row.size_bytes as u64, row.modified_ms),
            content_hash: row.content_hash,
            pending_images,
            updated_at: row.updated_at,
        };
        Ok((RecordId::new(row.record_id), set))
    }
}

#[derive(Debug, FromRow)]
struct IntentRow {
    record_id: String,
    source_path: String,
    object_keys: String,
    created_at: i64,
}

impl TryFrom<IntentRow> for PublishIntent {
    type Error = SyncError;

    fn try_from(row: IntentRow) -> Result<Self> {
        let keys: Vec<String> = decode_json(&row.record_id, "intent keys", &row.object_keys)?;
        Ok(PublishIntent {
            record_id: RecordId::new(row.record_id),
            source_path: PathBuf::from(row.source_path),
            object_keys: keys.into_iter().map(ObjectKey::from_stored).collect(),
            created_at: row.created_at,
        })
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(record_id: &str, column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        SyncError::StateStoreCorruption(format!(
            "Undecodable {} for {}: {}",
            column, record_id, e
        ))
    })
}

fn encode_keys(keys: &[ObjectKey]) -> Result<String> {
    serde_json::to_string(keys).map_err(|e| SyncError::Database(e.to_string()))
}

#[async_trait]
impl ArtifactStateStore for SqliteArtifactStateStore {
    async fn get(&self, id: &RecordId) -> Result<Option<ArtifactSet>> {
        let row: Option<ArtifactRow> = sqlx::query_as(
            r#"
            SELECT record_id, document_id, object_keys, source_path, size_bytes,
                   modified_ms, content_hash, pending_images, updated_at
            FROM artifact_sets
            WHERE record_id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.into_entry().map(|(_, set)| set))
            .transpose()
    }

    async fn put(&self, id: &RecordId, set: &ArtifactSet) -> Result<()> {
        if set.document_id != id.as_str() {
            return Err(SyncError::Database(format!(
                "Refusing to store document {} under record {}",
                set.document_id, id
            )));
        }

        let object_keys = encode_keys(&set.object_keys)?;
        let pending_images =
            serde_json::to_string(&set.pending_images).map_err(|e| SyncError::Database(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO artifact_sets (
                record_id, document_id, object_keys, source_path, size_bytes,
                modified_ms, content_hash, pending_images, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(record_id) DO UPDATE SET
                document_id = excluded.document_id,
                object_keys = excluded.object_keys,
                source_path = excluded.source_path,
                size_bytes = excluded.size_bytes,
                modified_ms = excluded.modified_ms,
                content_hash = excluded.content_hash,
                pending_images = excluded.pending_images,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(&set.document_id)
        .bind(object_keys)
        .bind(set.source_path.to_string_lossy().into_owned())
        .bind(set.fingerprint.size_bytes as i64)
        .bind(set.fingerprint.modified_ms)
        .bind(&set.content_hash)
        .bind(pending_images)
        .bind(set.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM publish_intents WHERE record_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(record_id = %id, keys = set.object_keys.len(), "Committed artifact set");
        Ok(())
    }

    async fn delete(&self, id: &RecordId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM artifact_sets WHERE record_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM publish_intents WHERE record_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(record_id = %id, "Removed artifact set");
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(RecordId, ArtifactSet)>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            r#"
            SELECT record_id, document_id, object_keys, source_path, size_bytes,
                   modified_ms, content_hash, pending_images, updated_at
            FROM artifact_sets
            ORDER BY record_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ArtifactRow::into_entry).collect()
    }

    async fn record_intent(&self, intent: &PublishIntent) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<IntentRow> = sqlx::query_as(
            "SELECT record_id, source_path, object_keys, created_at FROM publish_intents WHERE record_id = ?",
        )
        .bind(intent.record_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let mut keys: BTreeSet<ObjectKey> = intent.object_keys.iter().cloned().collect();
        let mut created_at = intent.created_at;
        if let Some(row) = existing {
            let previous = PublishIntent::try_from(row)?;
            keys.extend(previous.object_keys);
            created_at = previous.created_at;
        }
        let keys: Vec<ObjectKey> = keys.into_iter().collect();

        sqlx::query(
            r#"
            INSERT INTO publish_intents (record_id, source_path, object_keys, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(record_id) DO UPDATE SET
                source_path = excluded.source_path,
                object_keys = excluded.object_keys
            "#,
        )
        .bind(intent.record_id.as_str())
        .bind(intent.source_path.to_string_lossy().into_owned())
        .bind(encode_keys(&keys)?)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(record_id = %intent.record_id, keys = keys.len(), "Recorded publish intent");
        Ok(())
    }

    async fn get_intent(&self, id: &RecordId) -> Result<Option<PublishIntent>> {
        let row: Option<IntentRow> = sqlx::query_as(
            "SELECT record_id, source_path, object_keys, created_at FROM publish_intents WHERE record_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PublishIntent::try_from).transpose()
    }

    async fn scan_intents(&self) -> Result<Vec<PublishIntent>> {
        let rows: Vec<IntentRow> = sqlx::query_as(
            "SELECT record_id, source_path, object_keys, created_at FROM publish_intents ORDER BY record_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PublishIntent::try_from).collect()
    }
}
