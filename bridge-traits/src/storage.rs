//! Storage and File System Abstractions
//!
//! Provides platform-agnostic traits for reading the watched harvest
//! directory and for the durable object store that mirrors record images.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Last modification time in Unix milliseconds
    pub modified_at_ms: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts the read side of the harvest directory so the synchronizer can be
/// exercised against temporary directories in tests.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn load(fs: &dyn FileSystemAccess, path: &Path) -> Result<Bytes> {
///     if fs.exists(path).await? {
///         fs.read_file(path).await
///     } else {
///         Ok(Bytes::new())
///     }
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Recursively collect every regular file below `root`, sorted by path.
    async fn walk_files(&self, root: &Path) -> Result<Vec<(PathBuf, FileMetadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = match self.metadata(&entry).await {
                    Ok(metadata) => metadata,
                    // Entry vanished between listing and stat.
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e),
                };
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    files.push((entry, metadata));
                }
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

/// Durable object storage for mirrored images
///
/// Keys are opaque, `/`-separated strings. Every operation must be
/// idempotent: putting an existing key overwrites it and deleting a missing
/// key succeeds.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> Result<()>;

    /// Remove the object stored under `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Public URL under which the object is served to index consumers.
    fn public_url(&self, key: &str) -> String;
}
