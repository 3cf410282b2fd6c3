//! Harvester settings lookup
//!
//! The harvester keeps one entry per scheduled harvest. Entries are keyed by
//! the last two components of the harvest directory
//! (`<institution>/<collection>`), which is also where the record files land.

use bridge_traits::storage::FileSystemAccess;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::{MetadataError, Result};

/// Settings of one scheduled harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestEntry {
    pub repository_name: String,
    pub base_url: String,
    #[serde(default)]
    pub set_spec: String,
    /// Human-readable set name, when known
    #[serde(default)]
    pub set_name: Option<String>,
}

impl HarvestEntry {
    /// Display name of the collection: the set name, else the set spec.
    pub fn collection_name(&self) -> Option<&str> {
        self.set_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.set_spec.as_str()).filter(|s| !s.is_empty()))
    }
}

/// All harvest entries, keyed by `<institution>/<collection>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSettings {
    entries: HashMap<String, HarvestEntry>,
}

impl HarvestSettings {
    /// Parse the JSON settings file. Keys may be full harvest directory
    /// paths; only their last two components are kept.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: HashMap<String, HarvestEntry> = serde_json::from_slice(bytes)
            .map_err(|e| MetadataError::InvalidSettings(e.to_string()))?;

        let entries = raw
            .into_iter()
            .map(|(key, entry)| (settings_key(Path::new(&key)), entry))
            .collect();
        Ok(Self { entries })
    }

    /// Read and parse the settings file through the filesystem bridge.
    pub async fn load(fs: &dyn FileSystemAccess, path: &Path) -> Result<Self> {
        let bytes = fs.read_file(path).await?;
        let settings = Self::from_json(&bytes)?;
        debug!(path = ?path, entries = settings.len(), "Loaded harvest settings");
        Ok(settings)
    }

    /// Entry for the harvest directory containing `collection_dir`.
    pub fn get(&self, collection_dir: &Path) -> Option<&HarvestEntry> {
        self.entries.get(&settings_key(collection_dir))
    }

    pub fn insert(&mut self, key: impl AsRef<Path>, entry: HarvestEntry) {
        self.entries.insert(settings_key(key.as_ref()), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `<parent name>/<name>` of a directory path.
fn settings_key(path: &Path) -> String {
    let name = |p: Option<&Path>| {
        p.and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    format!("{}/{}", name(path.parent()), name(Some(path)))
}

/// Shared, reloadable view of the harvest settings.
#[derive(Debug, Clone, Default)]
pub struct SharedHarvestSettings {
    inner: Arc<RwLock<HarvestSettings>>,
}

impl SharedHarvestSettings {
    pub fn new(settings: HarvestSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Swap in a freshly loaded settings table.
    pub fn replace(&self, settings: HarvestSettings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    /// Reload from `path` and return the number of entries; on failure the
    /// current table is kept.
    pub async fn reload(&self, fs: &dyn FileSystemAccess, path: &Path) -> Result<usize> {
        match HarvestSettings::load(fs, path).await {
            Ok(settings) => {
                let entries = settings.len();
                self.replace(settings);
                Ok(entries)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Keeping previous harvest settings");
                Err(e)
            }
        }
    }

    /// Clone of the entry for `collection_dir`.
    pub fn lookup(&self, collection_dir: &Path) -> Option<HarvestEntry> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(collection_dir).cloned()
    }
}
