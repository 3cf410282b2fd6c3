//! # Indexer Configuration
//!
//! Configuration for the harvest indexer, loaded from a TOML file or
//! assembled with [`IndexerConfig::builder`].
//!
//! ## File format
//!
//! ```toml
//! dry_run = false
//!
//! [watch]
//! root = "/srv/harvest"
//! record_extensions = ["xml"]
//! reconcile_interval_secs = 300
//!
//! [state]
//! database_path = "/var/lib/harvest-indexer/state.db"
//!
//! [index]
//! base_url = "http://localhost:8983/solr/prl"
//! commit_within_ms = 1000
//!
//! [object_store]
//! kind = "local"
//! root = "/srv/thumbnails"
//! public_base_url = "https://thumbs.example.org"
//!
//! [images]
//! max_per_record = 8
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! max_delay_ms = 10000
//!
//! [workers]
//! count = 4
//! queue_capacity = 256
//!
//! [metadata]
//! harvest_settings_path = "/srv/harvest/settings.json"
//! ```
//!
//! ## Validation
//!
//! Both entry points run [`IndexerConfig::validate`], which fails fast with
//! an actionable message naming the offending key.
//!
//! ```
//! use core_runtime::config::IndexerConfig;
//!
//! let err = IndexerConfig::builder()
//!     .database_path("/tmp/state.db")
//!     .build()
//!     .unwrap_err();
//! assert!(err.to_string().contains("watch_root"));
//! ```

use crate::error::{Error, Result};
use bridge_traits::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const REDACTED: &str = "[REDACTED]";

/// Complete indexer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    pub watch: WatchConfig,
    pub state: StateConfig,
    pub index: IndexConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Parse and report without touching the index, object store or state
    #[serde(default)]
    pub dry_run: bool,
}

/// Watched harvest directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub root: PathBuf,
    /// File extensions (without dot) treated as records
    #[serde(default = "default_record_extensions")]
    pub record_extensions: Vec<String>,
    /// Seconds between periodic reconciliations; 0 disables the timer
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

/// Artifact state database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub database_path: PathBuf,
}

/// Search index endpoint
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Core URL, e.g. `http://localhost:8983/solr/prl`
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_commit_within_ms")]
    pub commit_within_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| REDACTED))
            .field("commit_within_ms", &self.commit_within_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Object store backend
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// Directory tree served at `public_base_url`
    Local {
        root: PathBuf,
        public_base_url: String,
    },
    /// REST endpoint accepting PUT/DELETE/HEAD on `<base_url>/<key>`
    Http {
        base_url: String,
        public_base_url: String,
        #[serde(default)]
        auth_token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl ObjectStoreConfig {
    pub fn public_base_url(&self) -> &str {
        match self {
            ObjectStoreConfig::Local {
                public_base_url, ..
            }
            | ObjectStoreConfig::Http {
                public_base_url, ..
            } => public_base_url,
        }
    }
}

impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreConfig::Local {
                root,
                public_base_url,
            } => f
                .debug_struct("Local")
                .field("root", root)
                .field("public_base_url", public_base_url)
                .finish(),
            ObjectStoreConfig::Http {
                base_url,
                public_base_url,
                auth_token,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("public_base_url", public_base_url)
                .field("auth_token", &auth_token.as_ref().map(|_| REDACTED))
                .field("timeout_secs", timeout_secs)
                .finish(),
        }
    }
}

/// Image mirroring limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImageConfig {
    pub max_per_record: usize,
    pub fetch_timeout_secs: u64,
    pub max_bytes: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_per_record: 8,
            fetch_timeout_secs: 30,
            max_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Backoff for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            use_exponential_backoff: true,
        }
    }
}

/// Sharded worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_capacity: 256,
        }
    }
}

/// Metadata enrichment sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetadataConfig {
    /// JSON file mapping `institution/collection` to harvest settings
    pub harvest_settings_path: Option<PathBuf>,
}

fn default_record_extensions() -> Vec<String> {
    vec!["xml".to_string()]
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_commit_within_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl IndexerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Periodic reconciliation interval, `None` when disabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        match self.watch.reconcile_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.watch.root.as_os_str().is_empty() {
            return Err(Error::Config(
                "watch.root must not be empty. Point it at the harvest directory.".to_string(),
            ));
        }

        if self.watch.record_extensions.is_empty()
            || self
                .watch
                .record_extensions
                .iter()
                .any(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(Error::Config(
                "watch.record_extensions must list extensions without a leading dot, e.g. [\"xml\"]"
                    .to_string(),
            ));
        }

        if self.state.database_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "state.database_path must not be empty".to_string(),
            ));
        }

        if !is_http_url(&self.index.base_url) {
            return Err(Error::Config(format!(
                "index.base_url must be an http(s) URL, got '{}'",
                self.index.base_url
            )));
        }

        match &self.object_store {
            ObjectStoreConfig::Local { root, .. } if root.as_os_str().is_empty() => {
                return Err(Error::Config(
                    "object_store.root must not be empty for kind = \"local\"".to_string(),
                ));
            }
            ObjectStoreConfig::Http { base_url, .. } if !is_http_url(base_url) => {
                return Err(Error::Config(format!(
                    "object_store.base_url must be an http(s) URL, got '{}'",
                    base_url
                )));
            }
            _ => {}
        }

        if !is_http_url(self.object_store.public_base_url()) {
            return Err(Error::Config(format!(
                "object_store.public_base_url must be an http(s) URL, got '{}'",
                self.object_store.public_base_url()
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(format!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self.workers.count == 0 || self.workers.count > 256 {
            return Err(Error::Config(format!(
                "workers.count must be between 1 and 256, got {}",
                self.workers.count
            )));
        }

        if self.workers.queue_capacity == 0 {
            return Err(Error::Config(
                "workers.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`IndexerConfig`].
#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    watch_root: Option<PathBuf>,
    record_extensions: Option<Vec<String>>,
    reconcile_interval_secs: Option<u64>,
    database_path: Option<PathBuf>,
    index_url: Option<String>,
    index_auth_token: Option<String>,
    commit_within_ms: Option<u64>,
    object_store: Option<ObjectStoreConfig>,
    images: Option<ImageConfig>,
    retry: Option<RetryConfig>,
    workers: Option<WorkerConfig>,
    harvest_settings_path: Option<PathBuf>,
    dry_run: bool,
}

impl IndexerConfigBuilder {
    pub fn watch_root(mut self, path: impl AsRef<Path>) -> Self {
        self.watch_root = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn record_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn reconcile_interval_secs(mut self, secs: u64) -> Self {
        self.reconcile_interval_secs = Some(secs);
        self
    }

    pub fn database_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = Some(url.into());
        self
    }

    pub fn index_auth_token(mut self, token: impl Into<String>) -> Self {
        self.index_auth_token = Some(token.into());
        self
    }

    pub fn commit_within_ms(mut self, ms: u64) -> Self {
        self.commit_within_ms = Some(ms);
        self
    }

    pub fn object_store(mut self, object_store: ObjectStoreConfig) -> Self {
        self.object_store = Some(object_store);
        self
    }

    pub fn images(mut self, images: ImageConfig) -> Self {
        self.images = Some(images);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn workers(mut self, count: usize, queue_capacity: usize) -> Self {
        self.workers = Some(WorkerConfig {
            count,
            queue_capacity,
        });
        self
    }

    pub fn harvest_settings_path(mut self, path: impl AsRef<Path>) -> Self {
        self.harvest_settings_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builds the configuration, validating required settings.
    pub fn build(self) -> Result<IndexerConfig> {
        let root = self.watch_root.ok_or_else(|| {
            Error::Config("watch_root is required. Use .watch_root() to set it.".to_string())
        })?;
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("database_path is required. Use .database_path() to set it.".to_string())
        })?;
        let base_url = self.index_url.ok_or_else(|| {
            Error::Config("index_url is required. Use .index_url() to set it.".to_string())
        })?;
        let object_store = self.object_store.ok_or_else(|| {
            Error::Config(
                "object_store is required. Use .object_store() to set it.".to_string(),
            )
        })?;

        let config = IndexerConfig {
            watch: WatchConfig {
                root,
                record_extensions: self
                    .record_extensions
                    .unwrap_or_else(default_record_extensions),
                reconcile_interval_secs: self
                    .reconcile_interval_secs
                    .unwrap_or_else(default_reconcile_interval_secs),
            },
            state: StateConfig { database_path },
            index: IndexConfig {
                base_url,
                auth_token: self.index_auth_token,
                commit_within_ms: self
                    .commit_within_ms
                    .unwrap_or_else(default_commit_within_ms),
                timeout_secs: default_timeout_secs(),
            },
            object_store,
            images: self.images.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            workers: self.workers.unwrap_or_default(),
            metadata: MetadataConfig {
                harvest_settings_path: self.harvest_settings_path,
            },
            dry_run: self.dry_run,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [watch]
        root = "/srv/harvest"

        [state]
        database_path = "/var/lib/indexer/state.db"

        [index]
        base_url = "http://localhost:8983/solr/prl"

        [object_store]
        kind = "local"
        root = "/srv/thumbs"
        public_base_url = "https://thumbs.example.org"
    "#;

    fn local_store() -> ObjectStoreConfig {
        ObjectStoreConfig::Local {
            root: PathBuf::from("/srv/thumbs"),
            public_base_url: "https://thumbs.example.org".to_string(),
        }
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = IndexerConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.watch.root, PathBuf::from("/srv/harvest"));
        assert_eq!(config.watch.record_extensions, vec!["xml".to_string()]);
        assert_eq!(config.reconcile_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.index.commit_within_ms, 1000);
        assert_eq!(config.images, ImageConfig::default());
        assert_eq!(config.workers.count, 4);
        assert!(!config.dry_run);
        assert_eq!(config.object_store.public_base_url(), "https://thumbs.example.org");
    }

    #[test]
    fn test_http_object_store_section() {
        let source = MINIMAL.replace(
            "kind = \"local\"\n        root = \"/srv/thumbs\"",
            "kind = \"http\"\n        base_url = \"https://store.example.org/bucket\"\n        auth_token = \"abc\"",
        );
        let config = IndexerConfig::from_toml_str(&source).unwrap();

        match &config.object_store {
            ObjectStoreConfig::Http {
                base_url,
                auth_token,
                timeout_secs,
                ..
            } => {
                assert_eq!(base_url, "https://store.example.org/bucket");
                assert_eq!(auth_token.as_deref(), Some("abc"));
                assert_eq!(*timeout_secs, 30);
            }
            other => panic!("unexpected store {:?}", other),
        }
        assert!(!format!("{:?}", config).contains("abc"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let source = MINIMAL.replace("[watch]", "bogus = 1\n[watch]");
        assert!(IndexerConfig::from_toml_str(&source).is_err());
    }

    #[test]
    fn test_zero_interval_disables_timer() {
        let config = IndexerConfig::builder()
            .watch_root("/h")
            .database_path("/s.db")
            .index_url("http://solr/prl")
            .object_store(local_store())
            .reconcile_interval_secs(0)
            .build()
            .unwrap();
        assert_eq!(config.reconcile_interval(), None);
    }

    #[test]
    fn test_builder_requires_fields() {
        let err = IndexerConfig::builder()
            .watch_root("/h")
            .database_path("/s.db")
            .object_store(local_store())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("index_url"));

        let err = IndexerConfig::builder()
            .watch_root("/h")
            .database_path("/s.db")
            .index_url("http://solr/prl")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("object_store"));
    }

    #[test]
    fn test_validation_failures() {
        let base = || {
            IndexerConfig::builder()
                .watch_root("/h")
                .database_path("/s.db")
                .index_url("http://solr/prl")
                .object_store(local_store())
        };

        assert!(base().index_url("solr:8983").build().is_err());
        assert!(base().workers(0, 10).build().is_err());
        assert!(base().workers(2, 0).build().is_err());
        assert!(base().record_extensions([".xml"]).build().is_err());
        assert!(base()
            .retry(RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            })
            .build()
            .is_err());
        assert!(base()
            .retry(RetryConfig {
                max_attempts: 3,
                base_delay_ms: 5000,
                max_delay_ms: 100,
            })
            .build()
            .is_err());
        assert!(base()
            .object_store(ObjectStoreConfig::Local {
                root: PathBuf::from("/t"),
                public_base_url: "thumbs.example.org".to_string(),
            })
            .build()
            .is_err());
    }

    #[test]
    fn test_retry_policy_conversion() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = IndexerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigFile { .. }));
    }
}
