//! Indexer service façade and bootstrap helpers.
//!
//! This crate wires bridge implementations (HTTP, filesystem, file watcher,
//! object store, search index, state store) into the synchronizer core and
//! runs the watch / reconcile loop. Native builds enable the `desktop-shims`
//! feature (the default), which provides [`bootstrap_desktop`] on top of
//! `bridge-desktop` and `provider-solr`.

pub mod error;
mod service;

pub use error::{Result, ServiceError};
pub use service::{IndexerService, OnceReport};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    index::SearchIndex,
    storage::{FileSystemAccess, ObjectStore},
    watch::FileWatcher,
};
use core_sync::ArtifactStateStore;

/// Aggregated handle to every bridge the service requires.
pub struct ServiceDependencies {
    pub file_system: Arc<dyn FileSystemAccess>,
    pub http_client: Arc<dyn HttpClient>,
    pub object_store: Arc<dyn ObjectStore>,
    pub index: Arc<dyn SearchIndex>,
    pub state: Arc<dyn ArtifactStateStore>,
    pub watcher: Arc<dyn FileWatcher>,
}

#[cfg(feature = "desktop-shims")]
mod desktop {
    use super::*;
    use bridge_desktop::{
        HttpObjectStore, LocalObjectStore, NotifyWatcher, ReqwestHttpClient, TokioFileSystem,
    };
    use core_runtime::config::{IndexerConfig, ObjectStoreConfig};
    use core_runtime::EventBus;
    use core_sync::{DatabaseConfig, SqliteArtifactStateStore};
    use provider_solr::SolrIndex;
    use std::time::Duration;
    use tracing::info;

    /// Build the native bridge set described by `config`.
    pub async fn desktop_dependencies(config: &IndexerConfig) -> Result<ServiceDependencies> {
        let http_client: Arc<dyn HttpClient> = Arc::new(
            ReqwestHttpClient::with_timeout(Duration::from_secs(config.index.timeout_secs))
                .map_err(|e| ServiceError::InitializationFailed(e.to_string()))?,
        );

        let object_store: Arc<dyn ObjectStore> = match &config.object_store {
            ObjectStoreConfig::Local {
                root,
                public_base_url,
            } => Arc::new(LocalObjectStore::new(root.clone(), public_base_url.clone())),
            ObjectStoreConfig::Http {
                base_url,
                public_base_url,
                auth_token,
                timeout_secs,
            } => {
                let mut store =
                    HttpObjectStore::new(http_client.clone(), base_url.clone(), public_base_url.clone())
                        .with_timeout(Duration::from_secs(*timeout_secs));
                if let Some(token) = auth_token {
                    store = store.with_auth_token(token.clone());
                }
                Arc::new(store)
            }
        };

        let mut index = SolrIndex::new(http_client.clone(), config.index.base_url.clone())
            .with_commit_within(config.index.commit_within_ms)
            .with_timeout(Duration::from_secs(config.index.timeout_secs));
        if let Some(token) = &config.index.auth_token {
            index = index.with_auth_token(token.clone());
        }

        if let Some(parent) = config.state.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ServiceError::InitializationFailed(format!(
                        "cannot create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let state =
            SqliteArtifactStateStore::open(DatabaseConfig::new(&config.state.database_path)).await?;
        info!(
            database = %config.state.database_path.display(),
            index = %config.index.base_url,
            "Bridges initialized"
        );

        Ok(ServiceDependencies {
            file_system: Arc::new(TokioFileSystem::new()),
            http_client,
            object_store,
            index: Arc::new(index),
            state: Arc::new(state),
            watcher: Arc::new(NotifyWatcher::new()),
        })
    }

    /// Convenience bootstrapper for native hosts.
    ///
    /// ```no_run
    /// # async fn example() -> core_service::Result<()> {
    /// use core_runtime::{EventBus, IndexerConfig};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// let config = IndexerConfig::load("indexer.toml")?;
    /// let service = core_service::bootstrap_desktop(config, EventBus::new(256)).await?;
    /// service.run(CancellationToken::new()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bootstrap_desktop(config: IndexerConfig, event_bus: EventBus) -> Result<IndexerService> {
        config.validate()?;
        let deps = desktop_dependencies(&config).await?;
        IndexerService::new(config, deps, event_bus).await
    }
}

#[cfg(feature = "desktop-shims")]
pub use desktop::{bootstrap_desktop, desktop_dependencies};
