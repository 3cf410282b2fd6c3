//! # Indexer Service
//!
//! Owns the synchronizer for one harvest directory and drives it from three
//! sources of change events:
//!
//! 1. A reconciliation pass at startup
//! 2. The file watcher (a rescan signal triggers another reconciliation)
//! 3. The periodic reconciliation timer
//!
//! A harvest settings file outside the harvest directory gets a watcher of
//! its own; either way a change to it reloads the settings.
//!
//! All events go through one [`SyncDispatcher`]. Cancelling the token stops
//! intake; events already queued run to their commit point before
//! [`IndexerService::run`] returns.

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::watch::{FileChange, FileChangeKind, FileWatcher, WatchHandle, WatchSignal};
use core_metadata::{ImageDetector, OaiSetCatalog, RecordTransformer, SharedHarvestSettings};
use core_runtime::config::IndexerConfig;
use core_runtime::events::{CoreEvent, EventBus, ReconcileEvent, ServiceEvent};
use core_runtime::logging::strip_path;
use core_sync::{
    AssetSyncConfig, ChangeEvent, ChangeKind, DispatcherConfig, EventReconciler, SyncConfig,
    SyncCoordinator, SyncDispatcher, SyncError, SyncTargets,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Result, ServiceDependencies, ServiceError};

/// Summary of [`IndexerService::run_once`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnceReport {
    pub scanned: usize,
    pub changes: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Why the event loop stopped.
enum StopReason {
    Cancelled,
    WatcherClosed,
    Fatal(String),
}

impl StopReason {
    fn describe(&self) -> String {
        match self {
            StopReason::Cancelled => "cancelled".to_string(),
            StopReason::WatcherClosed => "file watcher closed".to_string(),
            StopReason::Fatal(message) => format!("fatal error: {}", message),
        }
    }
}

pub struct IndexerService {
    config: IndexerConfig,
    coordinator: Arc<SyncCoordinator>,
    reconciler: EventReconciler,
    file_system: Arc<dyn FileSystemAccess>,
    watcher: Arc<dyn FileWatcher>,
    settings: SharedHarvestSettings,
    event_bus: EventBus,
}

impl IndexerService {
    /// Assemble the service from explicit bridge handles.
    ///
    /// Loads the harvest settings file when one is configured.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the harvest settings file
    /// cannot be read.
    pub async fn new(
        config: IndexerConfig,
        deps: ServiceDependencies,
        event_bus: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let settings = SharedHarvestSettings::default();
        if let Some(path) = &config.metadata.harvest_settings_path {
            settings.reload(deps.file_system.as_ref(), path).await?;
            info!(path = %path.display(), "Loaded harvest settings");
        }

        let transformer = RecordTransformer::new(
            ImageDetector::new(config.images.max_per_record),
            settings.clone(),
        )
        .with_set_catalog(OaiSetCatalog::new(deps.http_client.clone()));
        let sync_config = SyncConfig {
            dry_run: config.dry_run,
            assets: AssetSyncConfig {
                max_bytes: config.images.max_bytes,
                fetch_timeout: Duration::from_secs(config.images.fetch_timeout_secs),
                retry: config.retry.policy(),
            },
        };
        let coordinator = SyncCoordinator::new(
            sync_config,
            transformer,
            SyncTargets {
                file_system: deps.file_system.clone(),
                state: deps.state.clone(),
                http: deps.http_client,
                object_store: deps.object_store,
                index: deps.index,
            },
            event_bus.clone(),
        );
        let reconciler = EventReconciler::new(
            deps.file_system.clone(),
            deps.state,
            config.watch.root.clone(),
            config.watch.record_extensions.clone(),
        );

        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
            reconciler,
            file_system: deps.file_system,
            watcher: deps.watcher,
            settings,
            event_bus,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.config.workers.count,
            queue_capacity: self.config.workers.queue_capacity,
        }
    }

    /// Reconcile once, process every resulting event and return.
    ///
    /// # Errors
    ///
    /// Fails if the directory or state store cannot be scanned, or a worker
    /// hit a fatal error.
    pub async fn run_once(&self) -> Result<OnceReport> {
        let dispatcher = SyncDispatcher::spawn(self.coordinator.clone(), self.dispatcher_config());
        let stats = dispatcher.stats();

        let reconciled = self.reconcile_into(&dispatcher, "once").await;
        let drained = dispatcher.shutdown().await;
        let (scanned, changes) = reconciled?;
        drained.map_err(fatal_or_sync)?;

        let report = OnceReport {
            scanned,
            changes,
            processed: stats.processed(),
            failed: stats.failed(),
        };
        info!(
            scanned = report.scanned,
            changes = report.changes,
            processed = report.processed,
            failed = report.failed,
            "Single pass finished"
        );
        Ok(report)
    }

    /// Run until `cancel` fires, the watcher closes, or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Watch`] when the watcher cannot be started
    /// - [`ServiceError::Fatal`] when a worker stopped on state store corruption
    /// - [`ServiceError::Sync`] when the startup reconciliation fails
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let root = self.config.watch.root.clone();
        // Watch before the startup scan so nothing falls between the two.
        let mut watch_handle = self.watcher.watch(&root).map_err(ServiceError::Watch)?;
        let mut settings_handle = match self.settings_outside_root() {
            Some(path) => {
                debug!(path = %path.display(), "Watching harvest settings");
                Some(self.watcher.watch_file(path).map_err(ServiceError::Watch)?)
            }
            None => None,
        };

        self.emit(ServiceEvent::Started {
            root: root.display().to_string(),
            dry_run: self.config.dry_run,
        });
        info!(
            root = %root.display(),
            dry_run = self.config.dry_run,
            workers = self.config.workers.count,
            "Indexer started"
        );

        let dispatcher = SyncDispatcher::spawn(self.coordinator.clone(), self.dispatcher_config());
        let mut fatal = dispatcher.fatal_signal();

        let outcome = match self.reconcile_into(&dispatcher, "startup").await {
            Ok(_) => {
                let mut ticker = self.config.reconcile_interval().map(reconcile_ticker);
                self.event_loop(
                    &dispatcher,
                    &mut watch_handle.receiver,
                    &mut settings_handle,
                    &mut fatal,
                    &mut ticker,
                    &cancel,
                )
                .await
            }
            Err(e) => Err(e),
        };

        let reason = match &outcome {
            Ok(reason) => reason.describe(),
            Err(e) => e.to_string(),
        };
        info!(reason = %reason, "Indexer stopping; draining queued events");
        self.emit(ServiceEvent::Stopping { reason });
        drop(watch_handle);
        drop(settings_handle);

        let drained = dispatcher.shutdown().await;
        self.emit(ServiceEvent::Stopped);
        info!("Indexer stopped");

        match outcome? {
            StopReason::Fatal(message) => Err(ServiceError::Fatal(message)),
            StopReason::Cancelled | StopReason::WatcherClosed => {
                drained.map_err(fatal_or_sync)
            }
        }
    }

    async fn event_loop(
        &self,
        dispatcher: &SyncDispatcher,
        signals: &mut mpsc::Receiver<WatchSignal>,
        settings: &mut Option<WatchHandle>,
        fatal: &mut watch::Receiver<Option<String>>,
        ticker: &mut Option<Interval>,
        cancel: &CancellationToken,
    ) -> Result<StopReason> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                changed = fatal.changed() => {
                    let message = fatal.borrow().clone();
                    match (changed, message) {
                        (_, Some(message)) => return Ok(StopReason::Fatal(message)),
                        (Err(_), None) => return Ok(StopReason::Cancelled),
                        (Ok(()), None) => {}
                    }
                }
                signal = signals.recv() => match signal {
                    Some(WatchSignal::Change(change)) => {
                        if let Err(e) = self.on_change(dispatcher, change).await {
                            return stop_on(e);
                        }
                    }
                    Some(WatchSignal::Rescan) => {
                        if let Err(e) = self.reconcile_into(dispatcher, "rescan").await {
                            if e.is_fatal() {
                                return stop_on(e);
                            }
                            warn!(error = %e, "Rescan failed");
                        }
                    }
                    None => {
                        warn!("File watcher closed");
                        return Ok(StopReason::WatcherClosed);
                    }
                },
                _ = next_settings_signal(settings) => self.reload_settings().await,
                _ = next_tick(ticker) => {
                    if let Err(e) = self.reconcile_into(dispatcher, "interval").await {
                        if e.is_fatal() {
                            return stop_on(e);
                        }
                        warn!(error = %e, "Periodic reconciliation failed");
                    }
                }
            }
        }
    }

    /// Route one watcher notification.
    async fn on_change(&self, dispatcher: &SyncDispatcher, change: FileChange) -> Result<()> {
        if self.is_settings_file(&change.path) {
            self.reload_settings().await;
            return Ok(());
        }
        if !self.reconciler.is_record_path(&change.path) {
            return Ok(());
        }

        let kind = match change.kind {
            FileChangeKind::Created => ChangeKind::Created,
            FileChangeKind::Modified => ChangeKind::Updated,
            FileChangeKind::Removed => ChangeKind::Deleted,
        };
        debug!(
            kind = %kind,
            file = strip_path(&change.path.to_string_lossy()),
            "File change"
        );
        let mut event = ChangeEvent::new(kind, change.path);
        event.detected_at = Some(change.detected_at);
        dispatcher.dispatch(event).await?;
        Ok(())
    }

    fn is_settings_file(&self, path: &Path) -> bool {
        self.config.metadata.harvest_settings_path.as_deref() == Some(path)
    }

    /// Settings file the harvest directory watcher does not cover.
    fn settings_outside_root(&self) -> Option<&Path> {
        self.config
            .metadata
            .harvest_settings_path
            .as_deref()
            .filter(|path| !path.starts_with(&self.config.watch.root))
    }

    async fn reload_settings(&self) {
        let Some(path) = &self.config.metadata.harvest_settings_path else {
            return;
        };
        // Failures keep the previous table and are logged by `reload`.
        if let Ok(entries) = self.settings.reload(self.file_system.as_ref(), path).await {
            info!(path = %path.display(), entries, "Reloaded harvest settings");
            self.emit(ServiceEvent::SettingsReloaded {
                path: path.display().to_string(),
                entries,
            });
        }
    }

    /// Reconcile and queue the resulting events; returns (scanned, changes).
    async fn reconcile_into(
        &self,
        dispatcher: &SyncDispatcher,
        trigger: &str,
    ) -> Result<(usize, usize)> {
        self.emit_reconcile(ReconcileEvent::Started {
            trigger: trigger.to_string(),
        });
        let report = self.reconciler.reconcile().await?;
        let (scanned, changes) = (report.scanned, report.events.len());

        for event in report.events {
            dispatcher.dispatch(event).await?;
        }

        self.emit_reconcile(ReconcileEvent::Completed {
            scanned,
            changes,
            duration_ms: report.duration_ms,
        });
        info!(trigger, scanned, changes, "Reconciliation queued");
        Ok((scanned, changes))
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.event_bus.emit(CoreEvent::Service(event));
    }

    fn emit_reconcile(&self, event: ReconcileEvent) {
        let _ = self.event_bus.emit(CoreEvent::Reconcile(event));
    }
}

fn reconcile_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Next signal from the settings watcher; never once it is gone.
async fn next_settings_signal(handle: &mut Option<WatchHandle>) -> WatchSignal {
    if let Some(watching) = handle {
        if let Some(signal) = watching.recv().await {
            return signal;
        }
        warn!("Harvest settings watcher closed");
        *handle = None;
    }
    std::future::pending().await
}

/// Next timer tick, or never when the timer is disabled.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn fatal_or_sync(error: SyncError) -> ServiceError {
    if error.is_fatal() {
        ServiceError::Fatal(error.to_string())
    } else {
        ServiceError::Sync(error)
    }
}

/// Fatal errors end the loop with a reason; anything else is logged there.
fn stop_on(error: ServiceError) -> Result<StopReason> {
    if error.is_fatal() {
        error!(error = %error, "Stopping on fatal error");
        Ok(StopReason::Fatal(error.to_string()))
    } else {
        Err(error)
    }
}
