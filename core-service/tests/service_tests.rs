use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::index::{FieldValue, IndexDocument, SearchIndex};
use bridge_traits::storage::ObjectStore;
use bridge_traits::watch::{FileChange, FileChangeKind, FileWatcher, WatchHandle, WatchSignal};
use bytes::Bytes;
use core_runtime::config::{IndexerConfig, ObjectStoreConfig};
use core_runtime::events::{CoreEvent, EventBus, ServiceEvent};
use core_service::{IndexerService, ServiceDependencies};
use core_sync::{
    ArtifactSet, ArtifactStateStore, PublishIntent, RecordId, SqliteArtifactStateStore, SyncError,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MemoryIndex {
    docs: Mutex<BTreeMap<String, IndexDocument>>,
}

impl MemoryIndex {
    fn doc(&self, id: &str) -> Option<IndexDocument> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, id: &str, document: IndexDocument) -> BridgeResult<()> {
        self.docs.lock().unwrap().insert(id.to_string(), document);
        Ok(())
    }

    async fn delete(&self, id: &str) -> BridgeResult<()> {
        match self.docs.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(BridgeError::NotFound(id.to_string())),
        }
    }
}

#[derive(Default)]
struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: Option<&str>) -> BridgeResult<()> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

/// Every image is served as a tiny JPEG.
struct JpegHost;

#[async_trait]
impl HttpClient for JpegHost {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "image/jpeg".to_string())]),
            body: Bytes::from_static(b"\xff\xd8\xff"),
        })
    }
}

/// Watcher driven by the test through channels, one per watched path.
#[derive(Default)]
struct ChannelWatcher {
    senders: Mutex<HashMap<PathBuf, mpsc::Sender<WatchSignal>>>,
}

impl ChannelWatcher {
    async fn sender_for(&self, path: &Path) -> mpsc::Sender<WatchSignal> {
        for _ in 0..500 {
            if let Some(sender) = self.senders.lock().unwrap().get(path).cloned() {
                return sender;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("service never started watching {}", path.display());
    }

    fn is_watching(&self, path: &Path) -> bool {
        self.senders.lock().unwrap().contains_key(path)
    }

    fn open(&self, path: &Path) -> WatchHandle {
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().insert(path.to_path_buf(), tx);
        WatchHandle::new(rx, Box::new(()))
    }
}

impl FileWatcher for ChannelWatcher {
    fn watch(&self, root: &Path) -> BridgeResult<WatchHandle> {
        Ok(self.open(root))
    }

    fn watch_file(&self, path: &Path) -> BridgeResult<WatchHandle> {
        Ok(self.open(path))
    }
}

/// State store whose lookups report corruption.
struct CorruptStateStore {
    inner: SqliteArtifactStateStore,
}

#[async_trait]
impl ArtifactStateStore for CorruptStateStore {
    async fn get(&self, _id: &RecordId) -> core_sync::Result<Option<ArtifactSet>> {
        Err(SyncError::StateStoreCorruption(
            "artifact_sets row has malformed object_keys".to_string(),
        ))
    }

    async fn put(&self, id: &RecordId, set: &ArtifactSet) -> core_sync::Result<()> {
        self.inner.put(id, set).await
    }

    async fn delete(&self, id: &RecordId) -> core_sync::Result<()> {
        self.inner.delete(id).await
    }

    async fn scan(&self) -> core_sync::Result<Vec<(RecordId, ArtifactSet)>> {
        self.inner.scan().await
    }

    async fn record_intent(&self, intent: &PublishIntent) -> core_sync::Result<()> {
        self.inner.record_intent(intent).await
    }

    async fn get_intent(&self, id: &RecordId) -> core_sync::Result<Option<PublishIntent>> {
        self.inner.get_intent(id).await
    }

    async fn scan_intents(&self) -> core_sync::Result<Vec<PublishIntent>> {
        self.inner.scan_intents().await
    }
}

struct Fixture {
    harvest: TempDir,
    work: TempDir,
    index: Arc<MemoryIndex>,
    watcher: Arc<ChannelWatcher>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            harvest: TempDir::new().unwrap(),
            work: TempDir::new().unwrap(),
            index: Arc::new(MemoryIndex::default()),
            watcher: Arc::new(ChannelWatcher::default()),
        }
    }

    fn config(&self) -> IndexerConfig {
        IndexerConfig::builder()
            .watch_root(self.harvest.path())
            .reconcile_interval_secs(0)
            .database_path(self.work.path().join("state.db"))
            .index_url("http://solr.test/solr/records")
            .object_store(ObjectStoreConfig::Local {
                root: self.work.path().join("objects"),
                public_base_url: "https://cdn.test".to_string(),
            })
            .workers(2, 8)
            .build()
            .unwrap()
    }

    fn deps(&self, state: Arc<dyn ArtifactStateStore>) -> ServiceDependencies {
        ServiceDependencies {
            file_system: Arc::new(TokioFileSystem::new()),
            http_client: Arc::new(JpegHost),
            object_store: Arc::new(MemoryObjectStore::default()),
            index: self.index.clone(),
            state,
            watcher: self.watcher.clone(),
        }
    }

    async fn service(&self, config: IndexerConfig) -> IndexerService {
        let state = Arc::new(SqliteArtifactStateStore::in_memory().await.unwrap());
        IndexerService::new(config, self.deps(state), EventBus::new(128))
            .await
            .unwrap()
    }

    fn write_record(&self, collection: &str, id: &str, title: &str) -> PathBuf {
        let dir = self.harvest.path().join("museum.test").join(collection);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.xml", id));
        std::fs::write(
            &path,
            format!(
                r#"<oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <dc:title>{}</dc:title>
  <dc:identifier>http://museum.test/images/{}.jpg</dc:identifier>
</oai_dc:dc>"#,
                title, id
            ),
        )
        .unwrap();
        path
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_run_once_publishes_existing_records() {
    let fixture = Fixture::new();
    fixture.write_record("maps", "r1", "Suva");
    fixture.write_record("maps", "r2", "Levuka");
    let service = fixture.service(fixture.config()).await;

    let report = service.run_once().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.changes, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);

    let doc = fixture.index.doc("r1").unwrap();
    assert!(doc["thumbnail_url"].first().unwrap().starts_with("https://cdn.test/r1/"));

    // Nothing changed on disk, so a second pass is a no-op.
    let report = service.run_once().await.unwrap();
    assert_eq!(report.changes, 0);
}

#[tokio::test]
async fn test_run_once_dry_run_publishes_nothing() {
    let fixture = Fixture::new();
    fixture.write_record("maps", "r1", "Suva");
    let mut config = fixture.config();
    config.dry_run = true;
    let service = fixture.service(config).await;

    let report = service.run_once().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(fixture.index.len(), 0);
}

#[tokio::test]
async fn test_harvest_settings_names_collections() {
    let fixture = Fixture::new();
    fixture.write_record("maps", "r1", "Suva");
    let settings_path = fixture.work.path().join("harvests.json");
    std::fs::write(
        &settings_path,
        r#"{"/var/harvest/museum.test/maps": {
            "repository_name": "Fiji Museum",
            "base_url": "http://museum.test/oai",
            "set_spec": "maps",
            "set_name": "Historic Maps"
        }}"#,
    )
    .unwrap();
    let mut config = fixture.config();
    config.metadata.harvest_settings_path = Some(settings_path);
    let service = fixture.service(config).await;

    service.run_once().await.unwrap();
    let doc = fixture.index.doc("r1").unwrap();
    assert_eq!(doc["institutionName"], FieldValue::from("Fiji Museum"));
    assert_eq!(doc["collectionName"].first(), Some("Historic Maps"));
}

fn write_settings(path: &Path, repository_name: &str) {
    std::fs::write(
        path,
        format!(
            r#"{{"/var/harvest/museum.test/maps": {{
                "repository_name": "{}",
                "base_url": "http://museum.test/oai",
                "set_spec": "maps",
                "set_name": "Historic Maps"
            }}}}"#,
            repository_name
        ),
    )
    .unwrap();
}

#[tokio::test]
async fn test_settings_file_outside_root_is_watched_and_reloaded() {
    let fixture = Fixture::new();
    let r1 = fixture.write_record("maps", "r1", "Suva");
    let settings_path = fixture.work.path().join("harvests.json");
    write_settings(&settings_path, "Fiji Museum");
    let mut config = fixture.config();
    config.metadata.harvest_settings_path = Some(settings_path.clone());
    let service = Arc::new(fixture.service(config).await);
    let mut events = service.event_bus().subscribe();

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let settings_sender = fixture.watcher.sender_for(&settings_path).await;
    let sender = fixture.watcher.sender_for(fixture.harvest.path()).await;
    let index = fixture.index.clone();
    wait_until(|| index.doc("r1").is_some()).await;
    assert_eq!(
        index.doc("r1").unwrap()["institutionName"],
        FieldValue::from("Fiji Museum")
    );

    write_settings(&settings_path, "Fiji Museum of Maps");
    settings_sender
        .send(WatchSignal::Change(FileChange::new(&settings_path, FileChangeKind::Modified)))
        .await
        .unwrap();

    let reloaded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let CoreEvent::Service(ServiceEvent::SettingsReloaded { path, entries }) =
                events.recv().await.unwrap()
            {
                break (path, entries);
            }
        }
    })
    .await
    .expect("settings were not reloaded");
    assert_eq!(reloaded, (settings_path.display().to_string(), 1));

    sender
        .send(WatchSignal::Change(FileChange::new(&r1, FileChangeKind::Modified)))
        .await
        .unwrap();
    wait_until(|| {
        index.doc("r1").map(|doc| doc["institutionName"].clone())
            == Some(FieldValue::from("Fiji Museum of Maps"))
    })
    .await;

    cancel.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_settings_file_inside_root_needs_no_extra_watch() {
    let fixture = Fixture::new();
    let settings_path = fixture.harvest.path().join("harvests.json");
    write_settings(&settings_path, "Fiji Museum");
    let mut config = fixture.config();
    config.metadata.harvest_settings_path = Some(settings_path.clone());
    let service = Arc::new(fixture.service(config).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });
    fixture.watcher.sender_for(fixture.harvest.path()).await;
    assert!(!fixture.watcher.is_watching(&settings_path));

    cancel.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_follows_watcher_until_cancelled() {
    let fixture = Fixture::new();
    fixture.write_record("maps", "r1", "Suva");
    let service = Arc::new(fixture.service(fixture.config()).await);
    let mut events = service.event_bus().subscribe();

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let sender = fixture.watcher.sender_for(fixture.harvest.path()).await;
    let index = fixture.index.clone();
    wait_until(|| index.doc("r1").is_some()).await;

    let r2 = fixture.write_record("maps", "r2", "Levuka");
    sender
        .send(WatchSignal::Change(FileChange::new(&r2, FileChangeKind::Created)))
        .await
        .unwrap();
    // Not a record file; ignored.
    sender
        .send(WatchSignal::Change(FileChange::new(
            fixture.harvest.path().join("notes.txt"),
            FileChangeKind::Created,
        )))
        .await
        .unwrap();
    wait_until(|| index.doc("r2").is_some()).await;

    std::fs::remove_file(&r2).unwrap();
    sender
        .send(WatchSignal::Change(FileChange::new(&r2, FileChangeKind::Removed)))
        .await
        .unwrap();
    wait_until(|| index.doc("r2").is_none()).await;

    cancel.cancel();
    running.await.unwrap().unwrap();
    assert_eq!(fixture.index.len(), 1);

    let mut service_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Service(event) = event {
            service_events.push(event);
        }
    }
    assert!(matches!(service_events.first(), Some(ServiceEvent::Started { .. })));
    assert_eq!(service_events.last(), Some(&ServiceEvent::Stopped));
}

#[tokio::test]
async fn test_rescan_signal_reconciles() {
    let fixture = Fixture::new();
    let service = Arc::new(fixture.service(fixture.config()).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });
    let sender = fixture.watcher.sender_for(fixture.harvest.path()).await;

    // Files appear without individual notifications.
    fixture.write_record("charts", "c1", "Reef");
    fixture.write_record("charts", "c2", "Lagoon");
    sender.send(WatchSignal::Rescan).await.unwrap();

    let index = fixture.index.clone();
    wait_until(|| index.len() == 2).await;

    cancel.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_state_store_corruption_stops_the_service() {
    let fixture = Fixture::new();
    let state = Arc::new(CorruptStateStore {
        inner: SqliteArtifactStateStore::in_memory().await.unwrap(),
    });
    let service = Arc::new(
        IndexerService::new(fixture.config(), fixture.deps(state), EventBus::new(16))
            .await
            .unwrap(),
    );

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });
    let sender = fixture.watcher.sender_for(fixture.harvest.path()).await;

    let path = fixture.write_record("maps", "r1", "Suva");
    sender
        .send(WatchSignal::Change(FileChange::new(&path, FileChangeKind::Created)))
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("service did not stop")
        .unwrap();
    let error = result.unwrap_err();
    assert!(error.is_fatal());
    assert!(!cancel.is_cancelled());
    assert_eq!(fixture.index.len(), 0);
}
