//! Object store implementations
//!
//! - [`LocalObjectStore`]: a directory tree served by an external web server
//!   or synced to a bucket by a separate process.
//! - [`HttpObjectStore`]: any store with a plain REST surface
//!   (`PUT`/`DELETE`/`HEAD` on `<base>/<key>`), such as S3-compatible
//!   gateways behind a presigning proxy or WebDAV.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest},
    storage::ObjectStore,
};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Percent-encode each `/`-separated segment of a key for use in a URL.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode_key(key))
}

/// Directory-backed object store
///
/// Writes go to a temporary sibling file first and are renamed into place, so
/// a crash never leaves a truncated object under its final key.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !valid {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid object key '{}'",
                key
            )));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: Option<&str>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, &body).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            fs::remove_file(&temp_path).await.ok();
            return Err(e.into());
        }

        debug!(object_key = %key, size = body.len(), "Stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(object_key = %key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

/// REST object store over the [`HttpClient`] bridge
pub struct HttpObjectStore {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    public_base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpObjectStore {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            public_base_url: public_base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, method: HttpMethod, key: &str) -> HttpRequest {
        let request =
            HttpRequest::new(method, join_url(&self.base_url, key)).timeout(self.timeout);
        match &self.auth_token {
            Some(token) => request.bearer_token(token.clone()),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> Result<()> {
        let mut request = self.request(HttpMethod::Put, key).body(body);
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }

        self.http_client
            .execute(request)
            .await?
            .error_for_status("object store PUT")?;
        debug!(object_key = %key, "Uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .http_client
            .execute(self.request(HttpMethod::Delete, key))
            .await?;

        match response.error_for_status("object store DELETE") {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self
            .http_client
            .execute(self.request(HttpMethod::Head, key))
            .await?;

        match response.error_for_status("object store HEAD") {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::HttpResponse;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_exists_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path(), "http://img.example.org");

        store
            .put("oai%3Ax%3A1/abcd.jpg", Bytes::from_static(b"jpeg"), Some("image/jpeg"))
            .await
            .unwrap();
        assert!(store.exists("oai%3Ax%3A1/abcd.jpg").await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join("oai%3Ax%3A1/abcd.jpg")).unwrap(),
            b"jpeg"
        );

        store.delete("oai%3Ax%3A1/abcd.jpg").await.unwrap();
        assert!(!store.exists("oai%3Ax%3A1/abcd.jpg").await.unwrap());

        // Deleting again is a no-op.
        store.delete("oai%3Ax%3A1/abcd.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_put_overwrites_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path(), "http://img.example.org");

        store.put("r/k.png", Bytes::from_static(b"one"), None).await.unwrap();
        store.put("r/k.png", Bytes::from_static(b"two"), None).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("r")).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read(dir.path().join("r/k.png")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path(), "http://img.example.org");

        assert!(store.put("../evil", Bytes::new(), None).await.is_err());
        assert!(store.put("/abs", Bytes::new(), None).await.is_err());
        assert!(store.delete("").await.is_err());
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let store = LocalObjectStore::new("/tmp/x", "http://img.example.org/");
        assert_eq!(
            store.public_url("oai%3Ax%3A1/ab.jpg"),
            "http://img.example.org/oai%253Ax%253A1/ab.jpg"
        );
    }

    struct RecordingClient {
        status: u16,
        requests: Mutex<Vec<(HttpMethod, String, HashMap<String, String>)>>,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((request.method, request.url, request.headers));
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_http_store_put_sends_auth_and_content_type() {
        let client = Arc::new(RecordingClient {
            status: 201,
            requests: Mutex::new(Vec::new()),
        });
        let store = HttpObjectStore::new(client.clone(), "https://store/bucket", "https://cdn")
            .with_auth_token("t0ken");

        store
            .put("r/k.jpg", Bytes::from_static(b"x"), Some("image/jpeg"))
            .await
            .unwrap();

        let requests = client.requests.lock().unwrap();
        let (method, url, headers) = &requests[0];
        assert_eq!(*method, HttpMethod::Put);
        assert_eq!(url, "https://store/bucket/r/k.jpg");
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("image/jpeg"));
        assert_eq!(headers.get("Authorization").map(String::as_str), Some("Bearer t0ken"));
    }

    #[tokio::test]
    async fn test_http_store_missing_object_semantics() {
        let client = Arc::new(RecordingClient {
            status: 404,
            requests: Mutex::new(Vec::new()),
        });
        let store = HttpObjectStore::new(client, "https://store", "https://cdn");

        assert!(store.delete("r/k.jpg").await.is_ok());
        assert!(!store.exists("r/k.jpg").await.unwrap());
        assert!(store.put("r/k.jpg", Bytes::new(), None).await.is_err());
    }
}
