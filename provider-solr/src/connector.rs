//! Solr JSON update API connector
//!
//! Implements the `SearchIndex` bridge trait for a single Solr core.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::index::{FieldValue, IndexDocument, SearchIndex};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SolrError};
use crate::types::UpdateResponse;

/// Unique key field of the target core
const ID_FIELD: &str = "id";

/// Default soft-commit window
const DEFAULT_COMMIT_WITHIN_MS: u64 = 1000;

/// Solr search index connector
///
/// # Example
///
/// ```ignore
/// use provider_solr::SolrIndex;
/// use bridge_traits::index::SearchIndex;
///
/// let index = SolrIndex::new(http_client, "http://localhost:8983/solr/prl");
/// index.upsert("oai:repo:1", document).await?;
/// ```
pub struct SolrIndex {
    /// HTTP client for API requests
    http_client: Arc<dyn HttpClient>,

    /// Core URL, e.g. `http://localhost:8983/solr/prl`
    base_url: String,

    /// Optional bearer token for secured deployments
    auth_token: Option<String>,

    /// `commitWithin` sent with every update
    commit_within_ms: u64,

    timeout: Duration,
}

impl SolrIndex {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            commit_within_ms: DEFAULT_COMMIT_WITHIN_MS,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_commit_within(mut self, commit_within_ms: u64) -> Self {
        self.commit_within_ms = commit_within_ms;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn update_url(&self) -> String {
        format!(
            "{}/update?commitWithin={}&wt=json",
            self.base_url, self.commit_within_ms
        )
    }

    /// Ensure the document carries `id` and that it matches the requested id.
    fn prepare_document(id: &str, mut document: IndexDocument) -> Result<IndexDocument> {
        match document.get(ID_FIELD).and_then(FieldValue::first) {
            Some(existing) if existing != id => {
                return Err(SolrError::InvalidDocument(format!(
                    "document id '{}' does not match '{}'",
                    existing, id
                )))
            }
            _ => {}
        }
        document.insert(ID_FIELD.to_string(), FieldValue::Text(id.to_string()));
        Ok(document)
    }

    /// POST a JSON body to the update handler and check the outcome.
    async fn post_update(&self, body: &serde_json::Value) -> Result<UpdateResponse> {
        let mut request = HttpRequest::new(HttpMethod::Post, self.update_url())
            .json(body)?
            .header("Accept", "application/json")
            .timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            request = request.bearer_token(token.clone());
        }

        let response = self.http_client.execute(request).await?;
        Self::check_response(response)
    }

    fn check_response(response: HttpResponse) -> Result<UpdateResponse> {
        let status = response.status;
        let parsed: Option<UpdateResponse> = serde_json::from_slice(&response.body).ok();

        if response.is_success() {
            let parsed = parsed.ok_or_else(|| {
                SolrError::ParseError(String::from_utf8_lossy(&response.body).into_owned())
            })?;
            if parsed.response_header.status != 0 {
                return Err(SolrError::ApiError {
                    status_code: status,
                    message: format!(
                        "responseHeader.status = {}",
                        parsed.response_header.status
                    ),
                });
            }
            return Ok(parsed);
        }

        let message = parsed
            .and_then(|p| p.error)
            .map(|e| e.msg)
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());

        if status == 429 || status == 408 || response.is_server_error() {
            warn!(status, "Solr temporarily unavailable");
            Err(SolrError::Unavailable {
                status_code: status,
                message,
            })
        } else {
            warn!(status, message = %message, "Solr rejected update");
            Err(SolrError::ApiError {
                status_code: status,
                message,
            })
        }
    }
}

#[async_trait]
impl SearchIndex for SolrIndex {
    #[instrument(skip(self, document), fields(record_id = %id))]
    async fn upsert(&self, id: &str, document: IndexDocument) -> bridge_traits::error::Result<()> {
        let document = Self::prepare_document(id, document)?;
        let response = self.post_update(&json!([document])).await?;
        debug!(q_time = response.response_header.q_time, "Upserted document");
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id))]
    async fn delete(&self, id: &str) -> bridge_traits::error::Result<()> {
        let response = self.post_update(&json!({ "delete": { "id": id } })).await?;
        debug!(q_time = response.response_header.q_time, "Deleted document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    const OK_BODY: &str = r#"{"responseHeader":{"status":0,"QTime":3}}"#;

    fn document() -> IndexDocument {
        let mut doc = IndexDocument::new();
        doc.insert("title_keyword".to_string(), "A map".into());
        doc
    }

    #[tokio::test]
    async fn test_upsert_posts_document_array() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|request| {
                let body: serde_json::Value =
                    serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
                request.method == HttpMethod::Post
                    && request.url == "http://solr:8983/solr/prl/update?commitWithin=500&wt=json"
                    && body[0]["id"] == "oai:x:1"
                    && body[0]["title_keyword"] == "A map"
            })
            .returning(|_| Ok(response(200, OK_BODY)));

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr:8983/solr/prl/")
            .with_commit_within(500);
        index.upsert("oai:x:1", document()).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_rejects_mismatched_id() {
        let mock_http = MockHttpClient::new();
        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/prl");

        let mut doc = document();
        doc.insert("id".to_string(), "other".into());

        let error = index.upsert("oai:x:1", doc).await.unwrap_err();
        assert!(matches!(error, BridgeError::OperationFailed(_)));
    }

    #[tokio::test]
    async fn test_delete_sends_delete_by_id() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|request| {
                let body: serde_json::Value =
                    serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
                body["delete"]["id"] == "oai:x:1"
            })
            .returning(|_| Ok(response(200, OK_BODY)));

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/prl");
        index.delete("oai:x:1").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .returning(|_| Ok(response(503, "Service Unavailable")));

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/prl");
        let error = index.upsert("oai:x:1", document()).await.unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_bad_request_is_permanent() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().returning(|_| {
            Ok(response(
                400,
                r#"{"responseHeader":{"status":400,"QTime":0},"error":{"msg":"unknown field 'x'","code":400}}"#,
            ))
        });

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/prl");
        let error = index.upsert("oai:x:1", document()).await.unwrap_err();
        assert!(!error.is_transient());
        assert!(error.to_string().contains("unknown field 'x'"));
    }

    #[tokio::test]
    async fn test_missing_core_is_not_document_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .returning(|_| Ok(response(404, "<html>Not Found</html>")));

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/missing");
        let error = index.delete("oai:x:1").await.unwrap_err();
        assert!(!error.is_not_found());
    }

    #[tokio::test]
    async fn test_auth_token_is_sent() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .withf(|request| {
                request.headers.get("Authorization").map(String::as_str) == Some("Bearer s3cret")
            })
            .returning(|_| Ok(response(200, OK_BODY)));

        let index = SolrIndex::new(Arc::new(mock_http), "http://solr/prl").with_auth_token("s3cret");
        index.delete("oai:x:1").await.unwrap();
    }
}
