//! OAI-PMH set names
//!
//! Harvest settings only carry a `setSpec`. The human-readable `setName`
//! comes from the repository's `ListSets` response, fetched once per base URL
//! and refreshed when a setSpec is missing from the cached listing.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::{MetadataError, Result};

/// Upper bound on `resumptionToken` pages followed for one listing.
const MAX_PAGES: usize = 100;

/// setSpec -> setName for one repository
pub type SetListing = HashMap<String, String>;

/// Cached `ListSets` lookups keyed by repository base URL.
#[derive(Clone)]
pub struct OaiSetCatalog {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
    cache: Arc<Mutex<HashMap<String, SetListing>>>,
}

impl std::fmt::Debug for OaiSetCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OaiSetCatalog")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OaiSetCatalog {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            timeout: Duration::from_secs(60),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of `set_spec` in the repository at `base_url`.
    ///
    /// A cache miss refetches the listing, so sets added to the repository
    /// after the first lookup are still found.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::SetLookup`] when the listing cannot be fetched
    /// - [`MetadataError::UnknownSet`] when the repository has no such set
    pub async fn set_name(&self, base_url: &str, set_spec: &str) -> Result<String> {
        if let Some(name) = self.cached(base_url, set_spec) {
            return Ok(name);
        }

        let listing = self.list_sets(base_url).await?;
        let name = listing.get(set_spec).cloned();
        if name.is_some() {
            self.lock().insert(base_url.to_string(), listing);
        }
        name.ok_or_else(|| MetadataError::UnknownSet {
            base_url: base_url.to_string(),
            set_spec: set_spec.to_string(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SetListing>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cached(&self, base_url: &str, set_spec: &str) -> Option<String> {
        self.lock()
            .get(base_url)
            .and_then(|listing| listing.get(set_spec))
            .cloned()
    }

    /// Fetch every page of `ListSets` from `base_url`.
    pub async fn list_sets(&self, base_url: &str) -> Result<SetListing> {
        debug!(base_url, "Listing sets from OAI-PMH repository");

        let mut listing = SetListing::new();
        let mut url = format!("{}?verb=ListSets", base_url);
        for _ in 0..MAX_PAGES {
            let response = self
                .http
                .execute(HttpRequest::new(HttpMethod::Get, &url).timeout(self.timeout))
                .await
                .and_then(|response| response.error_for_status("ListSets"))
                .map_err(|source| MetadataError::SetLookup {
                    base_url: base_url.to_string(),
                    source,
                })?;

            let page = parse_list_sets(&response.body)?;
            listing.extend(page.sets);
            match page.resumption_token {
                Some(token) => {
                    url = format!(
                        "{}?verb=ListSets&resumptionToken={}",
                        base_url,
                        urlencoding::encode(&token)
                    );
                }
                None => return Ok(listing),
            }
        }
        Ok(listing)
    }
}

/// One `ListSets` response page.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListSetsPage {
    pub sets: Vec<(String, String)>,
    pub resumption_token: Option<String>,
}

/// Parse a `ListSets` response body.
///
/// A `noSetHierarchy` error yields an empty page; any other OAI-PMH error is
/// reported as malformed.
pub fn parse_list_sets(bytes: &[u8]) -> Result<ListSetsPage> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut page = ListSetsPage::default();
    let mut open: Option<String> = None;
    let mut text = String::new();
    let mut spec: Option<String> = None;
    let mut name: Option<String> = None;
    let mut oai_error: Option<String> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| MetadataError::MalformedXml(format!("ListSets: {}", e)))?;

        match event {
            Event::Start(start) => {
                let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                if local == "error" {
                    let code = start
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"code")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                        .unwrap_or_default();
                    oai_error = Some(code);
                }
                if local == "set" {
                    spec = None;
                    name = None;
                }
                text.clear();
                open = Some(local);
            }
            Event::Empty(empty) => {
                if empty.local_name().as_ref() == b"error" {
                    oai_error = Some(String::new());
                }
            }
            Event::Text(t) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| MetadataError::MalformedXml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(end) => {
                match (end.local_name().as_ref(), open.as_deref()) {
                    (b"setSpec", Some("setSpec")) => spec = Some(text.trim().to_string()),
                    (b"setName", Some("setName")) => name = Some(text.trim().to_string()),
                    (b"resumptionToken", Some("resumptionToken")) => {
                        let token = text.trim();
                        if !token.is_empty() {
                            page.resumption_token = Some(token.to_string());
                        }
                    }
                    (b"set", _) => {
                        if let (Some(spec), Some(name)) = (spec.take(), name.take()) {
                            page.sets.push((spec, name));
                        }
                    }
                    _ => {}
                }
                text.clear();
                open = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match oai_error.as_deref() {
        None | Some("noSetHierarchy") => Ok(page),
        Some(code) => Err(MetadataError::MalformedXml(format!(
            "ListSets returned OAI-PMH error '{}'",
            code
        ))),
    }
}
