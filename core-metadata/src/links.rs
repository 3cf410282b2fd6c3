//! External link selection
//!
//! Collects non-image URLs from `identifier` fields and orders them by a
//! small relevance score: one point when the URL contains the record's local
//! identifier, one point when the URL host is the institution key.

use std::cmp::Reverse;

use crate::dublin_core::DublinCoreRecord;
use crate::record::RecordId;

const IMAGE_FILE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".tif", ".tiff"];

/// Ranked external links for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalLinks {
    pub primary: Option<String>,
    pub alternates: Vec<String>,
}

/// Collect and rank external links.
pub fn external_links(
    record: &DublinCoreRecord,
    id: &RecordId,
    institution_key: &str,
) -> ExternalLinks {
    let mut links: Vec<String> = Vec::new();

    let candidates = record
        .values("identifier")
        .chain(record.values_where(|name| name.starts_with("identifier.")));
    for value in candidates {
        if is_external_link(value) && !links.iter().any(|l| l == value) {
            links.push(value.to_string());
        }
    }

    let local = id.local_identifier();
    // sort_by_key is stable, so equal scores keep document order.
    links.sort_by_key(|link| Reverse(score(link, local, institution_key)));

    let mut iter = links.into_iter();
    ExternalLinks {
        primary: iter.next(),
        alternates: iter.collect(),
    }
}

fn is_external_link(value: &str) -> bool {
    let Ok(url) = url::Url::parse(value.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https" | "ftp" | "ftps") || url.host_str().is_none() {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    !IMAGE_FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn score(link: &str, local_identifier: &str, institution_key: &str) -> u8 {
    let mut score = 0;
    if !local_identifier.is_empty() && link.contains(local_identifier) {
        score += 1;
    }
    if let Ok(url) = url::Url::parse(link) {
        if netloc(&url) == institution_key {
            score += 1;
        }
    }
    score
}

/// Host plus explicit port, as written in the URL.
fn netloc(url: &url::Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}
