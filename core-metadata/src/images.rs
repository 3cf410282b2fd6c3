//! Remote image detection
//!
//! Searches Dublin Core fields for addresses of images worth mirroring.
//! Field groups are searched in order: `description`, `identifier.thumbnail`,
//! `identifier`, then any other `identifier.*`. A value qualifies when it is
//! an absolute http(s) URL whose path guesses to an `image/*` type, or whose
//! path has no known type and whose query asks for `file=thumbnail`.

use url::Url;

use crate::dublin_core::DublinCoreRecord;

const DEFAULT_MAX_PER_RECORD: usize = 8;

/// Field-name matchers, in search order.
fn field_groups() -> [fn(&str) -> bool; 4] {
    [
        |name| name == "description",
        |name| name == "identifier.thumbnail",
        |name| name == "identifier",
        |name| name.starts_with("identifier.") && name.len() > "identifier.".len(),
    ]
}

#[derive(Debug, Clone)]
pub struct ImageDetector {
    max_per_record: usize,
}

impl Default for ImageDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_RECORD)
    }
}

impl ImageDetector {
    pub fn new(max_per_record: usize) -> Self {
        Self { max_per_record }
    }

    /// Distinct image addresses in search order, capped at `max_per_record`.
    pub fn detect(&self, record: &DublinCoreRecord) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();

        for matches in field_groups() {
            for value in record.values_where(matches) {
                if found.len() >= self.max_per_record {
                    return found;
                }
                if is_image_address(value) && !found.iter().any(|f| f == value) {
                    found.push(value.to_string());
                }
            }
        }

        found
    }
}

/// Whether `value` looks like the address of a remote image.
pub fn is_image_address(value: &str) -> bool {
    let Some(url) = parse_http_url(value) else {
        return false;
    };

    match mime_guess::from_path(url.path()).first() {
        Some(mime) => mime.type_() == mime_guess::mime::IMAGE,
        None => url
            .query()
            .map(|q| q.split('&').any(|pair| pair == "file=thumbnail"))
            .unwrap_or(false),
    }
}

/// Parse an absolute http(s) URL with a host.
pub(crate) fn parse_http_url(value: &str) -> Option<Url> {
    let url = Url::parse(value.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}
