//! Change events and object keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

pub use core_metadata::{Fingerprint, RecordId};

/// Kind of change observed for a record file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a change event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOrigin {
    Watcher,
    Reconciler,
}

/// A filesystem change for one record file.
///
/// `detected_at` is informational only; processing order is arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub detected_at: Option<DateTime<Utc>>,
    pub origin: EventOrigin,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            detected_at: Some(Utc::now()),
            origin: EventOrigin::Watcher,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Created, path)
    }

    pub fn updated(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Updated, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(ChangeKind::Deleted, path)
    }

    pub fn from_reconciler(mut self) -> Self {
        self.origin = EventOrigin::Reconciler;
        self
    }

    /// Identifier of the record this event concerns.
    pub fn record_id(&self) -> core_metadata::Result<RecordId> {
        RecordId::from_path(&self.path)
    }
}

/// Image extensions kept on object keys.
const KEY_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff", "webp", "jp2"];

/// Object-store key of a mirrored image.
///
/// A pure function of record id and image address:
/// `<urlencoded id>/<first 16 hex of sha256(address)><ext>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn derive(id: &RecordId, address: &str) -> Self {
        let digest = format!("{:x}", Sha256::digest(address.as_bytes()));
        let extension = image_extension(address)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        Self(format!(
            "{}/{}{}",
            urlencoding::encode(id.as_str()),
            &digest[..16],
            extension
        ))
    }

    /// Wrap a key read back from storage.
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Content type implied by the key extension.
    pub fn content_type(&self) -> Option<String> {
        let file = self.0.rsplit('/').next().unwrap_or(&self.0);
        mime_guess::from_path(Path::new(file))
            .first()
            .map(|mime| mime.essence_str().to_string())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lower-cased image extension of the address path, if recognized.
fn image_extension(address: &str) -> Option<&'static str> {
    let path = match url::Url::parse(address) {
        Ok(url) => url.path().to_string(),
        Err(_) => address
            .split(['?', '#'])
            .next()
            .unwrap_or(address)
            .to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if ext == "jpe" {
        return Some("jpg");
    }
    KEY_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_shape() {
        let id = RecordId::new("oai:repo:1");
        let key = ObjectKey::derive(&id, "http://x.org/img/Photo.JPG?size=large");
        let (prefix, file) = key.as_str().split_once('/').unwrap();
        assert_eq!(prefix, "oai%3Arepo%3A1");
        assert_eq!(file.len(), 16 + ".jpg".len());
        assert!(file.ends_with(".jpg"));
        assert!(file[..16].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_object_key_is_deterministic() {
        let id = RecordId::new("r");
        let a = ObjectKey::derive(&id, "http://x.org/a.png");
        assert_eq!(a, ObjectKey::derive(&id, "http://x.org/a.png"));
        assert_ne!(a, ObjectKey::derive(&id, "http://x.org/b.png"));
        assert_ne!(a, ObjectKey::derive(&RecordId::new("s"), "http://x.org/a.png"));
    }

    #[test]
    fn test_object_key_extensions() {
        let id = RecordId::new("r");
        assert!(ObjectKey::derive(&id, "http://x.org/a.jpe").as_str().ends_with(".jpg"));
        assert!(ObjectKey::derive(&id, "http://x.org/a.TIFF").as_str().ends_with(".tiff"));
        let no_ext = ObjectKey::derive(&id, "http://x.org/get?file=thumbnail");
        assert_eq!(no_ext.as_str().len(), "r/".len() + 16);
        let unknown = ObjectKey::derive(&id, "http://x.org/a.html");
        assert!(!unknown.as_str().contains('.'));
    }

    #[test]
    fn test_content_type_from_key() {
        let id = RecordId::new("r");
        let key = ObjectKey::derive(&id, "http://x.org/a.png");
        assert_eq!(key.content_type().as_deref(), Some("image/png"));
        let bare = ObjectKey::derive(&id, "http://x.org/get?file=thumbnail");
        assert_eq!(bare.content_type(), None);
    }

    #[test]
    fn test_change_event_record_id() {
        let event = ChangeEvent::deleted("/h/i/c/oai%3Ax%3A9.xml").from_reconciler();
        assert_eq!(event.kind, ChangeKind::Deleted);
        assert_eq!(event.origin, EventOrigin::Reconciler);
        assert_eq!(event.record_id().unwrap().as_str(), "oai:x:9");
    }
}
