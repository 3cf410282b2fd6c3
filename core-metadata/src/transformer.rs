//! Raw record bytes to index-ready [`Record`]
//!
//! Apart from the harvest settings and the OAI-PMH set names, the
//! transformation is pure: the same bytes at the same path always produce
//! the same record.

use bridge_traits::index::{FieldValue, IndexDocument};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::dates;
use crate::dublin_core::{DublinCoreRecord, DC_ELEMENTS};
use crate::error::Result;
use crate::harvest_settings::{HarvestEntry, SharedHarvestSettings};
use crate::images::ImageDetector;
use crate::links;
use crate::oai_sets::OaiSetCatalog;
use crate::record::{Fingerprint, Record, RecordId};

/// Document field names
pub mod fields {
    pub const ID: &str = "id";
    pub const FIRST_TITLE: &str = "first_title";
    pub const INSTITUTION_KEY: &str = "institutionKey";
    pub const INSTITUTION_NAME: &str = "institutionName";
    pub const COLLECTION_KEY: &str = "collectionKey";
    pub const COLLECTION_NAME: &str = "collectionName";
    pub const DECADE: &str = "decade";
    pub const SORT_DECADE: &str = "sort_decade";
    pub const EXTERNAL_LINK: &str = "external_link";
    pub const ALTERNATE_EXTERNAL_LINK: &str = "alternate_external_link";
    pub const THUMBNAIL_URL: &str = "thumbnail_url";
    pub const IMAGE_URLS: &str = "image_urls";
}

/// Index field for a Dublin Core element.
pub fn keyword_field(element: &str) -> String {
    format!("{}_keyword", element)
}

/// Builds records from Dublin Core files laid out as
/// `<root>/<institution>/<collection>/<record file>`.
#[derive(Debug, Clone, Default)]
pub struct RecordTransformer {
    images: ImageDetector,
    settings: SharedHarvestSettings,
    sets: Option<OaiSetCatalog>,
}

/// Where a record came from, as shown in the index.
#[derive(Debug, Default, PartialEq, Eq)]
struct Provenance {
    institution_key: String,
    institution_name: Option<String>,
    collection_key: String,
    collection_name: Option<String>,
}

impl RecordTransformer {
    pub fn new(images: ImageDetector, settings: SharedHarvestSettings) -> Self {
        Self {
            images,
            settings,
            sets: None,
        }
    }

    /// Resolve collection names through the repositories' `ListSets`.
    ///
    /// Without a catalog the set name falls back to the harvest entry's
    /// `set_name`, then its `set_spec`.
    pub fn with_set_catalog(mut self, catalog: OaiSetCatalog) -> Self {
        self.sets = Some(catalog);
        self
    }

    pub fn settings(&self) -> &SharedHarvestSettings {
        &self.settings
    }

    /// Parse and transform one record file.
    ///
    /// # Errors
    ///
    /// Fails when the path yields no record id, the bytes are not a Dublin
    /// Core record, or the collection's set name cannot be resolved.
    pub async fn transform(
        &self,
        path: &Path,
        bytes: &[u8],
        fingerprint: Fingerprint,
    ) -> Result<Record> {
        let id = RecordId::from_path(path)?;
        let dc = DublinCoreRecord::parse(bytes)?;
        let provenance = self.provenance(path).await?;

        let mut document = IndexDocument::new();
        document.insert(fields::ID.to_string(), FieldValue::Text(id.to_string()));

        add_dublin_core_fields(&mut document, &dc);
        add_provenance(&mut document, &provenance);
        add_decades(&mut document, &dc);

        let links = links::external_links(&dc, &id, &provenance.institution_key);
        if let Some(primary) = links.primary {
            document.insert(fields::EXTERNAL_LINK.to_string(), FieldValue::Text(primary));
            if !links.alternates.is_empty() {
                document.insert(
                    fields::ALTERNATE_EXTERNAL_LINK.to_string(),
                    FieldValue::List(links.alternates),
                );
            }
        }

        let image_addresses = self.images.detect(&dc);
        debug!(
            record_id = %id,
            fields = document.len(),
            images = image_addresses.len(),
            "Transformed record"
        );

        let content_hash = content_hash(&document, &image_addresses);
        Ok(Record {
            id,
            fields: document,
            image_addresses,
            source_path: path.to_path_buf(),
            fingerprint,
            content_hash,
        })
    }

    async fn provenance(&self, path: &Path) -> Result<Provenance> {
        let collection_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let mut provenance = Provenance {
            institution_key: dir_name(collection_dir.parent()),
            collection_key: dir_name(Some(collection_dir)),
            ..Provenance::default()
        };

        let Some(entry) = self.settings.lookup(collection_dir) else {
            return Ok(provenance);
        };
        provenance.institution_name = Some(entry.repository_name.clone());
        if !entry.set_spec.is_empty() {
            provenance.collection_key = entry.set_spec.clone();
        }
        provenance.collection_name = self.collection_name(&entry).await?;
        Ok(provenance)
    }

    async fn collection_name(&self, entry: &HarvestEntry) -> Result<Option<String>> {
        if let Some(name) = entry.set_name.as_deref().filter(|n| !n.is_empty()) {
            return Ok(Some(name.to_string()));
        }
        if entry.set_spec.is_empty() {
            return Ok(None);
        }
        match &self.sets {
            Some(catalog) => catalog
                .set_name(&entry.base_url, &entry.set_spec)
                .await
                .map(Some),
            None => Ok(entry.collection_name().map(str::to_string)),
        }
    }
}

/// Hex SHA-256 over the document and image addresses.
///
/// Covers everything that reaches the index, so a settings change that
/// renames an institution or collection changes the hash even when the file
/// bytes do not.
pub fn content_hash(document: &IndexDocument, image_addresses: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in document {
        hasher.update(key.as_bytes());
        hasher.update(b"\x1d");
        match value {
            FieldValue::Text(text) => {
                hasher.update(b"t");
                hasher.update(text.as_bytes());
                hasher.update(b"\x1f");
            }
            FieldValue::List(values) => {
                hasher.update(b"l");
                for value in values {
                    hasher.update(value.as_bytes());
                    hasher.update(b"\x1f");
                }
            }
        }
        hasher.update(b"\x1e");
    }
    hasher.update(b"\x1c");
    for address in image_addresses {
        hasher.update(address.as_bytes());
        hasher.update(b"\x1f");
    }
    format!("{:x}", hasher.finalize())
}

fn dir_name(path: Option<&Path>) -> String {
    path.and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn push_value(document: &mut IndexDocument, key: String, value: &str) {
    document
        .entry(key)
        .and_modify(|slot| {
            let mut values = match std::mem::replace(slot, FieldValue::List(Vec::new())) {
                FieldValue::Text(first) => vec![first],
                FieldValue::List(values) => values,
            };
            values.push(value.to_string());
            *slot = FieldValue::List(values);
        })
        .or_insert_with(|| FieldValue::Text(value.to_string()));
}

fn add_dublin_core_fields(document: &mut IndexDocument, dc: &DublinCoreRecord) {
    for element in dc.elements() {
        if !DC_ELEMENTS.contains(&element.name.as_str()) {
            continue;
        }
        push_value(document, keyword_field(&element.name), &element.value);
        if element.name == "title" && !document.contains_key(fields::FIRST_TITLE) {
            document.insert(
                fields::FIRST_TITLE.to_string(),
                FieldValue::Text(element.value.clone()),
            );
        }
    }
}

fn add_provenance(document: &mut IndexDocument, provenance: &Provenance) {
    if !provenance.institution_key.is_empty() {
        document.insert(
            fields::INSTITUTION_KEY.to_string(),
            FieldValue::Text(provenance.institution_key.clone()),
        );
    }
    if !provenance.collection_key.is_empty() {
        document.insert(
            fields::COLLECTION_KEY.to_string(),
            FieldValue::List(vec![provenance.collection_key.clone()]),
        );
    }
    if let Some(name) = &provenance.institution_name {
        document.insert(
            fields::INSTITUTION_NAME.to_string(),
            FieldValue::Text(name.clone()),
        );
    }
    if let Some(name) = &provenance.collection_name {
        document.insert(
            fields::COLLECTION_NAME.to_string(),
            FieldValue::List(vec![name.clone()]),
        );
    }
}

fn add_decades(document: &mut IndexDocument, dc: &DublinCoreRecord) {
    let decades = dates::decades(dc.values("date"));
    let Some(earliest) = decades.first() else {
        return;
    };
    document.insert(
        fields::SORT_DECADE.to_string(),
        FieldValue::Text(earliest.to_string()),
    );
    document.insert(
        fields::DECADE.to_string(),
        FieldValue::List(decades.iter().map(i32::to_string).collect()),
    );
}
