//! # Record Metadata Module
//!
//! Turns harvested Dublin Core files into index-ready records.
//!
//! ## Overview
//!
//! This module handles:
//! - Record identity derived from the file name
//! - Dublin Core XML parsing (`oai_dc` or bare `<dc>`)
//! - Field mapping to `<element>_keyword` index fields
//! - Remote image detection for mirroring
//! - External link ranking
//! - Decade facets from free-form dates
//! - Institution and collection names from the harvester settings and the
//!   repository's OAI-PMH set listing
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::{Fingerprint, RecordTransformer};
//!
//! let transformer = RecordTransformer::default();
//! let record = transformer.transform(path, &bytes, Fingerprint::new(len, mtime)).await?;
//! println!("{} has {} images", record.id, record.image_addresses.len());
//! ```

pub mod dates;
pub mod dublin_core;
pub mod error;
pub mod harvest_settings;
pub mod images;
pub mod links;
pub mod oai_sets;
pub mod record;
pub mod transformer;

pub use dublin_core::DublinCoreRecord;
pub use error::{MetadataError, Result};
pub use harvest_settings::{HarvestEntry, HarvestSettings, SharedHarvestSettings};
pub use images::ImageDetector;
pub use oai_sets::OaiSetCatalog;
pub use record::{Fingerprint, Record, RecordId};
pub use transformer::{fields, RecordTransformer};
