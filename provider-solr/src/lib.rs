//! # Solr Provider
//!
//! Implements the `SearchIndex` bridge trait on top of Solr's JSON update API.
//!
//! ## Overview
//!
//! - Whole-document upserts keyed by the core's `id` unique key
//! - Delete-by-id (deleting an unknown id succeeds)
//! - `commitWithin` soft commits instead of explicit hard commits
//! - Error classification into transient (5xx, 429) and permanent failures

pub mod connector;
pub mod error;
pub mod types;

pub use connector::SolrIndex;
pub use error::{Result, SolrError};
