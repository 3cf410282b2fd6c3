//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the indexer crates:
//! - Logging and tracing setup
//! - Indexer configuration (TOML file plus builder)
//! - Lifecycle event bus
//!
//! ## Overview
//!
//! Every other `core-*` crate depends on this one for its configuration
//! types and for the `EventBus` through which record outcomes are reported.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::IndexerConfig;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
