//! # Desktop Bridge Implementations
//!
//! Native implementations of the bridge traits for Linux, macOS and Windows
//! hosts.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `FileWatcher` using `notify`
//! - `ObjectStore` as a local directory tree or a REST endpoint
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalObjectStore, NotifyWatcher, ReqwestHttpClient, TokioFileSystem};
//! use std::time::Duration;
//!
//! let http = ReqwestHttpClient::with_timeout(Duration::from_secs(30))?;
//! let fs = TokioFileSystem::new();
//! let store = LocalObjectStore::new("/srv/thumbnails", "https://thumbs.example.org");
//! let watcher = NotifyWatcher::new();
//! ```

mod filesystem;
mod http;
mod object_store;
mod watcher;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use object_store::{HttpObjectStore, LocalObjectStore};
pub use watcher::NotifyWatcher;
