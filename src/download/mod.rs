//! Parallel download engine.
//!
//! This module turns a batch of [`DescriptorHandle`](crate::registry::DescriptorHandle)s
//! into files on disk.
//!
//! # Features
//!
//! - One GET per item through a pluggable [`Transport`]
//! - Streaming SHA-256 while writing, into `<out_path>.part`
//! - Verification against a recorded digest and the advertised length
//! - Atomic rename into place
//! - "Already downloaded" fast path that re-hashes the file instead of fetching
//! - Per-item error isolation; a full disk cancels the batch
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirrorer_core::download::{DownloadEngine, EngineOptions, HttpClient};
//! use mirrorer_core::registry::DownloadRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = DownloadRegistry::new();
//! registry.add_download("https://example.com/files/a.zip")?;
//!
//! let engine = DownloadEngine::new(Arc::new(HttpClient::new()?), EngineOptions::default());
//! let outcome = engine.run(&registry.pending()).await;
//! println!("completed: {}, failed: {}", outcome.completed, outcome.failed());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod transport;

pub use client::HttpClient;
pub use constants::{CONNECT_TIMEOUT_SECS, PARTIAL_SUFFIX, READ_TIMEOUT_SECS};
pub use engine::{DownloadEngine, DownloadStats, EngineOptions, ItemCallback, RunError, RunOutcome};
pub use error::{BoxError, DownloadError};
pub use transport::{FetchRequest, FetchResponse, Transport};
