//! Mirrorer Core Library
//!
//! Resumable mirroring of a remote content library to local storage. A mirror
//! can be interrupted, resumed and re-run indefinitely without fetching or
//! re-verifying unchanged data.
//!
//! # Architecture
//!
//! - [`registry`] - URL-keyed, idempotent download descriptors
//! - [`state`] - Versioned state document with entity caches and migrations
//! - [`integrity`] - Streaming SHA-256 over bytes in transit
//! - [`download`] - Bounded-concurrency fetch/verify/materialize engine
//! - [`controller`] - Checkpoint and staged-interrupt control of a run
//! - [`session`] - Load, register, download, save
//! - [`catalog`] - Typed views over cached entity payloads

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod controller;
pub mod download;
pub mod integrity;
pub mod registry;
pub mod session;
pub mod state;
mod user_agent;

// Re-export commonly used types
pub use catalog::{Entity, OpenGraph, collect_ids};
pub use controller::{Notification, RunPhase, forward_os_signals};
pub use download::{
    DownloadEngine, DownloadError, EngineOptions, HttpClient, RunError, RunOutcome, Transport,
};
pub use registry::{DescriptorHandle, DownloadDescriptor, DownloadRegistry, RegistryError};
pub use session::{MirrorSession, SessionError, VerifyReport};
pub use state::{CURRENT_STATE_VERSION, StateDocument, StateError, StateStats};
pub use user_agent::default_user_agent;
