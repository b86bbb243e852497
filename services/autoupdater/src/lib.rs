//! Autoupdater Library
//!
//! Watches a container registry tag and updates a running service whenever
//! the tag's image digest changes.
//!
//! ## Architecture
//!
//! ```text
//! ActiveFetcher (one per watched service)
//! ├── RegistryClient   (token + manifest lookups, from autoupdater-registry)
//! └── Updater          (applies the update, reports on an UpdateHandle)
//! ```
//!
//! The fetcher has no concurrency of its own: [`ActiveFetcher::start`] runs
//! the polling loop on the caller's task. Only update outcomes are observed
//! on spawned tasks.
//!
//! ## Modules
//!
//! - `config`: Environment configuration for the binary
//! - `fetcher`: The polling state machine
//! - `updater`: The updater capability and its implementations

pub mod config;
pub mod fetcher;
pub mod updater;

// Re-export commonly used types
pub use fetcher::{ActiveFetcher, FetcherError, FetcherState, DEFAULT_POLL_INTERVAL};
pub use updater::{
    CommandUpdater, MockUpdater, UpdateCall, UpdateError, UpdateHandle, UpdateReporter, Updater,
};
