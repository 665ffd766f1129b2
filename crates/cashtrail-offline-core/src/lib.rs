//! Core library for the CashTrail offline cache.
//!
//! This crate models the CashTrail service worker as plain async Rust:
//! - `OfflineCacheManager` with the install, activate and fetch handlers
//! - `CacheStorage` and `Network`, the collaborators it is generic over
//! - `WorkerConfig`, the immutable cache version, manifest and fetch policy
//!
//! Hosts supply a storage, a network and a `WorkerHost` for the lifecycle
//! signals, then drive the handlers in order: install, activate, then one
//! `on_fetch` per intercepted request.

pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod network;
pub mod policy;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{CacheError, NetworkError, WorkerError};
pub use event::{ExtendableEvent, FetchOutcome, RecordingHost, ResponseSource, WorkerHost, WorkerState};
pub use http::{CacheKey, Destination, Request, RequestMode, Response, ResponseType};
pub use network::{HttpNetwork, Network};
pub use policy::{FetchPolicy, PolicyTable, Strategy};
pub use store::{CacheStorage, CachedResponse, DiskCacheStorage, MemoryCacheStorage};
pub use worker::{ActivateSummary, OfflineCacheManager};

/// Re-exported so hosts can build requests without a direct dependency.
pub use reqwest::Method;
pub use url::Url;
