//! Offline cache for the static asset bundle.
//!
//! This module provides the `OfflineCache` which decides, per request,
//! whether to answer from the local cache, the network, or both:
//!
//! - Live audio streams are never intercepted
//! - API and backend calls always go to the network
//! - Static assets are cache-first with background revalidation
//! - Everything else is network-first with the cached copy as fallback
//!
//! One named cache generation is current at a time. Installing a new
//! version populates its generation; activating it deletes the others.

pub mod fetcher;
pub mod manager;
pub mod route;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use fetcher::{AssetRequest, AssetResponse, FetchError, Fetcher, HttpFetcher, ResponseSource};
pub use manager::{OfflineCache, OfflineError, Routed, WorkerState};
pub use route::{RoutePolicy, RouteRules};
pub use storage::{CacheStorage, CachedAsset, DiskStorage, MemoryStorage};
pub use worker::{ControlMessage, InstallOutcome, WorkerError, WorkerHandle};
