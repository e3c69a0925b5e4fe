//! Persistent cache module
//!
//! This module provides the quota-bounded persistent tier used by the sync cache manager:
//!
//! - `repositories`: Pluggable key/value storage (file-backed and in-memory) with a byte quota.
//! - `store`: Namespaced access (credential, config, aggregates, per-ledger transactions,
//!   balancing journal), write-through with a single retry and progressive eviction.
//! - `types`: The cached projections and the cache error type.

/// Quota-bounded key/value repositories
mod repositories;
/// Namespaced persistent store with eviction
mod store;
/// Cached projections and errors
mod types;

pub use repositories::{CacheRepository, FileCacheRepository, MemoryCacheRepository};
pub use store::{
    AGGREGATE_PREFIX, BALANCING_PREFIX, PersistentCacheStore, TRANSACTIONS_PREFIX, aggregate_key,
    balancing_key, ledger_key,
};
pub use types::*;
