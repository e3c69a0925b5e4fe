//! Ledger synchronization module
//!
//! This module keeps local copies of remote ledgers in step with the service:
//!
//! - `manager`: The `SyncCacheManager`, the two-tier cache (in-process and persistent) with
//!   delta synchronization and fallback to cached copies.
//! - `strategies`: The fetch decision (memory, delta, full) and the merge of changed records.
//! - `tracker`: Per-session statistics of how reads were served.
//! - `writes`: The mutation API. Every write updates the reactive store and invalidates its
//!   own cache entry.

use crate::cache::CacheError;
use crate::ledger::LedgerError;

/// Two-tier cache manager
mod manager;
/// Fetch decisions and merging
pub mod strategies;
/// Sync statistics
pub mod tracker;
/// Centralised write API
mod writes;

pub use manager::SyncCacheManager;
pub use strategies::{FetchRequest, FetchSource, SyncConfig};
pub use tracker::SyncStats;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("No shared ledger or participants configured")]
	NotConfigured,
}
