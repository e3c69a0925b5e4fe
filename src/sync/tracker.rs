//! Per-session statistics of the sync cache manager.
//!
//! The `SyncTracker` records how each ledger read was served (in-process cache, delta sync,
//! full fetch, or fallback to a stale cache after a remote failure) and how many records came
//! back from the remote service, so a session can be summarised in the log.

use std::collections::BTreeSet;
use tracing::{info, warn};

/// How one read was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
	Memory,
	Delta,
	Full,
	/// The remote call failed and a cached copy was returned instead.
	Fallback,
}

#[derive(Debug, Clone, Default)]
pub struct SyncTracker {
	memory_hits: usize,
	delta_syncs: usize,
	full_fetches: usize,
	fallbacks: usize,
	failures: usize,
	records_received: usize,
	ledgers: BTreeSet<String>,
}

impl SyncTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a served read and the number of records the remote service returned for it.
	pub fn record(&mut self, ledger_id: &str, served: Served, received: usize) {
		match served {
			Served::Memory => self.memory_hits += 1,
			Served::Delta => self.delta_syncs += 1,
			Served::Full => self.full_fetches += 1,
			Served::Fallback => self.fallbacks += 1,
		}
		self.records_received += received;
		self.ledgers.insert(ledger_id.to_string());
	}

	/// Record a read that failed with no cache to fall back to.
	pub fn record_failure(&mut self, ledger_id: &str) {
		self.failures += 1;
		warn!("Ledger {} could not be read and has no cached copy", ledger_id);
	}

	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			ledgers: self.ledgers.len(),
			memory_hits: self.memory_hits,
			delta_syncs: self.delta_syncs,
			full_fetches: self.full_fetches,
			fallbacks: self.fallbacks,
			failures: self.failures,
			records_received: self.records_received,
		}
	}

	pub fn log_summary(&self) {
		info!("{}", self.get_stats().summary());
	}
}

/// Statistics about the sync session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
	pub ledgers: usize,
	pub memory_hits: usize,
	pub delta_syncs: usize,
	pub full_fetches: usize,
	pub fallbacks: usize,
	pub failures: usize,
	pub records_received: usize,
}

impl SyncStats {
	/// Get a human-readable summary of the sync statistics
	pub fn summary(&self) -> String {
		format!(
			"Synced {} ledger(s): {} from memory, {} delta, {} full, {} records received{}",
			self.ledgers,
			self.memory_hits,
			self.delta_syncs,
			self.full_fetches,
			self.records_received,
			if self.fallbacks + self.failures == 0 {
				String::new()
			} else {
				format!(" ({} served stale, {} failed)", self.fallbacks, self.failures)
			}
		)
	}
}
