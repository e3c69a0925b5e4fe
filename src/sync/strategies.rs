use crate::cache::{LedgerCacheEntry, TransactionRecord};
use crate::ledger::{Transaction, TransactionQuery};

use chrono::NaiveDate;
use std::time::Duration;

/// How a read is going to be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
	/// The in-process entry is fresh and covers the requested floor.
	Memory,
	/// Ask the remote service for changes since the cached cursor.
	Delta { cursor: u64 },
	/// Fetch everything from the requested floor, replacing the cache.
	Full { since: NaiveDate },
}

impl FetchSource {
	/// Query for the remote listing, `None` when no remote call is needed.
	pub fn query(&self) -> Option<TransactionQuery> {
		match *self {
			FetchSource::Memory => None,
			FetchSource::Delta { cursor } => Some(TransactionQuery {
				since_date: None,
				last_knowledge_of_server: Some(cursor),
			}),
			FetchSource::Full { since } => Some(TransactionQuery {
				since_date: Some(since),
				last_knowledge_of_server: None,
			}),
		}
	}
}

/// One read request against a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRequest {
	/// Earliest date the caller needs. Defaults to the configured look-back.
	pub since: Option<NaiveDate>,
	/// Skip every cache and fetch in full.
	pub force_refresh: bool,
}

impl FetchRequest {
	pub fn since(date: NaiveDate) -> Self {
		Self {
			since: Some(date),
			force_refresh: false,
		}
	}

	pub fn refresh() -> Self {
		Self {
			since: None,
			force_refresh: true,
		}
	}
}

/// Configuration for the sync cache manager
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// How long an in-process entry is served without a remote call
	pub freshness: Duration,
	/// Default requested floor, in years before today
	pub lookback_years: u32,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			freshness: Duration::from_secs(600),
			lookback_years: 2,
		}
	}
}

/// Pick the cheapest source able to answer the request.
///
/// `memory` is the in-process entry with its freshness, `base` is the entry a delta would be
/// merged into (the in-process one when present, else the persisted one).
pub fn choose_source(
	request: &FetchRequest,
	floor: NaiveDate,
	memory: Option<(&LedgerCacheEntry, bool)>,
	base: Option<&LedgerCacheEntry>,
) -> FetchSource {
	if request.force_refresh {
		return FetchSource::Full { since: floor };
	}
	if let Some((entry, fresh)) = memory {
		if fresh && entry.since <= floor {
			return FetchSource::Memory;
		}
	}
	match base {
		Some(entry) if entry.since <= floor => FetchSource::Delta {
			cursor: entry.server_knowledge,
		},
		_ => FetchSource::Full { since: floor },
	}
}

/// Merge changed or deleted records into `records` by id. Deleted records are removed, the rest
/// replace the record with the same id or are appended.
pub fn merge_changes(records: &mut Vec<TransactionRecord>, changes: Vec<Transaction>) -> MergeStats {
	let mut stats = MergeStats::default();
	for change in changes {
		let position = records.iter().position(|r| r.id == change.id);
		match (position, change.deleted) {
			(Some(pos), true) => {
				records.remove(pos);
				stats.removed += 1;
			}
			(None, true) => {}
			(Some(pos), false) => {
				records[pos] = change.into();
				stats.updated += 1;
			}
			(None, false) => {
				records.push(change.into());
				stats.added += 1;
			}
		}
	}
	stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
	pub added: usize,
	pub updated: usize,
	pub removed: usize,
}

impl MergeStats {
	pub fn is_empty(&self) -> bool {
		self.added + self.updated + self.removed == 0
	}
}
