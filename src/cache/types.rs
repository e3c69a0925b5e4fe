use crate::ledger::Transaction;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Field-reduced transaction kept in the caches and the reactive store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
	pub id: String,
	pub date: NaiveDate,
	pub amount: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payee_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub memo: Option<String>,
	pub account_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category_name: Option<String>,
	#[serde(default)]
	pub deleted: bool,
	#[serde(default)]
	pub cleared: bool,
}

impl TransactionRecord {
	pub fn memo(&self) -> &str {
		self.memo.as_deref().unwrap_or("")
	}
}

impl From<Transaction> for TransactionRecord {
	fn from(t: Transaction) -> Self {
		Self {
			id: t.id,
			date: t.date,
			amount: t.amount,
			payee_name: t.payee_name,
			memo: t.memo,
			account_id: t.account_id,
			category_id: t.category_id,
			category_name: t.category_name,
			deleted: t.deleted,
			cleared: t.cleared,
		}
	}
}

/// Persisted transaction cache for one ledger.
///
/// `records` always reflects every change up to `server_knowledge`; the cursor is only
/// advanced after a merge succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCacheEntry {
	pub ledger_id: String,
	pub records: Vec<TransactionRecord>,
	/// Incremental sync cursor returned by the last listing.
	pub server_knowledge: u64,
	/// Earliest date the records are known to cover.
	pub since: NaiveDate,
	pub fetched_at: DateTime<Utc>,
}

/// Aggregate value cached with the time it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cached<T> {
	pub value: T,
	pub fetched_at: DateTime<Utc>,
}

impl<T> Cached<T> {
	pub fn now(value: T) -> Self {
		Self {
			value,
			fetched_at: Utc::now(),
		}
	}
}

/// Whether a cache write reached the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
	Stored,
	/// The quota could not be met; the value lives in process memory only.
	Degraded,
}

/// Summary of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
	pub stages_run: usize,
	pub bytes_freed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("Quota exceeded: {needed} bytes needed, {available} available")]
	QuotaExceeded { needed: usize, available: usize },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}
