//! Sync cache manager and integration point for the cache tiers.
//!
//! This module defines the `SyncCacheManager`, which answers every ledger read from the
//! cheapest source able to serve it:
//!
//! 1. the in-process entry, while it is fresh and covers the requested floor,
//! 2. a delta sync from the cached cursor, merged into the cached records by id,
//! 3. a full fetch from the requested floor.
//!
//! When the remote service fails, the most specific cached copy is served instead and a warning
//! is shown once per session; the error only reaches the caller when nothing is cached. Every
//! successful fetch is projected, persisted, kept in process and pushed into the reactive store.

use crate::cache::{Cached, LedgerCacheEntry, PersistentCacheStore, TransactionRecord, WriteOutcome};
use crate::ledger::{LedgerApi, LedgerDetail, LedgerError, LedgerSummary};
use crate::notify::{NoticeLevel, Notifier};
use crate::store::LedgerStore;
use crate::sync::SyncError;
use crate::sync::strategies::{FetchRequest, FetchSource, SyncConfig, choose_source, merge_changes};
use crate::sync::tracker::{Served, SyncStats, SyncTracker};
use crate::utils::{today, years_before};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const LEDGERS_AGGREGATE: &str = "ledgers";
const LAST_FETCH_AGGREGATE: &str = "last_fetch";

pub(super) fn detail_aggregate(ledger_id: &str) -> String {
	format!("detail:{ledger_id}")
}

/// In-process copy of a ledger's cache entry.
struct MemoryEntry {
	entry: LedgerCacheEntry,
	/// `None` once invalidated or when the copy was served as a fallback.
	loaded_at: Option<Instant>,
}

/// Two-tier transaction cache in front of the remote ledger service.
pub struct SyncCacheManager {
	pub(super) api: Arc<dyn LedgerApi>,
	pub(super) cache: Arc<PersistentCacheStore>,
	pub(super) store: Arc<LedgerStore>,
	notifier: Arc<dyn Notifier>,
	config: SyncConfig,
	memory: Mutex<HashMap<String, MemoryEntry>>,
	/// Whether the one-time offline warning was shown in this session.
	fallback_warned: AtomicBool,
	tracker: Mutex<SyncTracker>,
}

impl SyncCacheManager {
	pub fn new(
		api: Arc<dyn LedgerApi>,
		cache: Arc<PersistentCacheStore>,
		store: Arc<LedgerStore>,
		notifier: Arc<dyn Notifier>,
		config: SyncConfig,
	) -> Self {
		Self {
			api,
			cache,
			store,
			notifier,
			config,
			memory: Mutex::new(HashMap::new()),
			fallback_warned: AtomicBool::new(false),
			tracker: Mutex::new(SyncTracker::new()),
		}
	}

	fn memory(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
		self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn tracker(&self) -> MutexGuard<'_, SyncTracker> {
		self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Floor used when a request does not name one.
	pub fn default_floor(&self) -> NaiveDate {
		years_before(today(), self.config.lookback_years)
	}

	/// The in-process entry with its freshness.
	fn memory_entry(&self, ledger_id: &str) -> Option<(LedgerCacheEntry, bool)> {
		self.memory().get(ledger_id).map(|m| {
			let fresh = m
				.loaded_at
				.is_some_and(|at| at.elapsed() < self.config.freshness);
			(m.entry.clone(), fresh)
		})
	}

	/// Mark the in-process entry stale so the next read runs a delta sync.
	pub fn invalidate(&self, ledger_id: &str) {
		if let Some(entry) = self.memory().get_mut(ledger_id) {
			entry.loaded_at = None;
			debug!("Invalidated in-process cache of ledger {}", ledger_id);
		}
	}

	/// Read a ledger's transactions, syncing with the remote service as needed.
	pub async fn fetch_transactions(
		&self,
		ledger_id: &str,
		request: FetchRequest,
	) -> Result<Vec<TransactionRecord>, SyncError> {
		let floor = request.since.unwrap_or_else(|| self.default_floor());
		let memory = self.memory_entry(ledger_id);
		let base = match &memory {
			Some((entry, _)) => Some(entry.clone()),
			None => self.cache.load_ledger_entry(ledger_id).await,
		};
		let source = choose_source(
			&request,
			floor,
			memory.as_ref().map(|(entry, fresh)| (entry, *fresh)),
			base.as_ref(),
		);
		debug!("Ledger {}: serving from {:?}", ledger_id, source);

		let Some(query) = source.query() else {
			self.tracker().record(ledger_id, Served::Memory, 0);
			return Ok(memory.map(|(entry, _)| entry.records).unwrap_or_default());
		};

		match self.api.list_transactions(ledger_id, query).await {
			Ok(page) => {
				let received = page.transactions.len();
				let (entry, served) = match (source, base) {
					(FetchSource::Delta { .. }, Some(mut entry)) => {
						let stats = merge_changes(&mut entry.records, page.transactions);
						debug!(
							"Ledger {}: delta {} -> {} ({} added, {} updated, {} removed)",
							ledger_id,
							entry.server_knowledge,
							page.server_knowledge,
							stats.added,
							stats.updated,
							stats.removed
						);
						entry.server_knowledge = page.server_knowledge;
						entry.fetched_at = Utc::now();
						(entry, Served::Delta)
					}
					_ => {
						let since = match source {
							FetchSource::Full { since } => since,
							_ => floor,
						};
						let entry = LedgerCacheEntry {
							ledger_id: ledger_id.to_string(),
							records: page
								.transactions
								.into_iter()
								.filter(|t| !t.deleted)
								.map(TransactionRecord::from)
								.collect(),
							server_knowledge: page.server_knowledge,
							since,
							fetched_at: Utc::now(),
						};
						info!(
							"Ledger {}: full fetch since {}, {} records",
							ledger_id,
							since,
							entry.records.len()
						);
						(entry, Served::Full)
					}
				};
				self.tracker().record(ledger_id, served, received);
				Ok(self.commit(entry).await)
			}
			Err(e) => self.fall_back(ledger_id, e, base),
		}
	}

	/// Persist, keep in process and publish a freshly synced entry.
	async fn commit(&self, entry: LedgerCacheEntry) -> Vec<TransactionRecord> {
		if self.cache.save_ledger_entry(&entry).await == WriteOutcome::Degraded {
			debug!("Ledger {} kept in process only", entry.ledger_id);
		}
		self.record_fetch_time(&entry.ledger_id, entry.fetched_at).await;
		self.store
			.replace_transactions(&entry.ledger_id, entry.records.clone());
		let records = entry.records.clone();
		self.memory().insert(
			entry.ledger_id.clone(),
			MemoryEntry {
				entry,
				loaded_at: Some(Instant::now()),
			},
		);
		records
	}

	fn fall_back(
		&self,
		ledger_id: &str,
		error: LedgerError,
		cached: Option<LedgerCacheEntry>,
	) -> Result<Vec<TransactionRecord>, SyncError> {
		let Some(entry) = cached else {
			self.tracker().record_failure(ledger_id);
			return Err(error.into());
		};
		warn!(
			"Ledger {}: remote read failed ({}), serving cached copy from {}",
			ledger_id, error, entry.fetched_at
		);
		self.warn_once(&error);
		self.tracker().record(ledger_id, Served::Fallback, 0);
		self.store
			.replace_transactions(ledger_id, entry.records.clone());
		let records = entry.records.clone();
		self.memory()
			.entry(ledger_id.to_string())
			.or_insert(MemoryEntry {
				entry,
				loaded_at: None,
			});
		Ok(records)
	}

	fn warn_once(&self, error: &LedgerError) {
		if !self.fallback_warned.swap(true, Ordering::Relaxed) {
			self.notifier.notify(
				NoticeLevel::Warning,
				&format!("Could not reach the ledger service ({error}). Showing cached data."),
			);
		}
	}

	async fn record_fetch_time(&self, ledger_id: &str, at: DateTime<Utc>) {
		let mut times = self.last_fetch_times().await;
		times.insert(ledger_id.to_string(), at);
		self.cache.save_aggregate(LAST_FETCH_AGGREGATE, &times).await;
	}

	/// When each ledger was last fetched from the remote service.
	pub async fn last_fetch_times(&self) -> HashMap<String, DateTime<Utc>> {
		self.cache
			.load_aggregate(LAST_FETCH_AGGREGATE)
			.await
			.unwrap_or_default()
	}

	fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
		Utc::now()
			.signed_duration_since(fetched_at)
			.to_std()
			.is_ok_and(|age| age < self.config.freshness)
	}

	/// Serve an aggregate from the persistent cache while fresh, else fetch it. `fetch` gets
	/// the stale cached value, if any. A failed fetch falls back to the stale value.
	async fn aggregate<T, F, Fut>(&self, name: &str, force: bool, fetch: F) -> Result<T, SyncError>
	where
		T: Serialize + DeserializeOwned + Clone + Send + Sync,
		F: FnOnce(Option<T>) -> Fut,
		Fut: Future<Output = Result<T, LedgerError>>,
	{
		let cached: Option<Cached<T>> = self.cache.load_aggregate(name).await;
		if let Some(cached) = &cached {
			if !force && self.is_fresh(cached.fetched_at) {
				return Ok(cached.value.clone());
			}
		}

		match fetch(cached.as_ref().map(|c| c.value.clone())).await {
			Ok(value) => {
				self.cache.save_aggregate(name, &Cached::now(value.clone())).await;
				Ok(value)
			}
			Err(e) => match cached {
				Some(cached) => {
					warn!("Aggregate {}: remote read failed ({}), serving cached copy", name, e);
					self.warn_once(&e);
					Ok(cached.value)
				}
				None => Err(e.into()),
			},
		}
	}

	pub async fn ledgers(&self, force: bool) -> Result<Vec<LedgerSummary>, SyncError> {
		self.aggregate(LEDGERS_AGGREGATE, force, |_| self.api.list_ledgers())
			.await
	}

	/// Ledger detail, refreshed incrementally from the cached cursor.
	pub async fn ledger_detail(&self, ledger_id: &str, force: bool) -> Result<LedgerDetail, SyncError> {
		self.aggregate(&detail_aggregate(ledger_id), force, |previous| async move {
			let knowledge = previous.as_ref().map(|d: &LedgerDetail| d.server_knowledge);
			let changes = self.api.get_ledger(ledger_id, knowledge).await?;
			Ok(match previous {
				Some(previous) => merge_detail(previous, changes),
				None => changes,
			})
		})
		.await
	}

	/// Sync the shared ledger and every participant's personal ledger.
	///
	/// A ledger that fails is logged and skipped; the others are still synced.
	pub async fn sync_all(&self, request: FetchRequest) -> Result<SyncStats, SyncError> {
		let config = self.store.config();
		if !config.is_configured() {
			return Err(SyncError::NotConfigured);
		}
		for ledger_id in config.ledger_ids() {
			if let Err(e) = self.fetch_transactions(&ledger_id, request).await {
				error!("Failed to sync ledger {}: {}", ledger_id, e);
			}
		}
		let tracker = self.tracker();
		tracker.log_summary();
		Ok(tracker.get_stats())
	}

	pub fn stats(&self) -> SyncStats {
		self.tracker().get_stats()
	}
}

/// Apply an incremental ledger detail on top of the previous one, by id.
fn merge_detail(mut previous: LedgerDetail, changes: LedgerDetail) -> LedgerDetail {
	for account in changes.accounts {
		match previous.accounts.iter_mut().find(|a| a.id == account.id) {
			Some(existing) => *existing = account,
			None => previous.accounts.push(account),
		}
	}
	for category in changes.categories {
		match previous.categories.iter_mut().find(|c| c.id == category.id) {
			Some(existing) => *existing = category,
			None => previous.categories.push(category),
		}
	}
	previous.ledger = changes.ledger;
	previous.server_knowledge = changes.server_knowledge;
	previous
}
