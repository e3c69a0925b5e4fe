//! Persistent cache store.
//!
//! This module provides the `PersistentCacheStore`, a namespaced layer over a quota-bounded
//! [`CacheRepository`]. It persists the credential, the reconciliation config, aggregate
//! caches, one transaction cache per ledger and the balancing journal.
//!
//! Writes go through once and are retried a single time after eviction when the quota is hit.
//! Eviction frees space cheapest-first:
//!
//! 1. drop every aggregate/month cache,
//! 2. trim every ledger's cached transactions to the look-back window,
//! 3. drop the whole transaction cache.
//!
//! A ledger whose transaction cache still does not fit is marked storage-degraded for the rest
//! of the session; from then on it lives in the in-process tier only.

use crate::cache::repositories::CacheRepository;
use crate::cache::types::{CacheError, EvictionReport, LedgerCacheEntry, WriteOutcome};
use crate::config::ReconcileConfig;
use crate::utils::{today, years_before};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const CREDENTIAL_KEY: &str = "credential";
pub const CONFIG_KEY: &str = "config";
pub const AGGREGATE_PREFIX: &str = "aggregate:";
pub const TRANSACTIONS_PREFIX: &str = "tx:";
pub const BALANCING_PREFIX: &str = "balancing:";

pub fn ledger_key(ledger_id: &str) -> String {
	format!("{TRANSACTIONS_PREFIX}{ledger_id}")
}

pub fn aggregate_key(name: &str) -> String {
	format!("{AGGREGATE_PREFIX}{name}")
}

pub fn balancing_key(tag: &str) -> String {
	format!("{BALANCING_PREFIX}{tag}")
}

pub struct PersistentCacheStore {
	repo: Box<dyn CacheRepository>,
	/// Ledgers whose transaction cache no longer fits, for this session.
	degraded: Mutex<HashSet<String>>,
	/// Window kept by the trimming eviction stage.
	lookback_years: u32,
}

impl PersistentCacheStore {
	pub fn new(repo: Box<dyn CacheRepository>, lookback_years: u32) -> Self {
		Self {
			repo,
			degraded: Mutex::new(HashSet::new()),
			lookback_years,
		}
	}

	pub fn is_degraded(&self, ledger_id: &str) -> bool {
		self.degraded_set().contains(ledger_id)
	}

	fn degraded_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
		self.degraded
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
		match self.repo.get(key).await? {
			Some(content) => Ok(Some(serde_json::from_str(&content)?)),
			None => Ok(None),
		}
	}

	/// Cached values are disposable: an unreadable one is dropped instead of failing the caller.
	async fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		match self.read_json(key).await {
			Ok(value) => value,
			Err(e) => {
				warn!("Discarding unreadable cache entry {}: {}", key, e);
				let _ = self.repo.remove(key).await;
				None
			}
		}
	}

	/// Put with a single retry after eviction.
	async fn write_with_retry(&self, key: &str, content: &str) -> Result<(), CacheError> {
		match self.repo.put(key, content).await {
			Err(CacheError::QuotaExceeded { needed, available }) => {
				info!(
					"Quota exceeded writing {} ({} bytes needed, {} available), evicting",
					key, needed, available
				);
				self.evict(key, needed).await?;
				self.repo.put(key, content).await
			}
			other => other,
		}
	}

	/// Run eviction stages in order until `needed` bytes fit. `protected` is the key about to
	/// be written; it is never trimmed, and an aggregate write only evicts other aggregates.
	pub async fn evict(&self, protected: &str, needed: usize) -> Result<EvictionReport, CacheError> {
		let before = self.repo.usage().await?;
		let mut report = EvictionReport::default();
		let last_stage = if protected.starts_with(AGGREGATE_PREFIX) { 1 } else { 3 };

		for stage in 1..=last_stage {
			if self.fits(protected, needed).await? {
				break;
			}
			report.stages_run = stage;
			match stage {
				1 => self.drop_aggregates().await?,
				2 => self.trim_transaction_caches(protected).await?,
				_ => self.drop_transaction_caches().await?,
			}
		}

		let after = self.repo.usage().await?;
		report.bytes_freed = before.saturating_sub(after);
		info!(
			"Eviction ran {} stage(s), freed {} bytes",
			report.stages_run, report.bytes_freed
		);
		Ok(report)
	}

	/// Whether `needed` bytes fit once the current value of `protected` is replaced.
	async fn fits(&self, protected: &str, needed: usize) -> Result<bool, CacheError> {
		let usage = self.repo.usage().await?;
		let replaced = self.repo.get(protected).await?.map_or(0, |v| v.len());
		Ok(usage.saturating_sub(replaced) + needed <= self.repo.quota())
	}

	async fn drop_aggregates(&self) -> Result<(), CacheError> {
		for key in self.repo.keys().await? {
			if key.starts_with(AGGREGATE_PREFIX) {
				self.repo.remove(&key).await?;
			}
		}
		debug!("Dropped aggregate caches");
		Ok(())
	}

	async fn trim_transaction_caches(&self, protected: &str) -> Result<(), CacheError> {
		let floor = years_before(today(), self.lookback_years);
		for key in self.repo.keys().await? {
			if !key.starts_with(TRANSACTIONS_PREFIX) || key == protected {
				continue;
			}
			let Some(mut entry) = self.read_cached::<LedgerCacheEntry>(&key).await else {
				continue;
			};
			let before = entry.records.len();
			entry.records.retain(|r| r.date >= floor);
			entry.since = entry.since.max(floor);
			if entry.records.len() != before {
				self.repo.put(&key, &serde_json::to_string(&entry)?).await?;
				debug!(
					"Trimmed {} from {} to {} records",
					key,
					before,
					entry.records.len()
				);
			}
		}
		Ok(())
	}

	async fn drop_transaction_caches(&self) -> Result<(), CacheError> {
		for key in self.repo.keys().await? {
			if key.starts_with(TRANSACTIONS_PREFIX) {
				self.repo.remove(&key).await?;
			}
		}
		warn!("Dropped the whole transaction cache to free storage");
		Ok(())
	}

	pub async fn load_credential(&self) -> Result<Option<String>, CacheError> {
		self.read_json(CREDENTIAL_KEY).await
	}

	pub async fn save_credential(&self, token: &str) -> Result<(), CacheError> {
		self.write_with_retry(CREDENTIAL_KEY, &serde_json::to_string(token)?)
			.await
	}

	pub async fn load_config(&self) -> Result<Option<ReconcileConfig>, CacheError> {
		self.read_json(CONFIG_KEY).await
	}

	pub async fn save_config(&self, config: &ReconcileConfig) -> Result<(), CacheError> {
		self.write_with_retry(CONFIG_KEY, &serde_json::to_string(config)?)
			.await
	}

	/// Transaction cache of a ledger. Always `None` for a storage-degraded ledger.
	pub async fn load_ledger_entry(&self, ledger_id: &str) -> Option<LedgerCacheEntry> {
		if self.is_degraded(ledger_id) {
			return None;
		}
		self.read_cached(&ledger_key(ledger_id)).await
	}

	/// Persist a ledger's transaction cache. Quota failures degrade the ledger instead of
	/// surfacing.
	pub async fn save_ledger_entry(&self, entry: &LedgerCacheEntry) -> WriteOutcome {
		if self.is_degraded(&entry.ledger_id) {
			return WriteOutcome::Degraded;
		}
		let key = ledger_key(&entry.ledger_id);
		let result = match serde_json::to_string(entry) {
			Ok(content) => self.write_with_retry(&key, &content).await,
			Err(e) => Err(e.into()),
		};
		match result {
			Ok(()) => WriteOutcome::Stored,
			Err(e) => {
				warn!(
					"Ledger {} cache kept in memory only for this session: {}",
					entry.ledger_id, e
				);
				let _ = self.repo.remove(&key).await;
				self.degraded_set().insert(entry.ledger_id.clone());
				WriteOutcome::Degraded
			}
		}
	}

	pub async fn load_aggregate<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
		self.read_cached(&aggregate_key(name)).await
	}

	/// Aggregates are the first thing eviction drops; a failed write is only logged.
	pub async fn save_aggregate<T: Serialize + Sync>(&self, name: &str, value: &T) -> WriteOutcome {
		let key = aggregate_key(name);
		let result = match serde_json::to_string(value) {
			Ok(content) => self.write_with_retry(&key, &content).await,
			Err(e) => Err(e.into()),
		};
		match result {
			Ok(()) => WriteOutcome::Stored,
			Err(e) => {
				debug!("Aggregate {} not persisted: {}", key, e);
				WriteOutcome::Degraded
			}
		}
	}

	pub async fn remove_aggregate(&self, name: &str) -> Result<(), CacheError> {
		self.repo.remove(&aggregate_key(name)).await
	}

	pub async fn load_journal<T: DeserializeOwned>(&self, tag: &str) -> Result<Option<T>, CacheError> {
		self.read_json(&balancing_key(tag)).await
	}

	pub async fn save_journal<T: Serialize + Sync>(&self, tag: &str, value: &T) -> Result<(), CacheError> {
		self.write_with_retry(&balancing_key(tag), &serde_json::to_string(value)?)
			.await
	}

	pub async fn remove_journal(&self, tag: &str) -> Result<(), CacheError> {
		self.repo.remove(&balancing_key(tag)).await
	}

	/// Tags of every balancing plan still journaled.
	pub async fn journaled_tags(&self) -> Result<Vec<String>, CacheError> {
		Ok(self
			.repo
			.keys()
			.await?
			.into_iter()
			.filter_map(|k| k.strip_prefix(BALANCING_PREFIX).map(str::to_string))
			.collect())
	}
}
