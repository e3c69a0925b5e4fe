//! Wiring of the long-lived components.
//!
//! One `AppContext` per process: the persistent cache, the reactive store, the sync cache manager
//! in front of the remote service and the reconciliation engine, all sharing the same store.

use crate::cache::{CacheError, FileCacheRepository, PersistentCacheStore};
use crate::config::{ConfigError, ReconcileConfig, Settings, TOKEN_ENV};
use crate::ledger::{HttpLedgerClient, LedgerApi, LedgerError};
use crate::notify::{Confirmation, LogNotifier, Notifier};
use crate::reconcile::{BalancingPlan, ReconciliationEngine};
use crate::store::LedgerStore;
use crate::sync::{SyncCacheManager, SyncConfig};

use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
	#[error("Config error: {0}")]
	Config(#[from] ConfigError),

	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("No credential stored and {0} is not set")]
	MissingCredential(&'static str),
}

pub struct AppContext {
	pub settings: Settings,
	pub cache: Arc<PersistentCacheStore>,
	pub store: Arc<LedgerStore>,
	pub sync: Arc<SyncCacheManager>,
	pub engine: ReconciliationEngine,
}

impl AppContext {
	/// Build the production context around a file-backed cache and the HTTP client.
	pub async fn start(settings: Settings, confirmation: Arc<dyn Confirmation>) -> Result<Self, StartupError> {
		let cache = Arc::new(PersistentCacheStore::new(
			Box::new(FileCacheRepository::new(
				settings.data_dir.clone(),
				settings.quota_bytes,
			)),
			settings.lookback_years,
		));
		let token = Self::credential(&cache).await?;
		let api = Arc::new(HttpLedgerClient::new(settings.base_url.clone(), token)?);
		Self::assemble(
			settings,
			api,
			cache,
			Arc::new(LogNotifier),
			confirmation,
		)
		.await
	}

	/// The stored credential, or the one from the environment, which is then stored.
	async fn credential(cache: &PersistentCacheStore) -> Result<String, StartupError> {
		if let Some(token) = cache.load_credential().await? {
			return Ok(token);
		}
		let token = std::env::var(TOKEN_ENV)
			.ok()
			.filter(|t| !t.trim().is_empty())
			.ok_or(StartupError::MissingCredential(TOKEN_ENV))?;
		cache.save_credential(&token).await?;
		info!("Stored credential from {}", TOKEN_ENV);
		Ok(token)
	}

	/// Wire the components around an API client and load the household configuration.
	pub async fn assemble(
		settings: Settings,
		api: Arc<dyn LedgerApi>,
		cache: Arc<PersistentCacheStore>,
		notifier: Arc<dyn Notifier>,
		confirmation: Arc<dyn Confirmation>,
	) -> Result<Self, StartupError> {
		let store = Arc::new(LedgerStore::new());
		let sync = Arc::new(SyncCacheManager::new(
			api,
			cache.clone(),
			store.clone(),
			notifier.clone(),
			SyncConfig {
				freshness: settings.freshness(),
				lookback_years: settings.lookback_years,
			},
		));
		let engine = ReconciliationEngine::new(
			sync.clone(),
			store.clone(),
			cache.clone(),
			notifier,
			confirmation,
		);

		let config = match cache.load_config().await? {
			Some(config) => config,
			None => match &settings.reconcile {
				Some(seed) => {
					cache.save_config(seed).await?;
					info!("Stored household configuration from settings");
					seed.clone()
				}
				None => {
					warn!("No household configuration yet");
					ReconcileConfig::default()
				}
			},
		};
		store.set_config(config);

		Ok(Self {
			settings,
			cache,
			store,
			sync,
			engine,
		})
	}

	/// Persist a new household configuration and make it active.
	pub async fn update_config(&self, config: ReconcileConfig) -> Result<(), CacheError> {
		self.cache.save_config(&config).await?;
		self.store.set_config(config);
		Ok(())
	}

	/// Balancing plans still journaled, oldest first. Unreadable entries are skipped.
	pub async fn pending_plans(&self) -> Result<Vec<BalancingPlan>, CacheError> {
		let mut plans = Vec::new();
		for tag in self.cache.journaled_tags().await? {
			match self.cache.load_journal::<BalancingPlan>(&tag).await {
				Ok(Some(plan)) => plans.push(plan),
				Ok(None) => {}
				Err(e) => warn!("Skipping unreadable journal {}: {}", tag, e),
			}
		}
		plans.sort_by_key(|plan| plan.created_at);
		Ok(plans)
	}
}
