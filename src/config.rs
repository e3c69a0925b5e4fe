//! Runtime settings and the reconciliation configuration.
//!
//! `Settings` describe how this process talks to the remote service and where it keeps its
//! persistent cache. `ReconcileConfig` describes the household: the shared ledger and one
//! binding per participant. The latter is persisted in the cache store and pushed into the
//! reactive ledger store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "LEDGER_SYNC_CONFIG";
pub const TOKEN_ENV: &str = "LEDGER_SYNC_TOKEN";
pub const DEFAULT_CONFIG_PATH: &str = "ledger-sync.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Missing setting: {0}")]
	Missing(String),
}

fn default_base_url() -> String {
	"https://api.ledger.example/v1".to_string()
}

fn default_data_dir() -> PathBuf {
	PathBuf::from(".ledger-sync")
}

fn default_quota_bytes() -> usize {
	5 * 1024 * 1024
}

fn default_freshness_secs() -> u64 {
	600
}

fn default_lookback_years() -> u32 {
	2
}

/// Process settings, read from a JSON file with defaults for every missing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
	#[serde(default = "default_base_url")]
	pub base_url: String,
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	/// Byte quota of the persistent cache.
	#[serde(default = "default_quota_bytes")]
	pub quota_bytes: usize,
	/// How long an in-process cache entry is served without asking the remote service.
	#[serde(default = "default_freshness_secs")]
	pub freshness_secs: u64,
	/// Default coverage floor, in years before today.
	#[serde(default = "default_lookback_years")]
	pub lookback_years: u32,
	/// Household configuration used when none is persisted yet.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reconcile: Option<ReconcileConfig>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			base_url: default_base_url(),
			data_dir: default_data_dir(),
			quota_bytes: default_quota_bytes(),
			freshness_secs: default_freshness_secs(),
			lookback_years: default_lookback_years(),
			reconcile: None,
		}
	}
}

impl Settings {
	/// Load settings from `path`. A missing file yields the defaults.
	pub async fn load(path: &Path) -> Result<Self, ConfigError> {
		match tokio::fs::read_to_string(path).await {
			Ok(content) => {
				let settings = serde_json::from_str(&content)?;
				info!("Loaded settings from {:?}", path);
				Ok(settings)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No settings file at {:?}, using defaults", path);
				Ok(Self::default())
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Load settings from the file named by `LEDGER_SYNC_CONFIG`.
	pub async fn from_env() -> Result<Self, ConfigError> {
		let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
		Self::load(Path::new(&path)).await
	}

	pub fn freshness(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.freshness_secs)
	}
}

/// One participant's view of the household.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
	pub name: String,
	pub personal_ledger_id: String,
	/// Account booked for balancing transactions. Falls back to the first open account.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub personal_account_id: Option<String>,
	pub shared_category_id: String,
	pub balancing_category_id: String,
	/// Account in the shared ledger holding this participant's activity.
	pub contribution_account_id: String,
}

/// Recurring monthly contribution of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyAllocation {
	pub participant: String,
	/// Milliunits, positive.
	pub amount: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
	#[serde(default)]
	pub shared_ledger_id: String,
	#[serde(default)]
	pub participants: Vec<Participant>,
	/// Transactions dated before this are never reported as unlinked.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reconciliation_cutoff_date: Option<NaiveDate>,
	#[serde(default)]
	pub monthly_allocations: Vec<MonthlyAllocation>,
}

impl ReconcileConfig {
	/// Whether enough is configured to reconcile anything.
	pub fn is_configured(&self) -> bool {
		!self.shared_ledger_id.is_empty() && !self.participants.is_empty()
	}

	pub fn participant(&self, name: &str) -> Option<&Participant> {
		self.participants.iter().find(|p| p.name == name)
	}

	/// Every ledger the reconciliation reads: shared first, then each personal ledger once.
	pub fn ledger_ids(&self) -> Vec<String> {
		let mut ids = Vec::with_capacity(self.participants.len() + 1);
		if !self.shared_ledger_id.is_empty() {
			ids.push(self.shared_ledger_id.clone());
		}
		for participant in &self.participants {
			if !ids.contains(&participant.personal_ledger_id) {
				ids.push(participant.personal_ledger_id.clone());
			}
		}
		ids
	}

	pub fn require_shared_ledger(&self) -> Result<&str, ConfigError> {
		if self.shared_ledger_id.is_empty() {
			return Err(ConfigError::Missing("shared_ledger_id".to_string()));
		}
		Ok(&self.shared_ledger_id)
	}
}
