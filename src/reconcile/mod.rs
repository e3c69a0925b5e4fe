//! Reconciliation engine
//!
//! This module implements the user-triggered operations on linked transactions:
//!
//! - `matching`: Match scoring and ranked suggestions between unlinked transactions.
//! - `linking`: Manual link and unlink through correlation tags in transaction notes.
//! - `journal`: The persisted, resumable plan of a balancing set.
//! - `balancing`: Creation, resumption and deletion of balancing sets, with the category budget
//!   adjustments around them.
//! - `monthly`: Idempotent monthly contribution transactions.
//!
//! Every flow is guarded by its own busy flag: triggering a flow that is already running fails
//! with [`ReconcileError::FlowBusy`] and nothing is queued. Remote writes are not rolled back;
//! a multi-step flow that stops half way reports [`ReconcileError::PartialFailure`] and leaves a
//! group whose completeness flag shows what is missing.

mod balancing;
mod budget;
mod journal;
mod linking;
mod matching;
mod monthly;
#[cfg(test)]
mod tests;

pub use balancing::DeletionReport;
pub use journal::{BalancingPlan, StepKind};
pub use linking::TransactionRef;
pub use matching::{MatchSuggestion, is_good_match};
pub use monthly::MonthlyOutcome;

use crate::cache::{CacheError, PersistentCacheStore};
use crate::config::{Participant, ReconcileConfig};
use crate::ledger::LedgerError;
use crate::notify::{Confirmation, NoticeLevel, Notifier};
use crate::store::LedgerStore;
use crate::sync::{SyncCacheManager, SyncError};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// User-triggered flows, each with its own busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Link,
	Unlink,
	CreateBalancing,
	ResumeBalancing,
	DeleteBalancing,
	ApplyAllocations,
}

impl fmt::Display for Flow {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Flow::Link => "link",
			Flow::Unlink => "unlink",
			Flow::CreateBalancing => "create balancing set",
			Flow::ResumeBalancing => "resume balancing set",
			Flow::DeleteBalancing => "delete balancing set",
			Flow::ApplyAllocations => "apply monthly allocations",
		};
		f.write_str(name)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Sync error: {0}")]
	Sync(#[from] SyncError),

	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("{tag}: {completed} of {expected} transactions in place: {source}")]
	PartialFailure {
		tag: String,
		completed: usize,
		expected: usize,
		#[source]
		source: LedgerError,
	},

	#[error("Already running: {0}")]
	FlowBusy(Flow),

	#[error("Cancelled at confirmation")]
	Declined,

	#[error("Unknown participant: {0}")]
	UnknownParticipant(String),

	#[error("A participant cannot balance with themselves: {0}")]
	SameParticipant(String),

	#[error("No linked group tagged {0}")]
	GroupNotFound(String),

	#[error("Transaction not found: {0}")]
	TransactionNotFound(String),

	#[error("No open account in ledger {0}")]
	NoOpenAccount(String),

	#[error("No shared ledger or participants configured")]
	NotConfigured,

	#[error("Invalid amount: {0}")]
	InvalidAmount(i64),

	#[error("Invalid month: {month}/{year}")]
	InvalidPeriod { month: u32, year: i32 },
}

/// Clears its flow's busy flag when dropped.
struct FlowGuard<'a>(&'a AtomicBool);

impl Drop for FlowGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

#[derive(Default)]
struct FlowFlags {
	link: AtomicBool,
	unlink: AtomicBool,
	create_balancing: AtomicBool,
	resume_balancing: AtomicBool,
	delete_balancing: AtomicBool,
	apply_allocations: AtomicBool,
}

impl FlowFlags {
	fn flag(&self, flow: Flow) -> &AtomicBool {
		match flow {
			Flow::Link => &self.link,
			Flow::Unlink => &self.unlink,
			Flow::CreateBalancing => &self.create_balancing,
			Flow::ResumeBalancing => &self.resume_balancing,
			Flow::DeleteBalancing => &self.delete_balancing,
			Flow::ApplyAllocations => &self.apply_allocations,
		}
	}
}

pub struct ReconciliationEngine {
	sync: Arc<SyncCacheManager>,
	store: Arc<LedgerStore>,
	cache: Arc<PersistentCacheStore>,
	notifier: Arc<dyn Notifier>,
	confirmation: Arc<dyn Confirmation>,
	flows: FlowFlags,
}

impl ReconciliationEngine {
	pub fn new(
		sync: Arc<SyncCacheManager>,
		store: Arc<LedgerStore>,
		cache: Arc<PersistentCacheStore>,
		notifier: Arc<dyn Notifier>,
		confirmation: Arc<dyn Confirmation>,
	) -> Self {
		Self {
			sync,
			store,
			cache,
			notifier,
			confirmation,
			flows: FlowFlags::default(),
		}
	}

	/// Mark a flow busy, or refuse when it already is.
	fn begin(&self, flow: Flow) -> Result<FlowGuard<'_>, ReconcileError> {
		let flag = self.flows.flag(flow);
		if flag
			.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			debug!("Dropped trigger of {}: already running", flow);
			return Err(ReconcileError::FlowBusy(flow));
		}
		Ok(FlowGuard(flag))
	}

	async fn confirm(&self, prompt: &str) -> Result<(), ReconcileError> {
		if self.confirmation.confirm(prompt).await {
			Ok(())
		} else {
			debug!("Declined: {}", prompt);
			Err(ReconcileError::Declined)
		}
	}

	/// The active config, refusing to run without a shared ledger and participants.
	fn config(&self) -> Result<ReconcileConfig, ReconcileError> {
		let config = self.store.config();
		if !config.is_configured() {
			return Err(ReconcileError::NotConfigured);
		}
		Ok(config)
	}

	fn participant<'a>(config: &'a ReconcileConfig, name: &str) -> Result<&'a Participant, ReconcileError> {
		config
			.participant(name)
			.ok_or_else(|| ReconcileError::UnknownParticipant(name.to_string()))
	}

	/// Show remote and partial failures to the user, then hand the result back.
	fn report<T>(&self, result: Result<T, ReconcileError>) -> Result<T, ReconcileError> {
		if let Err(e) = &result {
			match e {
				ReconcileError::FlowBusy(_) | ReconcileError::Declined => {}
				ReconcileError::Ledger(inner) if inner.is_transient() => {
					self.notifier.notify(NoticeLevel::Warning, &e.to_string())
				}
				_ => self.notifier.notify(NoticeLevel::Error, &e.to_string()),
			}
		}
		result
	}
}
