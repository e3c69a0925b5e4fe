//! Persisted plan of a balancing set.
//!
//! A balancing set is created by several independent remote calls. The plan records which
//! steps are done, keyed by the set's tag, so an interrupted creation can be resumed instead of
//! started over. Plans live in the `balancing:<tag>` namespace of the persistent cache, which
//! eviction never touches.

use crate::tag::Tag;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Transactions a complete balancing set holds: payer outflow, payee inflow and both sides of
/// the shared transfer.
pub const EXPECTED_TRANSACTIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
	/// Move budget from the payer's shared-expense category to the balancing category.
	BudgetTopUp,
	PayerOutflow,
	PayeeInflow,
	/// One transfer between the contribution accounts; the service books both sides.
	SharedTransfer,
}

impl StepKind {
	pub const ALL: [StepKind; 4] = [
		StepKind::BudgetTopUp,
		StepKind::PayerOutflow,
		StepKind::PayeeInflow,
		StepKind::SharedTransfer,
	];

	/// Transactions that exist once this step is done.
	pub fn transactions(self) -> usize {
		match self {
			StepKind::BudgetTopUp => 0,
			StepKind::PayerOutflow | StepKind::PayeeInflow => 1,
			StepKind::SharedTransfer => 2,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancingPlan {
	pub tag: Tag,
	pub payer: String,
	pub payee: String,
	/// Milliunits moved from payer to payee, positive.
	pub amount: i64,
	pub date: NaiveDate,
	pub expected_count: usize,
	pub completed: Vec<StepKind>,
	/// Remote ids of the transactions created so far.
	#[serde(default)]
	pub transaction_ids: Vec<String>,
	/// Milliunits taken from the payer's shared-expense budget and not yet credited to the
	/// balancing category.
	#[serde(default)]
	pub budget_debited: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_error: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl BalancingPlan {
	pub fn new(tag: Tag, payer: &str, payee: &str, amount: i64, date: NaiveDate) -> Self {
		Self {
			tag,
			payer: payer.to_string(),
			payee: payee.to_string(),
			amount,
			date,
			expected_count: EXPECTED_TRANSACTIONS,
			completed: Vec::new(),
			transaction_ids: Vec::new(),
			budget_debited: 0,
			last_error: None,
			created_at: Utc::now(),
		}
	}

	pub fn is_done(&self, step: StepKind) -> bool {
		self.completed.contains(&step)
	}

	pub fn pending(&self) -> Vec<StepKind> {
		StepKind::ALL
			.into_iter()
			.filter(|step| !self.is_done(*step))
			.collect()
	}

	pub fn mark_done(&mut self, step: StepKind, transaction_id: Option<String>) {
		if !self.is_done(step) {
			self.completed.push(step);
		}
		self.transaction_ids.extend(transaction_id);
	}

	pub fn is_finished(&self) -> bool {
		self.pending().is_empty()
	}

	/// Transactions known to exist for this plan.
	pub fn completed_count(&self) -> usize {
		self.completed.iter().map(|step| step.transactions()).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plan_tracks_pending_steps_and_counts() {
		let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
		let mut plan = BalancingPlan::new(Tag::generate_balancing(), "alice", "bob", 50_000, date);
		assert_eq!(plan.pending(), StepKind::ALL.to_vec());
		assert_eq!(plan.expected_count, 4);

		plan.mark_done(StepKind::BudgetTopUp, None);
		plan.mark_done(StepKind::PayerOutflow, Some("tx-1".to_string()));
		plan.mark_done(StepKind::SharedTransfer, Some("tx-3".to_string()));
		plan.mark_done(StepKind::SharedTransfer, None);

		assert_eq!(plan.pending(), vec![StepKind::PayeeInflow]);
		assert_eq!(plan.completed_count(), 3);
		assert!(!plan.is_finished());

		plan.mark_done(StepKind::PayeeInflow, Some("tx-2".to_string()));
		assert!(plan.is_finished());
		assert_eq!(plan.completed_count(), plan.expected_count);
		assert_eq!(plan.transaction_ids.len(), 3);
	}

	#[test]
	fn plan_survives_serialization() {
		let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
		let mut plan = BalancingPlan::new(Tag::Balancing("XY23ZK".into()), "alice", "bob", 1_000, date);
		plan.mark_done(StepKind::PayerOutflow, Some("tx-9".to_string()));
		plan.last_error = Some("Service unavailable (status 503)".to_string());

		let json = serde_json::to_string(&plan).unwrap();
		assert!(json.contains("\"B-XY23ZK\""));
		let back: BalancingPlan = serde_json::from_str(&json).unwrap();
		assert_eq!(back, plan);
	}
}
