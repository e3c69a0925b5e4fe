//! Balancing sets.
//!
//! A balancing set moves an amount from one participant to another with four tagged
//! transactions: an outflow in the payer's personal ledger, an inflow in the payee's, and a
//! transfer between their contribution accounts in the shared ledger (two entries). The steps
//! are journaled so an interrupted creation can be resumed.

use crate::cache::TransactionRecord;
use crate::config::{Participant, ReconcileConfig};
use crate::ledger::{LedgerError, NewTransaction};
use crate::notify::NoticeLevel;
use crate::reconcile::journal::{BalancingPlan, EXPECTED_TRANSACTIONS, StepKind};
use crate::reconcile::{Flow, ReconcileError, ReconciliationEngine};
use crate::store::LinkedGroup;
use crate::sync::FetchRequest;
use crate::tag::{self, Tag};
use crate::utils::{format_milliunits, today};

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Outcome of deleting a balancing set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
	pub tag: Tag,
	/// Ids deleted by this run.
	pub deleted: Vec<String>,
	/// Ids the service no longer knew, usually the paired side of a deleted transfer.
	pub missing: Vec<String>,
	/// Ids that could not be deleted, with the error.
	pub failed: Vec<(String, String)>,
	/// Transactions the set should have held but that were never created.
	pub never_created: usize,
}

impl DeletionReport {
	fn new(tag: Tag) -> Self {
		Self {
			tag,
			deleted: Vec::new(),
			missing: Vec::new(),
			failed: Vec::new(),
			never_created: 0,
		}
	}

	pub fn is_clean(&self) -> bool {
		self.failed.is_empty()
	}

	pub fn summary(&self) -> String {
		let mut summary = format!(
			"Balancing set {}: {} deleted, {} already gone, {} never created",
			self.tag,
			self.deleted.len(),
			self.missing.len(),
			self.never_created
		);
		if !self.failed.is_empty() {
			summary.push_str(&format!(", {} failed", self.failed.len()));
		}
		summary
	}
}

/// Accounts the two personal transactions of a set are booked on.
struct BookingAccounts {
	payer: String,
	payee: String,
}

/// Every transaction of a group with the ledger it lives in.
fn group_members<'a>(
	group: &'a LinkedGroup,
	config: &'a ReconcileConfig,
) -> Vec<(&'a str, &'a TransactionRecord)> {
	let personal = group.personal_transactions().filter_map(|(name, record)| {
		config
			.participant(name)
			.map(|p| (p.personal_ledger_id.as_str(), record))
	});
	let shared = group
		.shared
		.iter()
		.map(|record| (config.shared_ledger_id.as_str(), record));
	personal.chain(shared).collect()
}

impl ReconciliationEngine {
	/// Account booked for a participant's balancing transactions: the configured one, else the
	/// first open account of their personal ledger.
	pub(super) async fn personal_account(&self, participant: &Participant) -> Result<String, ReconcileError> {
		if let Some(id) = &participant.personal_account_id {
			return Ok(id.clone());
		}
		self.sync
			.list_accounts(&participant.personal_ledger_id)
			.await?
			.into_iter()
			.find(|account| account.is_open())
			.map(|account| account.id)
			.ok_or_else(|| ReconcileError::NoOpenAccount(participant.personal_ledger_id.clone()))
	}

	async fn booking_accounts(
		&self,
		payer: &Participant,
		payee: &Participant,
	) -> Result<BookingAccounts, ReconcileError> {
		Ok(BookingAccounts {
			payer: self.personal_account(payer).await?,
			payee: self.personal_account(payee).await?,
		})
	}

	/// Create a balancing set moving `amount` milliunits from `payer` to `payee`.
	///
	/// Asks for confirmation first. The payer's balancing category is topped up from their
	/// shared-expense category when it cannot cover the amount. Each transaction is created by
	/// its own call; when some fail the others are still attempted, the plan stays journaled and
	/// `PartialFailure` reports how many are in place.
	pub async fn create_balancing(&self, payer: &str, payee: &str, amount: i64) -> Result<Tag, ReconcileError> {
		let _guard = self.begin(Flow::CreateBalancing)?;
		let result = self.create_set(payer, payee, amount).await;
		self.report(result)
	}

	async fn create_set(&self, payer: &str, payee: &str, amount: i64) -> Result<Tag, ReconcileError> {
		if amount <= 0 {
			return Err(ReconcileError::InvalidAmount(amount));
		}
		if payer == payee {
			return Err(ReconcileError::SameParticipant(payer.to_string()));
		}
		let config = self.config()?;
		let from = Self::participant(&config, payer)?;
		let to = Self::participant(&config, payee)?;
		// resolved before anything is written
		let accounts = self.booking_accounts(from, to).await?;

		self.confirm(&format!(
			"Create a balancing set moving {} from {} to {}?",
			format_milliunits(amount),
			from.name,
			to.name
		))
		.await?;

		let plan = BalancingPlan::new(Tag::generate_balancing(), payer, payee, amount, today());
		self.cache.save_journal(&plan.tag.to_string(), &plan).await?;
		info!(
			"Creating balancing set {}: {} from {} to {}",
			plan.tag,
			format_milliunits(amount),
			payer,
			payee
		);
		self.run_plan(plan, &config, from, to, &accounts).await
	}

	/// Finish a journaled balancing set, creating only what is still missing remotely.
	pub async fn resume_balancing(&self, tag: &Tag) -> Result<Tag, ReconcileError> {
		let _guard = self.begin(Flow::ResumeBalancing)?;
		let result = self.resume_set(tag).await;
		self.report(result)
	}

	async fn resume_set(&self, tag: &Tag) -> Result<Tag, ReconcileError> {
		let mut plan: BalancingPlan = self
			.cache
			.load_journal(&tag.to_string())
			.await?
			.ok_or_else(|| ReconcileError::GroupNotFound(tag.to_string()))?;
		let config = self.config()?;
		let payer = Self::participant(&config, &plan.payer)?;
		let payee = Self::participant(&config, &plan.payee)?;
		let accounts = self.booking_accounts(payer, payee).await?;

		self.refresh(&config, payer, payee).await;
		if let Some(group) = self.store.group(tag) {
			let has_personal = |name: &str| group.personal.get(name).is_some_and(|txs| !txs.is_empty());
			if has_personal(&plan.payer) {
				plan.mark_done(StepKind::PayerOutflow, None);
			}
			if has_personal(&plan.payee) {
				plan.mark_done(StepKind::PayeeInflow, None);
			}
			if !group.shared.is_empty() {
				plan.mark_done(StepKind::SharedTransfer, None);
			}
		}
		// the top-up is done once anything was booked against it
		if plan.completed_count() > 0 {
			plan.mark_done(StepKind::BudgetTopUp, None);
		}
		info!(
			"Resuming balancing set {}: pending {:?}",
			plan.tag,
			plan.pending()
		);
		self.run_plan(plan, &config, payer, payee, &accounts).await
	}

	async fn run_plan(
		&self,
		mut plan: BalancingPlan,
		config: &ReconcileConfig,
		payer: &Participant,
		payee: &Participant,
		accounts: &BookingAccounts,
	) -> Result<Tag, ReconcileError> {
		let mut first_error: Option<LedgerError> = None;
		for step in plan.pending() {
			match self.run_step(step, &mut plan, config, payer, payee, accounts).await {
				Ok(id) => {
					debug!("Balancing set {}: {:?} done", plan.tag, step);
					plan.mark_done(step, id);
				}
				// nothing is booked without the budget in place
				Err(ReconcileError::Ledger(e)) if step == StepKind::BudgetTopUp => {
					plan.last_error = Some(e.to_string());
					self.persist(&plan).await;
					return Err(self.partial(&plan, e));
				}
				Err(ReconcileError::Ledger(e)) => {
					warn!("Balancing set {}: {:?} failed: {}", plan.tag, step, e);
					plan.last_error = Some(e.to_string());
					if first_error.is_none() {
						first_error = Some(e);
					}
				}
				Err(e) => {
					self.persist(&plan).await;
					return Err(e);
				}
			}
			self.persist(&plan).await;
		}

		self.refresh(config, payer, payee).await;
		if let Some(e) = first_error {
			return Err(self.partial(&plan, e));
		}
		if let Err(e) = self.cache.remove_journal(&plan.tag.to_string()).await {
			warn!("Could not drop the journal of {}: {}", plan.tag, e);
		}
		info!("Balancing set {} complete", plan.tag);
		Ok(plan.tag)
	}

	fn partial(&self, plan: &BalancingPlan, source: LedgerError) -> ReconcileError {
		ReconcileError::PartialFailure {
			tag: plan.tag.to_string(),
			completed: plan.completed_count(),
			expected: plan.expected_count,
			source,
		}
	}

	/// Journal the plan. The remote state is what counts, so a failed write only warns.
	pub(super) async fn persist(&self, plan: &BalancingPlan) {
		if let Err(e) = self.cache.save_journal(&plan.tag.to_string(), plan).await {
			warn!("Could not journal balancing set {}: {}", plan.tag, e);
		}
	}

	/// Carry out one step. Returns the id of the transaction it created, if any.
	async fn run_step(
		&self,
		step: StepKind,
		plan: &mut BalancingPlan,
		config: &ReconcileConfig,
		payer: &Participant,
		payee: &Participant,
		accounts: &BookingAccounts,
	) -> Result<Option<String>, ReconcileError> {
		let (ledger_id, transaction) = match step {
			StepKind::BudgetTopUp => {
				self.top_up(plan, payer).await?;
				return Ok(None);
			}
			StepKind::PayerOutflow => (
				&payer.personal_ledger_id,
				NewTransaction {
					account_id: accounts.payer.clone(),
					date: plan.date,
					amount: -plan.amount,
					payee_name: Some(payee.name.clone()),
					category_id: Some(payer.balancing_category_id.clone()),
					memo: Some(tag::upsert(&format!("Balancing to {}", payee.name), &plan.tag)),
					transfer_account_id: None,
					cleared: true,
				},
			),
			StepKind::PayeeInflow => (
				&payee.personal_ledger_id,
				NewTransaction {
					account_id: accounts.payee.clone(),
					date: plan.date,
					amount: plan.amount,
					payee_name: Some(payer.name.clone()),
					category_id: Some(payee.balancing_category_id.clone()),
					memo: Some(tag::upsert(&format!("Balancing from {}", payer.name), &plan.tag)),
					transfer_account_id: None,
					cleared: true,
				},
			),
			StepKind::SharedTransfer => (
				&config.shared_ledger_id,
				NewTransaction {
					account_id: payer.contribution_account_id.clone(),
					date: plan.date,
					amount: -plan.amount,
					payee_name: None,
					category_id: None,
					memo: Some(tag::upsert(
						&format!("Balancing {} to {}", payer.name, payee.name),
						&plan.tag,
					)),
					transfer_account_id: Some(payee.contribution_account_id.clone()),
					cleared: true,
				},
			),
		};
		let created = self.sync.create_transaction(ledger_id, &transaction).await?;
		Ok(Some(created.id))
	}

	/// Re-read the ledgers a balancing set touches. Failures only warn.
	async fn refresh(&self, config: &ReconcileConfig, payer: &Participant, payee: &Participant) {
		let ledgers = [
			config.shared_ledger_id.as_str(),
			payer.personal_ledger_id.as_str(),
			payee.personal_ledger_id.as_str(),
		];
		for ledger_id in ledgers.into_iter().collect::<BTreeSet<_>>() {
			if let Err(e) = self
				.sync
				.fetch_transactions(ledger_id, FetchRequest::default())
				.await
			{
				warn!("Could not refresh ledger {}: {}", ledger_id, e);
			}
		}
	}

	/// Delete every transaction of a balancing set and give the balancing budgets back.
	///
	/// Asks for confirmation first. Deletion is best effort: each transaction is deleted on its
	/// own and the report lists what happened to each. The journal is dropped once nothing
	/// failed.
	pub async fn delete_balancing(&self, tag: &Tag) -> Result<DeletionReport, ReconcileError> {
		let _guard = self.begin(Flow::DeleteBalancing)?;
		let result = self.delete_set(tag).await;
		self.report(result)
	}

	async fn delete_set(&self, tag: &Tag) -> Result<DeletionReport, ReconcileError> {
		let config = self.config()?;
		self.sync.sync_all(FetchRequest::default()).await?;
		let group = self
			.store
			.group(tag)
			.ok_or_else(|| ReconcileError::GroupNotFound(tag.to_string()))?;
		let members = group_members(&group, &config);
		let plan: Option<BalancingPlan> = self.cache.load_journal(&tag.to_string()).await.ok().flatten();
		let expected = plan.as_ref().map_or(EXPECTED_TRANSACTIONS, |p| p.expected_count);

		self.confirm(&format!(
			"Delete balancing set {} ({} transactions)?",
			tag,
			members.len()
		))
		.await?;

		let mut report = DeletionReport::new(tag.clone());
		report.never_created = expected.saturating_sub(members.len());
		for (ledger_id, record) in members {
			match self.sync.delete_transaction(ledger_id, &record.id).await {
				Ok(()) => report.deleted.push(record.id.clone()),
				Err(e) if e.is_not_found() => report.missing.push(record.id.clone()),
				Err(e) => {
					warn!("Could not delete {} of {}: {}", record.id, tag, e);
					report.failed.push((record.id.clone(), e.to_string()));
				}
			}
		}

		let mut affected: BTreeSet<String> = group.personal.keys().cloned().collect();
		if let Some(plan) = &plan {
			affected.insert(plan.payer.clone());
		}
		for name in &affected {
			if let Some(participant) = config.participant(name) {
				self.settle_balancing_budget(participant).await;
			}
		}

		if report.is_clean() {
			if let Err(e) = self.cache.remove_journal(&tag.to_string()).await {
				warn!("Could not drop the journal of {}: {}", tag, e);
			}
		} else {
			self.notifier.notify(NoticeLevel::Warning, &report.summary());
		}
		info!("{}", report.summary());
		Ok(report)
	}
}
