//! Monthly contributions.
//!
//! Each configured allocation is booked once per month as an inflow to the participant's
//! contribution account in the shared ledger, tagged `M-MM-YY`. The tag is derived from the
//! month, so a repeated run finds the transaction it booked before and only corrects its amount.

use crate::config::MonthlyAllocation;
use crate::ledger::{NewTransaction, TransactionUpdate};
use crate::reconcile::{Flow, ReconcileError, ReconciliationEngine};
use crate::sync::FetchRequest;
use crate::tag::{self, Tag};
use crate::utils::format_milliunits;

use chrono::NaiveDate;
use tracing::info;

const MONTHLY_NOTE: &str = "Monthly contribution";

/// What a monthly run did for one allocation. Carries the transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthlyOutcome {
	Created(String),
	Updated(String),
	Unchanged(String),
}

impl MonthlyOutcome {
	pub fn transaction_id(&self) -> &str {
		match self {
			MonthlyOutcome::Created(id) | MonthlyOutcome::Updated(id) | MonthlyOutcome::Unchanged(id) => id,
		}
	}
}

/// Years a two-digit `M-MM-YY` tag can name unambiguously.
const TAGGABLE_YEARS: std::ops::RangeInclusive<i32> = 2000..=2099;

fn period_start(month: u32, year: i32) -> Result<NaiveDate, ReconcileError> {
	if !TAGGABLE_YEARS.contains(&year) {
		return Err(ReconcileError::InvalidPeriod { month, year });
	}
	NaiveDate::from_ymd_opt(year, month, 1).ok_or(ReconcileError::InvalidPeriod { month, year })
}

impl ReconciliationEngine {
	/// Book one allocation for a month, or bring an earlier booking to the configured amount.
	///
	/// The shared ledger is synced first so a booking made elsewhere is seen.
	pub async fn reconcile_monthly(
		&self,
		allocation: &MonthlyAllocation,
		month: u32,
		year: i32,
	) -> Result<MonthlyOutcome, ReconcileError> {
		let date = period_start(month, year)?;
		if allocation.amount <= 0 {
			return Err(ReconcileError::InvalidAmount(allocation.amount));
		}
		let config = self.config()?;
		let participant = Self::participant(&config, &allocation.participant)?;
		let shared = config.shared_ledger_id.as_str();
		let tag = Tag::monthly(month, year);

		let records = self
			.sync
			.fetch_transactions(shared, FetchRequest::default())
			.await?;
		let existing = records.iter().find(|record| {
			!record.deleted
				&& record.account_id == participant.contribution_account_id
				&& tag::extract(record.memo()).as_ref() == Some(&tag)
		});

		match existing {
			Some(record) if record.amount == allocation.amount => {
				Ok(MonthlyOutcome::Unchanged(record.id.clone()))
			}
			Some(record) => {
				self.sync
					.update_transaction(shared, &record.id, &TransactionUpdate::amount(allocation.amount))
					.await?;
				info!(
					"Corrected {} of {} from {} to {}",
					tag,
					participant.name,
					format_milliunits(record.amount),
					format_milliunits(allocation.amount)
				);
				Ok(MonthlyOutcome::Updated(record.id.clone()))
			}
			None => {
				let created = self
					.sync
					.create_transaction(
						shared,
						&NewTransaction {
							account_id: participant.contribution_account_id.clone(),
							date,
							amount: allocation.amount,
							payee_name: Some(participant.name.clone()),
							category_id: allocation.category_id.clone(),
							memo: Some(tag::upsert(MONTHLY_NOTE, &tag)),
							transfer_account_id: None,
							cleared: true,
						},
					)
					.await?;
				info!(
					"Booked {} for {}: {}",
					tag,
					participant.name,
					format_milliunits(allocation.amount)
				);
				Ok(MonthlyOutcome::Created(created.id))
			}
		}
	}

	/// Apply every configured allocation for a month, after one confirmation.
	///
	/// Stops at the first failure; allocations already applied stay applied and a rerun picks
	/// up where this one stopped.
	pub async fn apply_monthly_allocations(
		&self,
		month: u32,
		year: i32,
	) -> Result<Vec<(String, MonthlyOutcome)>, ReconcileError> {
		let _guard = self.begin(Flow::ApplyAllocations)?;
		let result = self.apply_allocations(month, year).await;
		self.report(result)
	}

	async fn apply_allocations(&self, month: u32, year: i32) -> Result<Vec<(String, MonthlyOutcome)>, ReconcileError> {
		period_start(month, year)?;
		let config = self.config()?;
		if config.monthly_allocations.is_empty() {
			return Ok(Vec::new());
		}
		self.confirm(&format!(
			"Apply {} monthly allocation(s) for {}?",
			config.monthly_allocations.len(),
			Tag::monthly(month, year)
		))
		.await?;

		let mut outcomes = Vec::with_capacity(config.monthly_allocations.len());
		for allocation in &config.monthly_allocations {
			let outcome = self.reconcile_monthly(allocation, month, year).await?;
			outcomes.push((allocation.participant.clone(), outcome));
		}
		Ok(outcomes)
	}
}
