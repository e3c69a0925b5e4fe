//! Category budget moves around balancing sets.
//!
//! Budgets are moved between a participant's shared-expense category and their balancing
//! category in the current month, by setting both categories' budgeted amounts.

use crate::config::Participant;
use crate::ledger::LedgerError;
use crate::reconcile::{BalancingPlan, ReconciliationEngine};
use crate::utils::{first_of_month, format_milliunits, today};

use tracing::{info, warn};

impl ReconciliationEngine {
	/// Change one category's budgeted amount for the current month by `delta`.
	async fn adjust_budget(&self, ledger_id: &str, category_id: &str, delta: i64) -> Result<String, LedgerError> {
		let month = first_of_month(today());
		let category = self.sync.get_category(ledger_id, month, category_id).await?;
		self.sync
			.update_category_budget(ledger_id, month, category_id, category.budgeted + delta)
			.await?;
		Ok(category.name)
	}

	/// Move `amount` of this month's budget from one category to another in one ledger.
	async fn move_budget(
		&self,
		ledger_id: &str,
		from_category: &str,
		to_category: &str,
		amount: i64,
	) -> Result<(), LedgerError> {
		let from = self.adjust_budget(ledger_id, from_category, -amount).await?;
		let to = self.adjust_budget(ledger_id, to_category, amount).await?;
		info!(
			"Moved {} from {} to {} in ledger {}",
			format_milliunits(amount),
			from,
			to,
			ledger_id
		);
		Ok(())
	}

	/// Make sure the payer's balancing category can cover the plan's amount, topping it up from
	/// the shared-expense category by the shortfall.
	///
	/// The debit is journaled before the credit, so a top-up interrupted between the two only
	/// finishes the credit when resumed.
	pub(super) async fn top_up(&self, plan: &mut BalancingPlan, payer: &Participant) -> Result<(), LedgerError> {
		let ledger_id = payer.personal_ledger_id.as_str();
		if plan.budget_debited == 0 {
			let balancing = self
				.sync
				.get_category(ledger_id, first_of_month(today()), &payer.balancing_category_id)
				.await?;
			if balancing.balance >= plan.amount {
				return Ok(());
			}
			let shortfall = plan.amount - balancing.balance.max(0);
			self.adjust_budget(ledger_id, &payer.shared_category_id, -shortfall)
				.await?;
			plan.budget_debited = shortfall;
			self.persist(plan).await;
		}
		let to = self
			.adjust_budget(ledger_id, &payer.balancing_category_id, plan.budget_debited)
			.await?;
		info!(
			"Topped up {} of {} by {}",
			to,
			payer.name,
			format_milliunits(plan.budget_debited)
		);
		plan.budget_debited = 0;
		Ok(())
	}

	/// Return what is left in a participant's balancing category to the shared-expense
	/// category, or draw a deficit back from it. Failures only warn.
	pub(super) async fn settle_balancing_budget(&self, participant: &Participant) {
		let month = first_of_month(today());
		let balance = match self
			.sync
			.get_category(&participant.personal_ledger_id, month, &participant.balancing_category_id)
			.await
		{
			Ok(category) => category.balance,
			Err(e) => {
				warn!(
					"Could not read the balancing category of {}: {}",
					participant.name, e
				);
				return;
			}
		};
		if balance == 0 {
			return;
		}
		// a positive balance flows back to shared, a deficit is drawn from it
		if let Err(e) = self
			.move_budget(
				&participant.personal_ledger_id,
				&participant.balancing_category_id,
				&participant.shared_category_id,
				balance,
			)
			.await
		{
			warn!(
				"Could not settle the balancing budget of {}: {}",
				participant.name, e
			);
		}
	}
}
