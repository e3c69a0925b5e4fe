use crate::cache::TransactionRecord;
use crate::ledger::TransactionUpdate;
use crate::reconcile::{Flow, ReconcileError, ReconciliationEngine};
use crate::tag::{self, Tag};

use tracing::{info, warn};

/// A transaction addressed by its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionRef {
	pub ledger_id: String,
	pub transaction_id: String,
}

impl TransactionRef {
	pub fn new(ledger_id: impl Into<String>, transaction_id: impl Into<String>) -> Self {
		Self {
			ledger_id: ledger_id.into(),
			transaction_id: transaction_id.into(),
		}
	}
}

impl ReconciliationEngine {
	fn record(&self, target: &TransactionRef) -> Result<TransactionRecord, ReconcileError> {
		self.store
			.transaction(&target.ledger_id, &target.transaction_id)
			.ok_or_else(|| ReconcileError::TransactionNotFound(target.transaction_id.clone()))
	}

	/// Link two transactions under a fresh `Regular` tag, replacing any tag either note had.
	///
	/// The two notes are written by independent calls. When the second one fails the first
	/// stays tagged and `PartialFailure` is returned; retrying or unlinking repairs it.
	pub async fn link(&self, personal: &TransactionRef, shared: &TransactionRef) -> Result<Tag, ReconcileError> {
		let _guard = self.begin(Flow::Link)?;
		let result = self.link_pair(personal, shared).await;
		self.report(result)
	}

	async fn link_pair(&self, personal: &TransactionRef, shared: &TransactionRef) -> Result<Tag, ReconcileError> {
		let first = self.record(personal)?;
		let second = self.record(shared)?;
		let tag = Tag::generate();

		self.sync
			.update_transaction(
				&personal.ledger_id,
				&first.id,
				&TransactionUpdate::memo(tag::upsert(first.memo(), &tag)),
			)
			.await?;

		if let Err(e) = self
			.sync
			.update_transaction(
				&shared.ledger_id,
				&second.id,
				&TransactionUpdate::memo(tag::upsert(second.memo(), &tag)),
			)
			.await
		{
			warn!("Link {} left one-sided: {}", tag, e);
			return Err(ReconcileError::PartialFailure {
				tag: tag.to_string(),
				completed: 1,
				expected: 2,
				source: e,
			});
		}

		info!("Linked {} and {} as {}", first.id, second.id, tag);
		Ok(tag)
	}

	/// Remove the tag from one transaction's note. Returns the removed tag, or `None` when the
	/// note carried no tag and nothing was written.
	pub async fn unlink(&self, target: &TransactionRef) -> Result<Option<Tag>, ReconcileError> {
		let _guard = self.begin(Flow::Unlink)?;
		let result = self.unlink_one(target).await;
		self.report(result)
	}

	async fn unlink_one(&self, target: &TransactionRef) -> Result<Option<Tag>, ReconcileError> {
		let record = self.record(target)?;
		let Some(tag) = tag::extract(record.memo()) else {
			return Ok(None);
		};
		self.sync
			.update_transaction(
				&target.ledger_id,
				&record.id,
				&TransactionUpdate::memo(tag::remove(record.memo(), &tag)),
			)
			.await?;
		info!("Unlinked {} from {}", record.id, tag);
		Ok(Some(tag))
	}
}
