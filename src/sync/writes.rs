//! Mutation API of the sync cache manager.
//!
//! Every remote write goes through here: the call is issued, the result is applied to the
//! reactive store right away, and the ledger's in-process entry is invalidated so the next read
//! picks up whatever else the service changed (paired transfers, for instance) via a delta sync.
//! Writes are never retried and never fall back to a cache.

use crate::cache::TransactionRecord;
use crate::ledger::{Account, Category, LedgerError, NewTransaction, Transaction, TransactionUpdate};
use crate::sync::SyncError;
use crate::sync::manager::{SyncCacheManager, detail_aggregate};

use chrono::NaiveDate;
use tracing::{debug, info};

impl SyncCacheManager {
	pub async fn create_transaction(
		&self,
		ledger_id: &str,
		transaction: &NewTransaction,
	) -> Result<Transaction, LedgerError> {
		let created = self.api.create_transaction(ledger_id, transaction).await?;
		info!(
			"Created transaction {} in ledger {} ({})",
			created.id, ledger_id, created.amount
		);
		self.store
			.upsert_transaction(ledger_id, TransactionRecord::from(created.clone()));
		self.invalidate(ledger_id);
		Ok(created)
	}

	pub async fn update_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
		update: &TransactionUpdate,
	) -> Result<Transaction, LedgerError> {
		let updated = self
			.api
			.update_transaction(ledger_id, transaction_id, update)
			.await?;
		debug!("Updated transaction {} in ledger {}", transaction_id, ledger_id);
		self.store
			.upsert_transaction(ledger_id, TransactionRecord::from(updated.clone()));
		self.invalidate(ledger_id);
		Ok(updated)
	}

	/// Delete a transaction. A record the service no longer knows is dropped locally as well,
	/// and the `NotFound` error is still returned so callers can tell it apart.
	pub async fn delete_transaction(&self, ledger_id: &str, transaction_id: &str) -> Result<(), LedgerError> {
		match self.api.delete_transaction(ledger_id, transaction_id).await {
			Ok(_) => {
				debug!("Deleted transaction {} in ledger {}", transaction_id, ledger_id);
				self.store.remove_transaction(ledger_id, transaction_id);
				self.invalidate(ledger_id);
				Ok(())
			}
			Err(e) if e.is_not_found() => {
				self.store.remove_transaction(ledger_id, transaction_id);
				self.invalidate(ledger_id);
				Err(e)
			}
			Err(e) => Err(e),
		}
	}

	pub async fn get_category(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
	) -> Result<Category, LedgerError> {
		self.api.get_category(ledger_id, month, category_id).await
	}

	/// Set a category's budgeted amount for a month. The cached ledger detail is dropped.
	pub async fn update_category_budget(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
		budgeted: i64,
	) -> Result<Category, LedgerError> {
		let category = self
			.api
			.update_category_budget(ledger_id, month, category_id, budgeted)
			.await?;
		if let Err(e) = self.cache.remove_aggregate(&detail_aggregate(ledger_id)).await {
			debug!("Could not drop cached detail of ledger {}: {}", ledger_id, e);
		}
		Ok(category)
	}

	/// Accounts of a ledger, from the cached ledger detail.
	pub async fn list_accounts(&self, ledger_id: &str) -> Result<Vec<Account>, SyncError> {
		Ok(self.ledger_detail(ledger_id, false).await?.accounts)
	}
}

#[cfg(test)]
mod tests {
	use crate::cache::{MemoryCacheRepository, PersistentCacheStore};
	use crate::ledger::testing::{FailKind, FakeLedger, Op};
	use crate::ledger::{LedgerError, NewTransaction, TransactionUpdate};
	use crate::notify::LogNotifier;
	use crate::store::LedgerStore;
	use crate::sync::{FetchRequest, SyncCacheManager, SyncConfig};
	use crate::utils::{first_of_month, today};
	use std::sync::Arc;
	use std::time::Duration;

	fn setup() -> (Arc<FakeLedger>, Arc<LedgerStore>, SyncCacheManager) {
		let fake = Arc::new(FakeLedger::new());
		fake.add_ledger("shared", "Household");
		fake.add_account("shared", "alice-contribution", "Alice");
		fake.add_account("shared", "bob-contribution", "Bob");
		let store = Arc::new(LedgerStore::new());
		let manager = SyncCacheManager::new(
			fake.clone(),
			Arc::new(PersistentCacheStore::new(
				Box::new(MemoryCacheRepository::new(1 << 20)),
				2,
			)),
			store.clone(),
			Arc::new(LogNotifier),
			SyncConfig {
				freshness: Duration::from_secs(600),
				lookback_years: 2,
			},
		);
		(fake, store, manager)
	}

	fn new_transfer() -> NewTransaction {
		NewTransaction {
			account_id: "alice-contribution".to_string(),
			date: today(),
			amount: -50_000,
			payee_name: None,
			category_id: None,
			memo: Some("#B-XY23ZK#".to_string()),
			transfer_account_id: Some("bob-contribution".to_string()),
			cleared: true,
		}
	}

	#[tokio::test]
	async fn writes_update_the_store_and_force_a_delta_on_next_read() {
		let (fake, store, manager) = setup();
		manager.fetch_transactions("shared", FetchRequest::default()).await.unwrap();

		let created = manager.create_transaction("shared", &new_transfer()).await.unwrap();
		assert_eq!(store.transactions("shared").len(), 1);

		let records = manager.fetch_transactions("shared", FetchRequest::default()).await.unwrap();
		// the paired side of the transfer arrives with the delta
		assert_eq!(records.len(), 2);
		assert_eq!(fake.calls(Op::ListTransactions), 2);

		manager
			.update_transaction("shared", &created.id, &TransactionUpdate::memo("moved"))
			.await
			.unwrap();
		assert_eq!(store.transaction("shared", &created.id).unwrap().memo(), "moved");
	}

	#[tokio::test]
	async fn deleting_a_missing_transaction_drops_it_locally() {
		let (fake, store, manager) = setup();
		let created = manager.create_transaction("shared", &new_transfer()).await.unwrap();
		manager.fetch_transactions("shared", FetchRequest::default()).await.unwrap();
		let pair = store
			.transactions("shared")
			.into_iter()
			.find(|t| t.id != created.id)
			.unwrap();

		manager.delete_transaction("shared", &created.id).await.unwrap();
		let err = manager.delete_transaction("shared", &pair.id).await.unwrap_err();
		assert!(err.is_not_found());
		assert!(store.transactions("shared").is_empty());
		assert!(fake.live_transactions("shared").is_empty());
	}

	#[tokio::test]
	async fn failed_write_leaves_the_store_untouched() {
		let (fake, store, manager) = setup();
		fake.fail_next(Op::CreateTransaction, FailKind::Unavailable);
		let err = manager.create_transaction("shared", &new_transfer()).await;
		assert!(matches!(err, Err(LedgerError::ServiceUnavailable(503))));
		assert!(store.transactions("shared").is_empty());
	}

	#[tokio::test]
	async fn category_budget_updates_pass_through() {
		let (fake, _store, manager) = setup();
		fake.set_category("shared", "groceries", 10_000, -4_000);
		let month = first_of_month(today());
		let category = manager
			.update_category_budget("shared", month, "groceries", 25_000)
			.await
			.unwrap();
		assert_eq!(category.balance, 21_000);
		assert_eq!(manager.get_category("shared", month, "groceries").await.unwrap().budgeted, 25_000);
		assert_eq!(manager.list_accounts("shared").await.unwrap().len(), 2);
	}
}
