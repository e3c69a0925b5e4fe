//! In-memory ledger service used by tests.
//!
//! Mirrors the remote semantics the core relies on: every write bumps a per-ledger server
//! knowledge counter, incremental listings return records changed or deleted since a cursor,
//! transfers create their paired entry, and deleting one side of a transfer deletes both.
//! Failures can be scripted per operation.

use super::client::LedgerApi;
use super::types::*;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
	ListLedgers,
	GetLedger,
	ListAccounts,
	ListCategories,
	GetCategory,
	UpdateCategory,
	ListTransactions,
	GetTransaction,
	CreateTransaction,
	UpdateTransaction,
	DeleteTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
	Unauthorized,
	NotFound,
	RateLimited,
	Unavailable,
}

impl FailKind {
	fn to_error(self, what: &str) -> LedgerError {
		match self {
			FailKind::Unauthorized => LedgerError::Unauthorized,
			FailKind::NotFound => LedgerError::NotFound(what.to_string()),
			FailKind::RateLimited => LedgerError::RateLimited,
			FailKind::Unavailable => LedgerError::ServiceUnavailable(503),
		}
	}
}

struct FailRule {
	op: Op,
	skip: usize,
	kind: FailKind,
}

#[derive(Default)]
struct FakeLedgerState {
	name: String,
	knowledge: u64,
	/// Transactions with the knowledge value of their last change.
	transactions: Vec<(Transaction, u64)>,
	accounts: Vec<Account>,
	categories: HashMap<String, Category>,
}

#[derive(Default)]
struct Inner {
	ledgers: HashMap<String, FakeLedgerState>,
	next_id: u64,
	rules: Vec<FailRule>,
	offline: bool,
	calls: HashMap<Op, usize>,
	queries: Vec<(String, TransactionQuery)>,
}

#[derive(Default)]
pub struct FakeLedger {
	inner: Mutex<Inner>,
}

impl FakeLedger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_ledger(&self, ledger_id: &str, name: &str) {
		let mut inner = self.inner.lock().unwrap();
		inner.ledgers.entry(ledger_id.to_string()).or_default().name = name.to_string();
	}

	pub fn add_account(&self, ledger_id: &str, account_id: &str, name: &str) {
		let mut inner = self.inner.lock().unwrap();
		inner
			.ledgers
			.entry(ledger_id.to_string())
			.or_default()
			.accounts
			.push(Account {
				id: account_id.to_string(),
				name: name.to_string(),
				on_budget: true,
				closed: false,
				deleted: false,
				balance: 0,
			});
	}

	pub fn set_category(&self, ledger_id: &str, category_id: &str, budgeted: i64, activity: i64) {
		let mut inner = self.inner.lock().unwrap();
		inner
			.ledgers
			.entry(ledger_id.to_string())
			.or_default()
			.categories
			.insert(
				category_id.to_string(),
				Category {
					id: category_id.to_string(),
					name: category_id.to_string(),
					category_group_name: None,
					budgeted,
					activity,
					balance: budgeted + activity,
					hidden: false,
					deleted: false,
				},
			);
	}

	pub fn category(&self, ledger_id: &str, category_id: &str) -> Option<Category> {
		let inner = self.inner.lock().unwrap();
		inner.ledgers.get(ledger_id)?.categories.get(category_id).cloned()
	}

	/// Insert a transaction directly, as if it had been entered elsewhere.
	pub fn seed(
		&self,
		ledger_id: &str,
		account_id: &str,
		category_id: Option<&str>,
		date: NaiveDate,
		amount: i64,
		memo: &str,
	) -> String {
		let new = NewTransaction {
			account_id: account_id.to_string(),
			date,
			amount,
			payee_name: None,
			category_id: category_id.map(str::to_string),
			memo: Some(memo.to_string()),
			transfer_account_id: None,
			cleared: true,
		};
		let mut inner = self.inner.lock().unwrap();
		insert(&mut inner, ledger_id, &new).id
	}

	/// Fail the `skip + 1`-th next call of `op`.
	pub fn fail_after(&self, op: Op, skip: usize, kind: FailKind) {
		self.inner
			.lock()
			.unwrap()
			.rules
			.push(FailRule { op, skip, kind });
	}

	pub fn fail_next(&self, op: Op, kind: FailKind) {
		self.fail_after(op, 0, kind);
	}

	/// Every call fails with `ServiceUnavailable` while offline.
	pub fn set_offline(&self, offline: bool) {
		self.inner.lock().unwrap().offline = offline;
	}

	pub fn calls(&self, op: Op) -> usize {
		*self.inner.lock().unwrap().calls.get(&op).unwrap_or(&0)
	}

	pub fn last_query(&self, ledger_id: &str) -> Option<TransactionQuery> {
		self.inner
			.lock()
			.unwrap()
			.queries
			.iter()
			.rev()
			.find(|(id, _)| id == ledger_id)
			.map(|(_, q)| *q)
	}

	/// Live (not deleted) transactions of a ledger.
	pub fn live_transactions(&self, ledger_id: &str) -> Vec<Transaction> {
		let inner = self.inner.lock().unwrap();
		inner
			.ledgers
			.get(ledger_id)
			.map(|l| {
				l.transactions
					.iter()
					.filter(|(t, _)| !t.deleted)
					.map(|(t, _)| t.clone())
					.collect()
			})
			.unwrap_or_default()
	}

	/// Record the call and apply scripted failures.
	fn enter(&self, op: Op, what: &str) -> Result<(), LedgerError> {
		let mut inner = self.inner.lock().unwrap();
		*inner.calls.entry(op).or_insert(0) += 1;
		if inner.offline {
			return Err(LedgerError::ServiceUnavailable(503));
		}
		if let Some(pos) = inner.rules.iter().position(|r| r.op == op) {
			if inner.rules[pos].skip == 0 {
				let rule = inner.rules.remove(pos);
				return Err(rule.kind.to_error(what));
			}
			inner.rules[pos].skip -= 1;
		}
		Ok(())
	}
}

fn insert(inner: &mut Inner, ledger_id: &str, new: &NewTransaction) -> Transaction {
	inner.next_id += 1;
	let id = format!("tx-{}", inner.next_id);
	let ledger = inner.ledgers.entry(ledger_id.to_string()).or_default();
	ledger.knowledge += 1;
	let transaction = Transaction {
		id,
		date: new.date,
		amount: new.amount,
		memo: new.memo.clone(),
		payee_name: new.payee_name.clone(),
		account_id: new.account_id.clone(),
		category_id: new.category_id.clone(),
		category_name: new.category_id.clone(),
		transfer_account_id: new.transfer_account_id.clone(),
		cleared: new.cleared,
		deleted: false,
		approved: true,
		flag_color: None,
		import_id: None,
	};
	ledger
		.transactions
		.push((transaction.clone(), ledger.knowledge));
	transaction
}

fn not_found(what: &str) -> LedgerError {
	LedgerError::NotFound(what.to_string())
}

#[async_trait]
impl LedgerApi for FakeLedger {
	async fn list_ledgers(&self) -> Result<Vec<LedgerSummary>, LedgerError> {
		self.enter(Op::ListLedgers, "ledgers")?;
		let inner = self.inner.lock().unwrap();
		let mut ledgers: Vec<LedgerSummary> = inner
			.ledgers
			.iter()
			.map(|(id, l)| LedgerSummary {
				id: id.clone(),
				name: l.name.clone(),
				last_modified_on: None,
			})
			.collect();
		ledgers.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(ledgers)
	}

	async fn get_ledger(
		&self,
		ledger_id: &str,
		_last_knowledge: Option<u64>,
	) -> Result<LedgerDetail, LedgerError> {
		self.enter(Op::GetLedger, ledger_id)?;
		let inner = self.inner.lock().unwrap();
		let ledger = inner.ledgers.get(ledger_id).ok_or_else(|| not_found(ledger_id))?;
		Ok(LedgerDetail {
			ledger: LedgerSummary {
				id: ledger_id.to_string(),
				name: ledger.name.clone(),
				last_modified_on: None,
			},
			accounts: ledger.accounts.clone(),
			categories: ledger.categories.values().cloned().collect(),
			server_knowledge: ledger.knowledge,
		})
	}

	async fn list_accounts(&self, ledger_id: &str) -> Result<Vec<Account>, LedgerError> {
		self.enter(Op::ListAccounts, ledger_id)?;
		let inner = self.inner.lock().unwrap();
		let ledger = inner.ledgers.get(ledger_id).ok_or_else(|| not_found(ledger_id))?;
		Ok(ledger.accounts.clone())
	}

	async fn list_categories(&self, ledger_id: &str) -> Result<Vec<Category>, LedgerError> {
		self.enter(Op::ListCategories, ledger_id)?;
		let inner = self.inner.lock().unwrap();
		let ledger = inner.ledgers.get(ledger_id).ok_or_else(|| not_found(ledger_id))?;
		Ok(ledger.categories.values().cloned().collect())
	}

	async fn get_category(
		&self,
		ledger_id: &str,
		_month: NaiveDate,
		category_id: &str,
	) -> Result<Category, LedgerError> {
		self.enter(Op::GetCategory, category_id)?;
		let inner = self.inner.lock().unwrap();
		inner
			.ledgers
			.get(ledger_id)
			.and_then(|l| l.categories.get(category_id))
			.cloned()
			.ok_or_else(|| not_found(category_id))
	}

	async fn update_category_budget(
		&self,
		ledger_id: &str,
		_month: NaiveDate,
		category_id: &str,
		budgeted: i64,
	) -> Result<Category, LedgerError> {
		self.enter(Op::UpdateCategory, category_id)?;
		let mut inner = self.inner.lock().unwrap();
		let category = inner
			.ledgers
			.get_mut(ledger_id)
			.and_then(|l| l.categories.get_mut(category_id))
			.ok_or_else(|| not_found(category_id))?;
		category.budgeted = budgeted;
		category.balance = budgeted + category.activity;
		Ok(category.clone())
	}

	async fn list_transactions(
		&self,
		ledger_id: &str,
		query: TransactionQuery,
	) -> Result<TransactionPage, LedgerError> {
		self.enter(Op::ListTransactions, ledger_id)?;
		let mut inner = self.inner.lock().unwrap();
		inner.queries.push((ledger_id.to_string(), query));
		let ledger = inner.ledgers.get(ledger_id).ok_or_else(|| not_found(ledger_id))?;
		let transactions = ledger
			.transactions
			.iter()
			.filter(|(t, changed)| match query.last_knowledge_of_server {
				Some(knowledge) => *changed > knowledge,
				None => !t.deleted,
			})
			.filter(|(t, _)| query.since_date.is_none_or(|since| t.date >= since))
			.map(|(t, _)| t.clone())
			.collect();
		Ok(TransactionPage {
			transactions,
			server_knowledge: ledger.knowledge,
		})
	}

	async fn get_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError> {
		self.enter(Op::GetTransaction, transaction_id)?;
		let inner = self.inner.lock().unwrap();
		inner
			.ledgers
			.get(ledger_id)
			.and_then(|l| {
				l.transactions
					.iter()
					.find(|(t, _)| t.id == transaction_id && !t.deleted)
			})
			.map(|(t, _)| t.clone())
			.ok_or_else(|| not_found(transaction_id))
	}

	async fn create_transaction(
		&self,
		ledger_id: &str,
		transaction: &NewTransaction,
	) -> Result<Transaction, LedgerError> {
		self.enter(Op::CreateTransaction, ledger_id)?;
		let mut inner = self.inner.lock().unwrap();
		let created = insert(&mut inner, ledger_id, transaction);
		if let Some(target) = &transaction.transfer_account_id {
			let pair = NewTransaction {
				account_id: target.clone(),
				amount: -transaction.amount,
				transfer_account_id: Some(transaction.account_id.clone()),
				category_id: None,
				..transaction.clone()
			};
			insert(&mut inner, ledger_id, &pair);
		}
		Ok(created)
	}

	async fn update_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
		update: &TransactionUpdate,
	) -> Result<Transaction, LedgerError> {
		self.enter(Op::UpdateTransaction, transaction_id)?;
		let mut inner = self.inner.lock().unwrap();
		let ledger = inner
			.ledgers
			.get_mut(ledger_id)
			.ok_or_else(|| not_found(ledger_id))?;
		ledger.knowledge += 1;
		let knowledge = ledger.knowledge;
		let (transaction, changed) = ledger
			.transactions
			.iter_mut()
			.find(|(t, _)| t.id == transaction_id && !t.deleted)
			.ok_or_else(|| not_found(transaction_id))?;
		update.apply_to(transaction);
		*changed = knowledge;
		Ok(transaction.clone())
	}

	async fn delete_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError> {
		self.enter(Op::DeleteTransaction, transaction_id)?;
		let mut inner = self.inner.lock().unwrap();
		let ledger = inner
			.ledgers
			.get_mut(ledger_id)
			.ok_or_else(|| not_found(ledger_id))?;
		ledger.knowledge += 1;
		let knowledge = ledger.knowledge;
		let deleted = {
			let (transaction, changed) = ledger
				.transactions
				.iter_mut()
				.find(|(t, _)| t.id == transaction_id && !t.deleted)
				.ok_or_else(|| not_found(transaction_id))?;
			transaction.deleted = true;
			*changed = knowledge;
			transaction.clone()
		};
		if let Some(target) = &deleted.transfer_account_id {
			if let Some((pair, changed)) = ledger.transactions.iter_mut().find(|(t, _)| {
				!t.deleted
					&& &t.account_id == target
					&& t.transfer_account_id.as_deref() == Some(deleted.account_id.as_str())
					&& t.amount == -deleted.amount
					&& t.date == deleted.date
			}) {
				pair.deleted = true;
				*changed = knowledge;
			}
		}
		Ok(deleted)
	}
}
