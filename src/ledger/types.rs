//! Types exchanged with the remote ledger service.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A transaction as returned by the remote service.
///
/// Amounts are signed integers in 1/1000 of the display currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Remote id, unique within the ledger.
	pub id: String,
	/// Booking date.
	pub date: NaiveDate,
	/// Signed amount in milliunits. Outflows are negative.
	pub amount: i64,
	/// Free-text note. Correlation tags live here.
	#[serde(default)]
	pub memo: Option<String>,
	#[serde(default)]
	pub payee_name: Option<String>,
	pub account_id: String,
	#[serde(default)]
	pub category_id: Option<String>,
	#[serde(default)]
	pub category_name: Option<String>,
	/// Counterpart account of a transfer. `None` for regular transactions.
	#[serde(default)]
	pub transfer_account_id: Option<String>,
	#[serde(default)]
	pub cleared: bool,
	#[serde(default)]
	pub deleted: bool,
	#[serde(default)]
	pub approved: bool,
	#[serde(default)]
	pub flag_color: Option<String>,
	#[serde(default)]
	pub import_id: Option<String>,
}

/// Payload for creating a transaction.
///
/// Setting `transfer_account_id` books a transfer; the service creates the paired entry in the
/// target account itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
	pub account_id: String,
	pub date: NaiveDate,
	pub amount: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payee_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub category_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub memo: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transfer_account_id: Option<String>,
	pub cleared: bool,
}

/// Partial update of a transaction. Unset fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionUpdate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub memo: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub amount: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub date: Option<NaiveDate>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub category_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cleared: Option<bool>,
}

impl TransactionUpdate {
	pub fn memo(memo: impl Into<String>) -> Self {
		Self {
			memo: Some(memo.into()),
			..Default::default()
		}
	}

	pub fn amount(amount: i64) -> Self {
		Self {
			amount: Some(amount),
			..Default::default()
		}
	}

	/// Apply the set fields to a local copy.
	pub fn apply_to(&self, transaction: &mut Transaction) {
		if let Some(memo) = &self.memo {
			transaction.memo = Some(memo.clone());
		}
		if let Some(amount) = self.amount {
			transaction.amount = amount;
		}
		if let Some(date) = self.date {
			transaction.date = date;
		}
		if let Some(category_id) = &self.category_id {
			transaction.category_id = Some(category_id.clone());
		}
		if let Some(cleared) = self.cleared {
			transaction.cleared = cleared;
		}
	}
}

/// A page of transactions from a bulk listing.
///
/// When the listing was made with a cursor, `transactions` holds only the records changed or
/// deleted since that cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
	pub transactions: Vec<Transaction>,
	/// Cursor to pass to the next incremental listing.
	pub server_knowledge: u64,
}

/// Filter for the bulk transaction listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionQuery {
	pub since_date: Option<NaiveDate>,
	pub last_knowledge_of_server: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub last_modified_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub on_budget: bool,
	#[serde(default)]
	pub closed: bool,
	#[serde(default)]
	pub deleted: bool,
	#[serde(default)]
	pub balance: i64,
}

impl Account {
	pub fn is_open(&self) -> bool {
		!self.closed && !self.deleted
	}
}

/// A budget category for one month. `budgeted`, `activity` and `balance` are milliunits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub category_group_name: Option<String>,
	#[serde(default)]
	pub budgeted: i64,
	#[serde(default)]
	pub activity: i64,
	#[serde(default)]
	pub balance: i64,
	#[serde(default)]
	pub hidden: bool,
	#[serde(default)]
	pub deleted: bool,
}

/// Ledger detail with an optional cursor for incremental refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDetail {
	pub ledger: LedgerSummary,
	#[serde(default)]
	pub accounts: Vec<Account>,
	#[serde(default)]
	pub categories: Vec<Category>,
	pub server_knowledge: u64,
}

/// Errors from the remote ledger service, classified from the transport response.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("Unauthorized: the credential was rejected")]
	Unauthorized,

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Rate limited by the remote service")]
	RateLimited,

	#[error("Service unavailable (status {0})")]
	ServiceUnavailable(u16),

	#[error("Network error: {0}")]
	Network(#[from] reqwest::Error),

	#[error("Invalid response: {0}")]
	InvalidResponse(String),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),
}

impl LedgerError {
	/// Errors worth retrying on an idempotent read.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			LedgerError::RateLimited | LedgerError::ServiceUnavailable(_)
		)
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, LedgerError::NotFound(_))
	}
}
