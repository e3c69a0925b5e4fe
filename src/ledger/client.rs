//!
//! HTTP client for the remote ledger service.
//!
//! This module provides the [`LedgerApi`] trait, the seam every other component talks to, and
//! [`HttpLedgerClient`], its JSON-over-HTTP implementation. Responses are wrapped in a `data`
//! envelope. Transport failures and status codes are classified into [`LedgerError`] so callers
//! can decide between falling back to cached data and surfacing the failure.

use super::types::*;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Operations the reconciliation core needs from the remote ledger service.
#[async_trait]
pub trait LedgerApi: Send + Sync {
	async fn list_ledgers(&self) -> Result<Vec<LedgerSummary>, LedgerError>;

	/// Ledger detail. With `last_knowledge` set, the service may answer with only what changed.
	async fn get_ledger(
		&self,
		ledger_id: &str,
		last_knowledge: Option<u64>,
	) -> Result<LedgerDetail, LedgerError>;

	async fn list_accounts(&self, ledger_id: &str) -> Result<Vec<Account>, LedgerError>;

	async fn list_categories(&self, ledger_id: &str) -> Result<Vec<Category>, LedgerError>;

	/// A category as budgeted for the month starting at `month`.
	async fn get_category(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
	) -> Result<Category, LedgerError>;

	async fn update_category_budget(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
		budgeted: i64,
	) -> Result<Category, LedgerError>;

	/// Bulk listing. With a cursor, only records changed or deleted since it are returned.
	async fn list_transactions(
		&self,
		ledger_id: &str,
		query: TransactionQuery,
	) -> Result<TransactionPage, LedgerError>;

	async fn get_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError>;

	async fn create_transaction(
		&self,
		ledger_id: &str,
		transaction: &NewTransaction,
	) -> Result<Transaction, LedgerError>;

	async fn update_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
		update: &TransactionUpdate,
	) -> Result<Transaction, LedgerError>;

	async fn delete_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
	data: T,
}

#[derive(Deserialize)]
struct LedgersData {
	ledgers: Vec<LedgerSummary>,
}

#[derive(Deserialize)]
struct AccountsData {
	accounts: Vec<Account>,
}

#[derive(Deserialize)]
struct CategoriesData {
	categories: Vec<Category>,
}

#[derive(Deserialize)]
struct CategoryData {
	category: Category,
}

#[derive(Deserialize)]
struct TransactionData {
	transaction: Transaction,
}

#[derive(Serialize)]
struct TransactionBody<'a, T: Serialize> {
	transaction: &'a T,
}

/// JSON-over-HTTP ledger client
#[derive(Clone)]
pub struct HttpLedgerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the service, without trailing slash.
	base_url: String,
	/// Bearer credential sent with every request.
	token: String,
	/// Upper bound for retrying idempotent reads.
	max_retry_elapsed: Duration,
}

impl HttpLedgerClient {
	/// Create a new client.
	///
	/// # Arguments
	/// * `base_url` - The service endpoint, e.g. `https://api.example.com/v1`.
	/// * `token` - The bearer credential.
	///
	/// No request timeout is configured; failures are classified instead.
	pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, LedgerError> {
		let http_client = Client::builder().build()?;
		Ok(Self {
			http_client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			token: token.into(),
			max_retry_elapsed: Duration::from_secs(30),
		})
	}

	pub fn with_max_retry_elapsed(mut self, elapsed: Duration) -> Self {
		self.max_retry_elapsed = elapsed;
		self
	}

	fn request(&self, method: Method, path: &str) -> RequestBuilder {
		self.http_client
			.request(method, format!("{}{}", self.base_url, path))
			.bearer_auth(&self.token)
	}

	/// Send once and classify the outcome.
	async fn execute<T: DeserializeOwned>(
		&self,
		request: RequestBuilder,
		path: &str,
	) -> Result<T, LedgerError> {
		let response = request.send().await?;
		let status = response.status();
		debug!("{} -> {}", path, status);

		if let Some(error) = classify_status(status, path) {
			return Err(error);
		}
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(LedgerError::InvalidResponse(format!(
				"unexpected status {} for {}: {}",
				status, path, body
			)));
		}

		let bytes = response.bytes().await?;
		let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
		Ok(envelope.data)
	}

	/// Idempotent read, retried with exponential backoff while the error is transient.
	async fn get<T: DeserializeOwned>(
		&self,
		path: &str,
		query: &[(&str, String)],
	) -> Result<T, LedgerError> {
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.max_retry_elapsed),
			..ExponentialBackoff::default()
		};

		retry(policy, move || async move {
			let request = self.request(Method::GET, path).query(query);
			self.execute::<T>(request, path).await.map_err(|e| {
				if e.is_transient() {
					warn!("Transient error reading {}: {}", path, e);
					backoff::Error::transient(e)
				} else {
					backoff::Error::permanent(e)
				}
			})
		})
		.await
	}

	/// Writes are sent exactly once.
	async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
		&self,
		method: Method,
		path: &str,
		body: Option<&B>,
	) -> Result<T, LedgerError> {
		let mut request = self.request(method, path);
		if let Some(body) = body {
			request = request.json(body);
		}
		self.execute(request, path).await
	}
}

/// Map a status code onto the error taxonomy. `None` means the status is not an error we
/// classify.
fn classify_status(status: StatusCode, path: &str) -> Option<LedgerError> {
	match status {
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(LedgerError::Unauthorized),
		StatusCode::NOT_FOUND => Some(LedgerError::NotFound(path.to_string())),
		StatusCode::TOO_MANY_REQUESTS => Some(LedgerError::RateLimited),
		s if s.is_server_error() => Some(LedgerError::ServiceUnavailable(s.as_u16())),
		_ => None,
	}
}

fn month_path(month: NaiveDate) -> String {
	month.format("%Y-%m-01").to_string()
}

#[async_trait]
impl LedgerApi for HttpLedgerClient {
	async fn list_ledgers(&self) -> Result<Vec<LedgerSummary>, LedgerError> {
		let data: LedgersData = self.get("/ledgers", &[]).await?;
		Ok(data.ledgers)
	}

	async fn get_ledger(
		&self,
		ledger_id: &str,
		last_knowledge: Option<u64>,
	) -> Result<LedgerDetail, LedgerError> {
		let mut query = Vec::new();
		if let Some(knowledge) = last_knowledge {
			query.push(("last_knowledge_of_server", knowledge.to_string()));
		}
		self.get(&format!("/ledgers/{}", ledger_id), &query).await
	}

	async fn list_accounts(&self, ledger_id: &str) -> Result<Vec<Account>, LedgerError> {
		let data: AccountsData = self
			.get(&format!("/ledgers/{}/accounts", ledger_id), &[])
			.await?;
		Ok(data.accounts)
	}

	async fn list_categories(&self, ledger_id: &str) -> Result<Vec<Category>, LedgerError> {
		let data: CategoriesData = self
			.get(&format!("/ledgers/{}/categories", ledger_id), &[])
			.await?;
		Ok(data.categories)
	}

	async fn get_category(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
	) -> Result<Category, LedgerError> {
		let path = format!(
			"/ledgers/{}/months/{}/categories/{}",
			ledger_id,
			month_path(month),
			category_id
		);
		let data: CategoryData = self.get(&path, &[]).await?;
		Ok(data.category)
	}

	async fn update_category_budget(
		&self,
		ledger_id: &str,
		month: NaiveDate,
		category_id: &str,
		budgeted: i64,
	) -> Result<Category, LedgerError> {
		let path = format!(
			"/ledgers/{}/months/{}/categories/{}",
			ledger_id,
			month_path(month),
			category_id
		);
		let body = json!({ "category": { "budgeted": budgeted } });
		let data: CategoryData = self.send(Method::PATCH, &path, Some(&body)).await?;
		Ok(data.category)
	}

	async fn list_transactions(
		&self,
		ledger_id: &str,
		query: TransactionQuery,
	) -> Result<TransactionPage, LedgerError> {
		let mut params = Vec::new();
		if let Some(since) = query.since_date {
			params.push(("since_date", since.format("%Y-%m-%d").to_string()));
		}
		if let Some(knowledge) = query.last_knowledge_of_server {
			params.push(("last_knowledge_of_server", knowledge.to_string()));
		}
		self.get(&format!("/ledgers/{}/transactions", ledger_id), &params)
			.await
	}

	async fn get_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError> {
		let data: TransactionData = self
			.get(
				&format!("/ledgers/{}/transactions/{}", ledger_id, transaction_id),
				&[],
			)
			.await?;
		Ok(data.transaction)
	}

	async fn create_transaction(
		&self,
		ledger_id: &str,
		transaction: &NewTransaction,
	) -> Result<Transaction, LedgerError> {
		let body = TransactionBody { transaction };
		let data: TransactionData = self
			.send(
				Method::POST,
				&format!("/ledgers/{}/transactions", ledger_id),
				Some(&body),
			)
			.await?;
		Ok(data.transaction)
	}

	async fn update_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
		update: &TransactionUpdate,
	) -> Result<Transaction, LedgerError> {
		let body = TransactionBody {
			transaction: update,
		};
		let data: TransactionData = self
			.send(
				Method::PUT,
				&format!("/ledgers/{}/transactions/{}", ledger_id, transaction_id),
				Some(&body),
			)
			.await?;
		Ok(data.transaction)
	}

	async fn delete_transaction(
		&self,
		ledger_id: &str,
		transaction_id: &str,
	) -> Result<Transaction, LedgerError> {
		let data: TransactionData = self
			.send::<_, ()>(
				Method::DELETE,
				&format!("/ledgers/{}/transactions/{}", ledger_id, transaction_id),
				None,
			)
			.await?;
		Ok(data.transaction)
	}
}
