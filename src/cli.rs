//! Command line surface of the binary.
//!
//! Every command syncs the household first, then runs one engine operation and logs what it
//! did. Without a command the status of the household is logged.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::context::AppContext;
use crate::reconcile::{ReconcileError, TransactionRef};
use crate::sync::{FetchRequest, SyncError};
use crate::tag::Tag;
use crate::utils::{format_milliunits, parse_milliunits};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "ledger-link-sync", about = "Reconcile personal ledgers against a shared one.")]
pub struct Cli {
	/// Answer yes to every confirmation, for unattended runs.
	#[arg(long, global = true)]
	pub yes: bool,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Sync and log linked groups, unlinked transactions and unfinished balancing sets.
	Status,
	/// List the ledgers the credential can see.
	Ledgers {
		/// Ask the remote service even when the cached list is fresh.
		#[arg(long)]
		refresh: bool,
	},
	/// Tag a personal transaction and a shared one as the same expense.
	Link {
		/// Ledger of the personal transaction
		personal_ledger: String,
		personal_transaction: String,
		/// Transaction in the shared ledger
		shared_transaction: String,
	},
	/// Remove the tag from one transaction.
	Unlink {
		ledger: String,
		transaction: String,
	},
	/// Move an amount from one participant to another with a balancing set.
	Balance {
		payer: String,
		payee: String,
		/// Display amount, e.g. 12.50
		#[arg(value_parser = parse_amount)]
		amount: i64,
	},
	/// Finish an interrupted balancing set.
	Resume {
		#[arg(value_parser = parse_tag)]
		tag: Tag,
	},
	/// Delete every transaction of a balancing set and give its budget back.
	DeleteBalancing {
		#[arg(value_parser = parse_tag)]
		tag: Tag,
	},
	/// Book or correct the configured monthly contributions.
	Monthly {
		month: u32,
		year: i32,
	},
}

fn parse_amount(value: &str) -> Result<i64, String> {
	parse_milliunits(value).ok_or_else(|| format!("not an amount: {value}"))
}

fn parse_tag(value: &str) -> Result<Tag, String> {
	Tag::try_from(value.trim_matches('#').to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
	#[error("Config error: {0}")]
	Config(#[from] ConfigError),

	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("Sync error: {0}")]
	Sync(#[from] SyncError),

	#[error("{0}")]
	Reconcile(#[from] ReconcileError),
}

pub async fn run(context: &AppContext, command: Command) -> Result<(), CommandError> {
	if let Command::Ledgers { refresh } = command {
		for ledger in context.sync.ledgers(refresh).await? {
			info!("{} {}", ledger.id, ledger.name);
		}
		return Ok(());
	}

	context.sync.sync_all(FetchRequest::default()).await?;
	let engine = &context.engine;
	match command {
		Command::Status | Command::Ledgers { .. } => status(context).await?,
		Command::Link {
			personal_ledger,
			personal_transaction,
			shared_transaction,
		} => {
			let config = context.store.config();
			let shared = TransactionRef::new(config.require_shared_ledger()?, shared_transaction);
			let personal = TransactionRef::new(personal_ledger, personal_transaction);
			let tag = engine.link(&personal, &shared).await?;
			info!("Linked as {}", tag);
		}
		Command::Unlink { ledger, transaction } => {
			match engine.unlink(&TransactionRef::new(ledger, transaction)).await? {
				Some(tag) => info!("Removed {}", tag),
				None => info!("Transaction carried no tag"),
			}
		}
		Command::Balance {
			payer,
			payee,
			amount,
		} => {
			let tag = engine.create_balancing(&payer, &payee, amount).await?;
			info!("Created balancing set {}", tag);
		}
		Command::Resume { tag } => {
			engine.resume_balancing(&tag).await?;
			info!("Balancing set {} complete", tag);
		}
		Command::DeleteBalancing { tag } => {
			let report = engine.delete_balancing(&tag).await?;
			for (id, error) in &report.failed {
				warn!("  {} not deleted: {}", id, error);
			}
		}
		Command::Monthly { month, year } => {
			for (participant, outcome) in engine.apply_monthly_allocations(month, year).await? {
				info!("{}: {:?}", participant, outcome);
			}
		}
	}
	Ok(())
}

async fn status(context: &AppContext) -> Result<(), CommandError> {
	let snapshot = context.store.snapshot();
	info!(
		"{} linked group(s), {} incomplete",
		snapshot.groups.len(),
		snapshot.incomplete_groups().count()
	);
	for group in snapshot.incomplete_groups() {
		warn!(
			"Incomplete group {}: {} personal, {} shared",
			group.tag,
			group.personal_count(),
			group.shared_count()
		);
	}

	for (name, state) in &snapshot.participants {
		let unlinked_total: i64 = state
			.unlinked_personal
			.iter()
			.map(|t| t.amount)
			.sum();
		info!(
			"{}: {} linked, {} unlinked personal ({}), {} unlinked shared",
			name,
			state.linked.len(),
			state.unlinked_personal.len(),
			format_milliunits(unlinked_total),
			state.unlinked_shared.len()
		);
		match context.engine.suggest_matches(name) {
			Ok(suggestions) => {
				for suggestion in suggestions.iter().take(5) {
					info!(
						"  suggested: {} {} {} <-> {} {} {} ({} day(s) apart)",
						suggestion.personal.id,
						suggestion.personal.date,
						format_milliunits(suggestion.personal.amount),
						suggestion.shared.id,
						suggestion.shared.date,
						format_milliunits(suggestion.shared.amount),
						suggestion.date_gap_days
					);
				}
			}
			Err(e) => warn!("No suggestions for {}: {}", name, e),
		}
	}

	for plan in context.pending_plans().await? {
		if plan.is_finished() {
			info!("Balancing set {} is complete, its journal entry is stale", plan.tag);
			continue;
		}
		warn!(
			"Balancing set {} ({} from {} to {}) is unfinished: {} of {} transactions in place",
			plan.tag,
			format_milliunits(plan.amount),
			plan.payer,
			plan.payee,
			plan.completed_count(),
			plan.expected_count
		);
	}
	Ok(())
}
