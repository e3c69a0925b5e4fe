//! End-to-end flows against an in-memory household of three ledgers.

use super::*;
use crate::cache::MemoryCacheRepository;
use crate::config::MonthlyAllocation;
use crate::ledger::testing::{FailKind, FakeLedger, Op};
use crate::notify::testing::{RecordingNotifier, ScriptedConfirmation};
use crate::sync::{FetchRequest, SyncConfig};
use crate::tag::{self, Tag};
use crate::utils::today;

use chrono::Duration as Days;
use std::time::Duration;

struct Household {
	fake: Arc<FakeLedger>,
	cache: Arc<PersistentCacheStore>,
	store: Arc<LedgerStore>,
	sync: Arc<SyncCacheManager>,
	notifier: Arc<RecordingNotifier>,
	confirmation: Arc<ScriptedConfirmation>,
	engine: ReconciliationEngine,
}

fn participant(name: &str, account: Option<&str>) -> Participant {
	Participant {
		name: name.to_string(),
		personal_ledger_id: format!("{name}-ledger"),
		personal_account_id: account.map(str::to_string),
		shared_category_id: format!("{name}-shared"),
		balancing_category_id: format!("{name}-balancing"),
		contribution_account_id: format!("{name}-contribution"),
	}
}

fn household_config() -> ReconcileConfig {
	ReconcileConfig {
		shared_ledger_id: "shared".to_string(),
		participants: vec![participant("alice", None), participant("bob", Some("bob-checking"))],
		reconciliation_cutoff_date: None,
		monthly_allocations: vec![
			MonthlyAllocation {
				participant: "alice".to_string(),
				amount: 300_000,
				category_id: None,
			},
			MonthlyAllocation {
				participant: "bob".to_string(),
				amount: 200_000,
				category_id: None,
			},
		],
	}
}

fn household(confirm: bool) -> Household {
	let fake = Arc::new(FakeLedger::new());
	fake.add_ledger("shared", "Household");
	fake.add_account("shared", "alice-contribution", "Alice");
	fake.add_account("shared", "bob-contribution", "Bob");
	for name in ["alice", "bob"] {
		let ledger = format!("{name}-ledger");
		fake.add_ledger(&ledger, name);
		fake.add_account(&ledger, &format!("{name}-checking"), "Checking");
		fake.set_category(&ledger, &format!("{name}-shared"), 100_000, 0);
		fake.set_category(&ledger, &format!("{name}-balancing"), 0, 0);
	}

	let cache = Arc::new(PersistentCacheStore::new(
		Box::new(MemoryCacheRepository::new(1 << 20)),
		2,
	));
	let store = Arc::new(LedgerStore::new());
	store.set_config(household_config());
	let notifier = Arc::new(RecordingNotifier::default());
	let confirmation = Arc::new(ScriptedConfirmation::new(confirm));
	let sync = Arc::new(SyncCacheManager::new(
		fake.clone(),
		cache.clone(),
		store.clone(),
		notifier.clone(),
		SyncConfig {
			freshness: Duration::from_secs(600),
			lookback_years: 2,
		},
	));
	let engine = ReconciliationEngine::new(
		sync.clone(),
		store.clone(),
		cache.clone(),
		notifier.clone(),
		confirmation.clone(),
	);
	Household {
		fake,
		cache,
		store,
		sync,
		notifier,
		confirmation,
		engine,
	}
}

impl Household {
	async fn sync(&self) {
		self.sync.sync_all(FetchRequest::default()).await.unwrap();
	}

	fn budgeted(&self, ledger: &str, category: &str) -> i64 {
		self.fake.category(ledger, category).unwrap().budgeted
	}

	/// Live transactions anywhere in the household carrying `tag`.
	fn tagged(&self, tag: &Tag) -> usize {
		["shared", "alice-ledger", "bob-ledger"]
			.into_iter()
			.flat_map(|ledger| self.fake.live_transactions(ledger))
			.filter(|t| tag::extract(t.memo.as_deref().unwrap_or("")).as_ref() == Some(tag))
			.count()
	}
}

fn partial_tag(result: Result<Tag, ReconcileError>) -> (Tag, usize, usize) {
	match result {
		Err(ReconcileError::PartialFailure {
			tag,
			completed,
			expected,
			..
		}) => (Tag::parse(&tag).unwrap(), completed, expected),
		other => panic!("expected a partial failure, got {other:?}"),
	}
}

#[tokio::test]
async fn seeded_tags_form_a_complete_group() {
	let h = household(true);
	h.fake.seed("alice-ledger", "alice-checking", Some("alice-shared"), today(), -20_000, "Groceries #A1B2C3#");
	h.fake.seed("shared", "alice-contribution", None, today(), -20_000, "Groceries #A1B2C3#");
	h.sync().await;

	let group = h.store.group(&Tag::Regular("A1B2C3".to_string())).unwrap();
	assert!(group.complete);
	assert_eq!(group.personal_count(), 1);
	assert_eq!(group.shared_count(), 1);
	let snapshot = h.store.snapshot();
	let alice = snapshot.participant("alice").unwrap();
	assert!(alice.unlinked_personal.is_empty());
	assert!(alice.unlinked_shared.is_empty());
}

#[tokio::test]
async fn suggested_pair_links_and_unlinks() {
	let h = household(true);
	let personal = h.fake.seed("alice-ledger", "alice-checking", Some("alice-shared"), today(), -35_000, "Dinner");
	let shared = h.fake.seed("shared", "alice-contribution", None, today() - Days::days(2), -35_050, "Dinner out");
	h.sync().await;

	let suggestions = h.engine.suggest_matches("alice").unwrap();
	assert_eq!(suggestions.len(), 1);
	assert_eq!(suggestions[0].amount_diff, 50);
	assert_eq!(suggestions[0].date_gap_days, 2);

	let personal_ref = TransactionRef::new("alice-ledger", &personal);
	let shared_ref = TransactionRef::new("shared", &shared);
	let tag = h.engine.link(&personal_ref, &shared_ref).await.unwrap();
	assert!(h.store.group(&tag).unwrap().complete);
	assert!(h.engine.suggest_matches("alice").unwrap().is_empty());
	assert_eq!(h.tagged(&tag), 2);
	assert!(h.store.transaction("shared", &shared).unwrap().memo().starts_with("Dinner out"));

	assert_eq!(h.engine.unlink(&shared_ref).await.unwrap(), Some(tag.clone()));
	assert!(!h.store.group(&tag).unwrap().complete);
	assert_eq!(h.store.transaction("shared", &shared).unwrap().memo(), "Dinner out");

	assert_eq!(h.engine.unlink(&personal_ref).await.unwrap(), Some(tag.clone()));
	assert!(h.store.group(&tag).is_none());
	assert_eq!(h.engine.suggest_matches("alice").unwrap().len(), 1);
	assert_eq!(h.engine.unlink(&personal_ref).await.unwrap(), None);
	assert!(h.confirmation.prompts().is_empty());
}

#[tokio::test]
async fn one_sided_link_reports_partial_failure() {
	let h = household(true);
	let personal = h.fake.seed("alice-ledger", "alice-checking", Some("alice-shared"), today(), -12_000, "Taxi");
	let shared = h.fake.seed("shared", "alice-contribution", None, today(), -12_000, "Taxi");
	h.sync().await;
	h.fake.fail_after(Op::UpdateTransaction, 1, FailKind::Unavailable);

	let result = h
		.engine
		.link(
			&TransactionRef::new("alice-ledger", &personal),
			&TransactionRef::new("shared", &shared),
		)
		.await;
	let (tag, completed, expected) = partial_tag(result);
	assert_eq!((completed, expected), (1, 2));
	assert_eq!(h.tagged(&tag), 1);
	assert!(!h.store.group(&tag).unwrap().complete);
	assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn balancing_set_is_created_complete() {
	let h = household(true);
	h.sync().await;

	let tag = h.engine.create_balancing("alice", "bob", 50_000).await.unwrap();
	assert_eq!(tag.kind(), crate::tag::TagKind::Balancing);

	let group = h.store.group(&tag).unwrap();
	assert!(group.complete);
	assert_eq!(group.personal_count(), 2);
	assert_eq!(group.shared_count(), 2);
	assert_eq!(h.tagged(&tag), 4);

	// the empty balancing category was topped up from the shared-expense budget
	assert_eq!(h.budgeted("alice-ledger", "alice-balancing"), 50_000);
	assert_eq!(h.budgeted("alice-ledger", "alice-shared"), 50_000);
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());
	assert_eq!(h.confirmation.prompts().len(), 1);
}

#[tokio::test]
async fn interrupted_balancing_set_deletes_cleanly() {
	let h = household(true);
	h.sync().await;
	// payer outflow succeeds, payee inflow fails, shared transfer succeeds
	h.fake.fail_after(Op::CreateTransaction, 1, FailKind::Unavailable);

	let (tag, completed, expected) = partial_tag(h.engine.create_balancing("alice", "bob", 50_000).await);
	assert_eq!((completed, expected), (3, 4));
	let group = h.store.group(&tag).unwrap();
	assert!(!group.complete);
	assert_eq!(group.personal_count() + group.shared_count(), 3);
	assert_eq!(h.cache.journaled_tags().await.unwrap(), vec![tag.to_string()]);

	let report = h.engine.delete_balancing(&tag).await.unwrap();
	assert_eq!(report.deleted.len(), 2);
	assert_eq!(report.missing.len(), 1);
	assert_eq!(report.never_created, 1);
	assert!(report.is_clean());
	assert_eq!(h.tagged(&tag), 0);
	assert!(h.store.group(&tag).is_none());

	assert_eq!(h.budgeted("alice-ledger", "alice-shared"), 100_000);
	assert_eq!(h.budgeted("alice-ledger", "alice-balancing"), 0);
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_balancing_set_resumes_without_duplicates() {
	let h = household(true);
	h.sync().await;
	h.fake.fail_after(Op::CreateTransaction, 1, FailKind::Unavailable);
	let (tag, _, _) = partial_tag(h.engine.create_balancing("alice", "bob", 50_000).await);

	let resumed = h.engine.resume_balancing(&tag).await.unwrap();
	assert_eq!(resumed, tag);
	let group = h.store.group(&tag).unwrap();
	assert!(group.complete);
	assert_eq!(h.tagged(&tag), 4);
	assert_eq!(h.fake.live_transactions("bob-ledger").len(), 1);
	// no second top-up
	assert_eq!(h.budgeted("alice-ledger", "alice-balancing"), 50_000);
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());

	let missing = Tag::Balancing("ZZZZZZ".to_string());
	assert!(matches!(
		h.engine.resume_balancing(&missing).await,
		Err(ReconcileError::GroupNotFound(_))
	));
}

#[tokio::test]
async fn half_done_top_up_is_finished_not_repeated() {
	let h = household(true);
	h.sync().await;
	// the shared-expense debit lands, the balancing credit fails
	h.fake.fail_after(Op::UpdateCategory, 1, FailKind::Unavailable);
	let (tag, completed, expected) = partial_tag(h.engine.create_balancing("alice", "bob", 50_000).await);
	assert_eq!((completed, expected), (0, 4));
	assert_eq!(h.budgeted("alice-ledger", "alice-shared"), 50_000);
	assert_eq!(h.budgeted("alice-ledger", "alice-balancing"), 0);
	assert_eq!(h.fake.calls(Op::CreateTransaction), 0);
	let plan: BalancingPlan = h.cache.load_journal(&tag.to_string()).await.unwrap().unwrap();
	assert_eq!(plan.budget_debited, 50_000);

	h.engine.resume_balancing(&tag).await.unwrap();
	assert_eq!(h.budgeted("alice-ledger", "alice-shared"), 50_000);
	assert_eq!(h.budgeted("alice-ledger", "alice-balancing"), 50_000);
	assert_eq!(h.tagged(&tag), 4);
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn balancing_input_is_validated_before_any_write() {
	let h = household(true);
	assert!(matches!(
		h.engine.create_balancing("alice", "bob", 0).await,
		Err(ReconcileError::InvalidAmount(0))
	));
	assert!(matches!(
		h.engine.create_balancing("alice", "alice", 1_000).await,
		Err(ReconcileError::SameParticipant(_))
	));
	assert!(matches!(
		h.engine.create_balancing("alice", "carol", 1_000).await,
		Err(ReconcileError::UnknownParticipant(_))
	));
	assert_eq!(h.fake.calls(Op::CreateTransaction), 0);
	assert!(h.confirmation.prompts().is_empty());
}

#[tokio::test]
async fn unresolved_booking_account_stops_before_any_write() {
	let h = household(true);
	// alice has no configured account, so hers is looked up in her ledger
	h.fake.fail_next(Op::GetLedger, FailKind::Unavailable);

	let result = h.engine.create_balancing("bob", "alice", 50_000).await;
	assert!(matches!(result, Err(ReconcileError::Sync(_))), "{result:?}");
	assert_eq!(h.fake.calls(Op::CreateTransaction), 0);
	assert_eq!(h.fake.calls(Op::UpdateCategory), 0);
	for ledger in ["shared", "alice-ledger", "bob-ledger"] {
		assert!(h.fake.live_transactions(ledger).is_empty(), "{ledger}");
	}
	assert!(h.confirmation.prompts().is_empty());
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());

	let tag = h.engine.create_balancing("bob", "alice", 50_000).await.unwrap();
	assert_eq!(h.tagged(&tag), 4);
}

#[tokio::test]
async fn declined_confirmation_writes_nothing() {
	let h = household(false);
	h.sync().await;

	let result = h.engine.create_balancing("alice", "bob", 50_000).await;
	assert!(matches!(result, Err(ReconcileError::Declined)));
	assert_eq!(h.fake.calls(Op::CreateTransaction), 0);
	assert_eq!(h.fake.calls(Op::UpdateCategory), 0);
	assert!(h.cache.journaled_tags().await.unwrap().is_empty());
	assert!(h.notifier.messages().is_empty());

	let result = h.engine.apply_monthly_allocations(1, 2026).await;
	assert!(matches!(result, Err(ReconcileError::Declined)));
	assert_eq!(h.fake.calls(Op::CreateTransaction), 0);
}

#[tokio::test]
async fn busy_flow_refuses_a_second_trigger() {
	let h = household(true);
	let held = h.engine.begin(Flow::Link).unwrap();

	let result = h
		.engine
		.link(&TransactionRef::new("alice-ledger", "tx-1"), &TransactionRef::new("shared", "tx-2"))
		.await;
	assert!(matches!(result, Err(ReconcileError::FlowBusy(Flow::Link))));
	assert!(h.notifier.messages().is_empty());
	// other flows keep their own flag
	assert!(h.engine.begin(Flow::Unlink).is_ok());

	drop(held);
	assert!(h.engine.begin(Flow::Link).is_ok());
}

#[tokio::test]
async fn monthly_allocations_are_idempotent() {
	let h = household(true);
	h.sync().await;

	let first = h.engine.apply_monthly_allocations(1, 2026).await.unwrap();
	assert_eq!(first.len(), 2);
	assert!(first.iter().all(|(_, o)| matches!(o, MonthlyOutcome::Created(_))));
	let group = h.store.group(&Tag::monthly(1, 2026)).unwrap();
	assert!(group.complete);
	assert_eq!(group.shared_count(), 2);

	let second = h.engine.apply_monthly_allocations(1, 2026).await.unwrap();
	for ((name, created), (again, outcome)) in first.iter().zip(&second) {
		assert_eq!(name, again);
		assert_eq!(outcome, &MonthlyOutcome::Unchanged(created.transaction_id().to_string()));
	}

	let mut config = household_config();
	config.monthly_allocations[0].amount = 350_000;
	h.store.set_config(config);
	let third = h.engine.apply_monthly_allocations(1, 2026).await.unwrap();
	assert_eq!(
		third[0].1,
		MonthlyOutcome::Updated(first[0].1.transaction_id().to_string())
	);
	assert!(matches!(third[1].1, MonthlyOutcome::Unchanged(_)));
	let alice = h.store.transaction("shared", first[0].1.transaction_id()).unwrap();
	assert_eq!(alice.amount, 350_000);
	assert_eq!(alice.date, chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
	assert_eq!(h.fake.live_transactions("shared").len(), 2);

	assert!(matches!(
		h.engine.apply_monthly_allocations(13, 2026).await,
		Err(ReconcileError::InvalidPeriod { month: 13, year: 2026 })
	));
}

#[tokio::test]
async fn monthly_years_outside_the_tag_range_are_refused() {
	let h = household(true);
	h.sync().await;
	let alice = &household_config().monthly_allocations[0];

	for year in [1999, 2100, 2126] {
		assert!(matches!(
			h.engine.reconcile_monthly(alice, 1, year).await,
			Err(ReconcileError::InvalidPeriod { month: 1, year: y }) if y == year
		));
	}
	assert!(h.fake.live_transactions("shared").is_empty());

	let created = h.engine.reconcile_monthly(alice, 1, 2099).await.unwrap();
	let again = h.engine.reconcile_monthly(alice, 1, 2099).await.unwrap();
	assert_eq!(again, MonthlyOutcome::Unchanged(created.transaction_id().to_string()));
	assert_eq!(h.fake.live_transactions("shared").len(), 1);
}
