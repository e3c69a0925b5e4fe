//! Reactive ledger store
//!
//! This module holds the raw per-ledger transaction sets and the active reconciliation config,
//! and keeps the derived reconciliation state in step with them:
//!
//! - `derive`: The pure recomputation of linked groups, per-participant linked and unlinked
//!   lists, and group completeness.
//! - `events`: Channels, the subscriber trait and the event bus used to publish updates.
//!
//! Every mutation recomputes the derived state synchronously before returning, so a read right
//! after a mutation always observes consistent state. Subscribers are notified after the state
//! lock is released.

/// Pure recomputation of derived state
pub mod derive;
/// Channels, subscribers and the event bus
pub mod events;

pub use derive::{DerivedState, LinkedGroup, ParticipantState};
pub use events::{Channel, EventBus, StoreError, StoreEvent, StoreSubscriber, SubscriptionId};

use crate::cache::TransactionRecord;
use crate::config::ReconcileConfig;
use crate::tag::Tag;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct StoreState {
	config: ReconcileConfig,
	raw: HashMap<String, Vec<TransactionRecord>>,
	derived: Arc<DerivedState>,
}

/// What changed, to decide which channels to publish on.
enum Change {
	Config,
	Raw(String),
}

#[derive(Default)]
pub struct LedgerStore {
	state: Mutex<StoreState>,
	bus: EventBus,
}

impl LedgerStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, StoreState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub fn subscribe(&self, channel: Channel, subscriber: Arc<dyn StoreSubscriber>) -> SubscriptionId {
		self.bus.subscribe(channel, subscriber)
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.bus.unsubscribe(id)
	}

	pub fn set_config(&self, config: ReconcileConfig) {
		self.mutate(Change::Config, |state| {
			state.config = config;
		});
	}

	/// Replace the whole raw set of a ledger. Deleted records are dropped.
	pub fn replace_transactions(&self, ledger_id: &str, records: Vec<TransactionRecord>) {
		self.mutate(Change::Raw(ledger_id.to_string()), |state| {
			let live = records.into_iter().filter(|r| !r.deleted).collect();
			state.raw.insert(ledger_id.to_string(), live);
		});
	}

	/// Insert or replace one record by id. A deleted record is removed instead.
	pub fn upsert_transaction(&self, ledger_id: &str, record: TransactionRecord) {
		self.mutate(Change::Raw(ledger_id.to_string()), |state| {
			let records = state.raw.entry(ledger_id.to_string()).or_default();
			let existing = records.iter().position(|r| r.id == record.id);
			match (existing, record.deleted) {
				(Some(pos), true) => {
					records.remove(pos);
				}
				(Some(pos), false) => records[pos] = record,
				(None, true) => {}
				(None, false) => records.push(record),
			}
		});
	}

	/// Remove one record by id. Returns whether it was present.
	pub fn remove_transaction(&self, ledger_id: &str, transaction_id: &str) -> bool {
		let mut removed = false;
		self.mutate(Change::Raw(ledger_id.to_string()), |state| {
			if let Some(records) = state.raw.get_mut(ledger_id) {
				let before = records.len();
				records.retain(|r| r.id != transaction_id);
				removed = records.len() != before;
			}
		});
		removed
	}

	/// Apply a mutation, recompute, then publish once the lock is released.
	fn mutate(&self, change: Change, apply: impl FnOnce(&mut StoreState)) {
		let (derived, config, raw) = {
			let mut state = self.state();
			apply(&mut state);
			state.derived = Arc::new(derive::recompute(&state.config, &state.raw));
			debug!(
				"Recomputed derived state: {} groups across {} participants",
				state.derived.groups.len(),
				state.derived.participants.len()
			);
			if self.bus.is_empty() {
				return;
			}
			let raw = match &change {
				Change::Raw(ledger_id) => state.raw.get(ledger_id).cloned(),
				Change::Config => None,
			};
			(state.derived.clone(), state.config.clone(), raw)
		};

		match change {
			Change::Config => {
				self.bus.publish(&Channel::config(), &StoreEvent::Config(config));
			}
			Change::Raw(ledger_id) => {
				let event = StoreEvent::Raw {
					transactions: raw.unwrap_or_default(),
					ledger_id: ledger_id.clone(),
				};
				self.bus.publish(&Channel::raw(&ledger_id), &event);
			}
		}
		self.publish_derived(&derived);
	}

	fn publish_derived(&self, derived: &DerivedState) {
		self.bus.publish(
			&Channel::groups(),
			&StoreEvent::Groups(derived.groups.clone()),
		);
		for (name, participant) in &derived.participants {
			self.bus.publish(
				&Channel::linked(name),
				&StoreEvent::Linked {
					participant: name.clone(),
					transactions: participant.linked.clone(),
				},
			);
			self.bus.publish(
				&Channel::unlinked(name),
				&StoreEvent::Unlinked {
					participant: name.clone(),
					personal: participant.unlinked_personal.clone(),
					shared: participant.unlinked_shared.clone(),
				},
			);
		}
	}

	/// The current derived state. Cheap to clone and never changes after it is returned.
	pub fn snapshot(&self) -> Arc<DerivedState> {
		self.state().derived.clone()
	}

	pub fn config(&self) -> ReconcileConfig {
		self.state().config.clone()
	}

	pub fn group(&self, tag: &Tag) -> Option<LinkedGroup> {
		self.snapshot().group(tag).cloned()
	}

	pub fn transactions(&self, ledger_id: &str) -> Vec<TransactionRecord> {
		self.state().raw.get(ledger_id).cloned().unwrap_or_default()
	}

	pub fn transaction(&self, ledger_id: &str, transaction_id: &str) -> Option<TransactionRecord> {
		self.state()
			.raw
			.get(ledger_id)?
			.iter()
			.find(|r| r.id == transaction_id)
			.cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Participant;
	use chrono::NaiveDate;

	fn record(id: &str, account: &str, category: Option<&str>, memo: &str) -> TransactionRecord {
		TransactionRecord {
			id: id.to_string(),
			date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
			amount: -12_500,
			payee_name: None,
			memo: Some(memo.to_string()),
			account_id: account.to_string(),
			category_id: category.map(str::to_string),
			category_name: None,
			deleted: false,
			cleared: false,
		}
	}

	fn config() -> ReconcileConfig {
		ReconcileConfig {
			shared_ledger_id: "shared".to_string(),
			participants: vec![Participant {
				name: "alice".to_string(),
				personal_ledger_id: "alice-ledger".to_string(),
				personal_account_id: None,
				shared_category_id: "alice-shared".to_string(),
				balancing_category_id: "alice-balancing".to_string(),
				contribution_account_id: "alice-contribution".to_string(),
			}],
			..Default::default()
		}
	}

	struct Counter {
		calls: Mutex<Vec<String>>,
		store: Mutex<Option<Arc<LedgerStore>>>,
	}

	impl StoreSubscriber for Counter {
		fn on_update(&self, channel: &Channel, _event: &StoreEvent) -> Result<(), StoreError> {
			// reading back from the store must not deadlock
			if let Some(store) = self.store.lock().unwrap().as_ref() {
				let _ = store.snapshot();
			}
			self.calls.lock().unwrap().push(channel.to_string());
			Ok(())
		}

		fn name(&self) -> &str {
			"counter"
		}
	}

	#[test]
	fn reads_after_a_mutation_see_recomputed_state() {
		let store = LedgerStore::new();
		store.set_config(config());
		store.replace_transactions(
			"alice-ledger",
			vec![record("p1", "checking", Some("alice-shared"), "Groceries #A1B2C3#")],
		);
		store.upsert_transaction(
			"shared",
			record("s1", "alice-contribution", None, "Groceries #A1B2C3#"),
		);

		let snapshot = store.snapshot();
		assert_eq!(snapshot.groups.len(), 1);
		assert!(snapshot.groups[0].complete);
		assert!(store.group(&Tag::Regular("A1B2C3".to_string())).is_some());
	}

	#[test]
	fn removing_a_transaction_clears_every_bucket() {
		let store = LedgerStore::new();
		store.set_config(config());
		store.replace_transactions(
			"alice-ledger",
			vec![
				record("p1", "checking", Some("alice-shared"), "#A1B2C3#"),
				record("p2", "checking", Some("alice-shared"), "untagged"),
			],
		);
		store.upsert_transaction("shared", record("s1", "alice-contribution", None, "#A1B2C3#"));

		assert!(store.remove_transaction("alice-ledger", "p1"));
		assert!(store.remove_transaction("alice-ledger", "p2"));
		assert!(!store.remove_transaction("alice-ledger", "p2"));

		let snapshot = store.snapshot();
		let alice = snapshot.participant("alice").unwrap();
		let ids: Vec<&str> = alice
			.linked
			.iter()
			.chain(&alice.unlinked_personal)
			.chain(&alice.unlinked_shared)
			.map(|t| t.id.as_str())
			.collect();
		assert_eq!(ids, vec!["s1"]);
		let group = &snapshot.groups[0];
		assert_eq!(group.personal_count(), 0);
		assert!(!group.complete);
	}

	#[test]
	fn upserting_a_deleted_record_removes_it() {
		let store = LedgerStore::new();
		store.set_config(config());
		store.upsert_transaction("shared", record("s1", "alice-contribution", None, "Rent"));
		let mut deleted = record("s1", "alice-contribution", None, "Rent");
		deleted.deleted = true;
		store.upsert_transaction("shared", deleted);
		assert!(store.transactions("shared").is_empty());
		assert!(store.transaction("shared", "s1").is_none());
	}

	#[test]
	fn subscribers_hear_raw_and_derived_channels() {
		let store = Arc::new(LedgerStore::new());
		let counter = Arc::new(Counter {
			calls: Mutex::new(Vec::new()),
			store: Mutex::new(Some(store.clone())),
		});
		store.set_config(config());
		store.subscribe(Channel::derived(), counter.clone());
		store.subscribe(Channel::raw("shared"), counter.clone());

		store.upsert_transaction("shared", record("s1", "alice-contribution", None, "Rent"));

		let calls = counter.calls.lock().unwrap().clone();
		assert_eq!(
			calls,
			vec![
				"raw.shared",
				"derived.groups",
				"derived.linked.alice",
				"derived.unlinked.alice"
			]
		);
		// break the reference cycle
		counter.store.lock().unwrap().take();
	}
}
