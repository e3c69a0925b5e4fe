//! Derived reconciliation state.
//!
//! `recompute` rebuilds everything from the raw transaction sets and the configuration on every
//! call; nothing here is persisted or updated incrementally.

use crate::cache::TransactionRecord;
use crate::config::{Participant, ReconcileConfig};
use crate::tag::{self, Tag, TagKind};

use chrono::NaiveDate;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Every transaction sharing one tag, across all ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedGroup {
	pub tag: Tag,
	/// Personal-ledger transactions by participant name.
	pub personal: BTreeMap<String, Vec<TransactionRecord>>,
	/// Shared-ledger transactions.
	pub shared: Vec<TransactionRecord>,
	pub complete: bool,
}

impl LinkedGroup {
	fn new(tag: Tag) -> Self {
		Self {
			tag,
			personal: BTreeMap::new(),
			shared: Vec::new(),
			complete: false,
		}
	}

	pub fn personal_count(&self) -> usize {
		self.personal.values().map(Vec::len).sum()
	}

	pub fn shared_count(&self) -> usize {
		self.shared.len()
	}

	/// Date of the most recent transaction in the group.
	pub fn latest_date(&self) -> Option<NaiveDate> {
		self.personal
			.values()
			.flatten()
			.chain(&self.shared)
			.map(|t| t.date)
			.max()
	}

	/// Personal transactions as `(participant, transaction)` pairs.
	pub fn personal_transactions(&self) -> impl Iterator<Item = (&str, &TransactionRecord)> {
		self.personal
			.iter()
			.flat_map(|(name, txs)| txs.iter().map(move |t| (name.as_str(), t)))
	}
}

/// Per-participant lists, each sorted newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantState {
	/// Tagged transactions from both sides.
	pub linked: Vec<TransactionRecord>,
	pub unlinked_personal: Vec<TransactionRecord>,
	pub unlinked_shared: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedState {
	/// Sorted by most recent contained transaction, newest first.
	pub groups: Vec<LinkedGroup>,
	pub participants: BTreeMap<String, ParticipantState>,
}

impl DerivedState {
	pub fn group(&self, tag: &Tag) -> Option<&LinkedGroup> {
		self.groups.iter().find(|g| &g.tag == tag)
	}

	pub fn participant(&self, name: &str) -> Option<&ParticipantState> {
		self.participants.get(name)
	}

	pub fn incomplete_groups(&self) -> impl Iterator<Item = &LinkedGroup> {
		self.groups.iter().filter(|g| !g.complete)
	}
}

/// Structural completeness of a group for its tag kind.
pub fn is_complete(kind: TagKind, personal: usize, shared: usize, participants: usize) -> bool {
	match kind {
		TagKind::Balancing => personal == participants && shared == participants,
		TagKind::Monthly => shared >= 1,
		TagKind::Regular => personal >= 1 && shared >= 1,
	}
}

enum Side {
	Personal,
	Shared,
}

/// Read the tag of a note, reporting notes that are ambiguous or malformed.
fn tag_of(record: &TransactionRecord) -> Option<Tag> {
	let note = record.memo();
	let found = tag::extract_all(note);
	if found.len() > 1 {
		warn!(
			"Transaction {} carries {} tags ({}), using the first",
			record.id,
			found.len(),
			found.join(", ")
		);
	}
	let tag = tag::extract(note);
	if let Some(Tag::Monthly { month, .. }) = &tag {
		if !(1..=12).contains(month) {
			warn!("Transaction {} has a monthly tag for month {}", record.id, month);
		}
	}
	tag
}

fn personal_transactions<'a>(
	participant: &Participant,
	raw: &'a HashMap<String, Vec<TransactionRecord>>,
) -> Vec<&'a TransactionRecord> {
	raw.get(&participant.personal_ledger_id)
		.into_iter()
		.flatten()
		.filter(|t| !t.deleted)
		.filter(|t| {
			t.category_id.as_deref().is_some_and(|c| {
				c == participant.shared_category_id || c == participant.balancing_category_id
			})
		})
		.unique_by(|t| t.id.clone())
		.collect()
}

fn shared_transactions<'a>(
	participant: &Participant,
	config: &ReconcileConfig,
	raw: &'a HashMap<String, Vec<TransactionRecord>>,
) -> Vec<&'a TransactionRecord> {
	raw.get(&config.shared_ledger_id)
		.into_iter()
		.flatten()
		.filter(|t| !t.deleted && t.account_id == participant.contribution_account_id)
		.unique_by(|t| t.id.clone())
		.collect()
}

fn sort_newest_first(records: &mut [TransactionRecord]) {
	records.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
}

/// Rebuild groups and per-participant lists from scratch.
pub fn recompute(
	config: &ReconcileConfig,
	raw: &HashMap<String, Vec<TransactionRecord>>,
) -> DerivedState {
	let mut groups: HashMap<Tag, LinkedGroup> = HashMap::new();
	let mut participants = BTreeMap::new();
	let cutoff = config.reconciliation_cutoff_date;

	for participant in &config.participants {
		let mut state = ParticipantState::default();
		let sides = personal_transactions(participant, raw)
			.into_iter()
			.map(|t| (Side::Personal, t))
			.chain(
				shared_transactions(participant, config, raw)
					.into_iter()
					.map(|t| (Side::Shared, t)),
			);

		for (side, record) in sides {
			match tag_of(record) {
				Some(tag) => {
					let group = groups
						.entry(tag.clone())
						.or_insert_with(|| LinkedGroup::new(tag));
					match side {
						Side::Personal => group
							.personal
							.entry(participant.name.clone())
							.or_default()
							.push(record.clone()),
						Side::Shared => {
							if !group.shared.iter().any(|t| t.id == record.id) {
								group.shared.push(record.clone());
							}
						}
					}
					state.linked.push(record.clone());
				}
				None if cutoff.is_some_and(|c| record.date < c) => {}
				None => match side {
					Side::Personal => state.unlinked_personal.push(record.clone()),
					Side::Shared => state.unlinked_shared.push(record.clone()),
				},
			}
		}

		sort_newest_first(&mut state.linked);
		sort_newest_first(&mut state.unlinked_personal);
		sort_newest_first(&mut state.unlinked_shared);
		participants.insert(participant.name.clone(), state);
	}

	let participant_count = config.participants.len();
	let mut groups: Vec<LinkedGroup> = groups
		.into_values()
		.map(|mut group| {
			for txs in group.personal.values_mut() {
				sort_newest_first(txs);
			}
			sort_newest_first(&mut group.shared);
			group.complete = is_complete(
				group.tag.kind(),
				group.personal_count(),
				group.shared_count(),
				participant_count,
			);
			group
		})
		.collect();
	groups.sort_by(|a, b| {
		b.latest_date()
			.cmp(&a.latest_date())
			.then_with(|| a.tag.to_string().cmp(&b.tag.to_string()))
	});

	DerivedState {
		groups,
		participants,
	}
}
