use crate::cache::TransactionRecord;
use crate::reconcile::{ReconcileError, ReconciliationEngine};

/// Largest amount difference still considered a match, exclusive. 0.1 of a display unit.
pub const AMOUNT_TOLERANCE: i64 = 100;
/// Largest date gap still considered a match, inclusive.
pub const MAX_DATE_GAP_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSuggestion {
	pub personal: TransactionRecord,
	pub shared: TransactionRecord,
	pub amount_diff: i64,
	pub date_gap_days: i64,
}

fn amount_diff(a: &TransactionRecord, b: &TransactionRecord) -> i64 {
	(a.amount - b.amount).abs()
}

fn date_gap_days(a: &TransactionRecord, b: &TransactionRecord) -> i64 {
	(a.date - b.date).num_days().abs()
}

pub fn is_good_match(a: &TransactionRecord, b: &TransactionRecord) -> bool {
	amount_diff(a, b) < AMOUNT_TOLERANCE && date_gap_days(a, b) <= MAX_DATE_GAP_DAYS
}

/// Every good personal/shared pair, closest amount first, then closest date.
pub fn suggest(personal: &[TransactionRecord], shared: &[TransactionRecord]) -> Vec<MatchSuggestion> {
	let mut suggestions: Vec<MatchSuggestion> = personal
		.iter()
		.flat_map(|p| shared.iter().map(move |s| (p, s)))
		.filter(|(p, s)| is_good_match(p, s))
		.map(|(p, s)| MatchSuggestion {
			personal: p.clone(),
			shared: s.clone(),
			amount_diff: amount_diff(p, s),
			date_gap_days: date_gap_days(p, s),
		})
		.collect();
	suggestions.sort_by(|a, b| {
		(a.amount_diff, a.date_gap_days, &a.personal.id, &a.shared.id).cmp(&(
			b.amount_diff,
			b.date_gap_days,
			&b.personal.id,
			&b.shared.id,
		))
	});
	suggestions
}

impl ReconciliationEngine {
	/// Candidate links between a participant's unlinked personal and shared transactions.
	/// Nothing is applied.
	pub fn suggest_matches(&self, participant: &str) -> Result<Vec<MatchSuggestion>, ReconcileError> {
		let snapshot = self.store.snapshot();
		let state = snapshot
			.participant(participant)
			.ok_or_else(|| ReconcileError::UnknownParticipant(participant.to_string()))?;
		Ok(suggest(&state.unlinked_personal, &state.unlinked_shared))
	}
}
