//! Correlation tags embedded in free-text transaction notes.
//!
//! A tag is a short identifier wrapped in `#` delimiters, e.g. `#A3K9M2#`. Transactions in
//! different ledgers that carry the same tag describe the same real-world event. Three kinds
//! exist:
//!
//! - `Regular`: a random 6 character id created when two transactions are linked by hand.
//! - `Balancing`: `B-` followed by a random id, shared by the transactions of a balancing set.
//! - `Monthly`: `M-MM-YY`, derived from the month it covers. Deterministic on purpose so that
//!   repeated monthly runs find the transaction they created before.
//!
//! Only the first delimited tag in a note is recognised.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Symbols used for random ids. `I`, `O`, `0` and `1` are left out.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of the random part of `Regular` and `Balancing` tags.
pub const ID_LENGTH: usize = 6;

const DELIMITER: char = '#';
const BALANCING_PREFIX: &str = "B-";
const MONTHLY_PREFIX: &str = "M-";

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"#([A-Z0-9-]+)#").unwrap_or_else(|e| panic!("invalid tag pattern: {e}"))
});

/// The kind of a tag, decided by its prefix alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
	Regular,
	Balancing,
	Monthly,
}

/// Month and year recovered from a `Monthly` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthlyPeriod {
	pub month: u32,
	pub year: i32,
}

/// A parsed tag. Built once when a note is read; use sites match on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Tag {
	Regular(String),
	Balancing(String),
	Monthly { month: u32, year: i32 },
}

impl Tag {
	/// Fresh `Regular` tag with a random id.
	pub fn generate() -> Self {
		Tag::Regular(generate_id())
	}

	/// Fresh `Balancing` tag, `B-` plus a random id.
	pub fn generate_balancing() -> Self {
		Tag::Balancing(generate_id())
	}

	/// The deterministic tag for a month, e.g. `M-01-26` for January 2026.
	pub fn monthly(month: u32, year: i32) -> Self {
		Tag::Monthly { month, year }
	}

	/// Parse a bare tag value (no delimiters).
	///
	/// Returns `None` for a `M-` value that does not have the `M-MM-YY` shape.
	pub fn parse(value: &str) -> Option<Self> {
		match classify(value) {
			TagKind::Balancing => Some(Tag::Balancing(value[BALANCING_PREFIX.len()..].to_string())),
			TagKind::Monthly => {
				let period = parse_monthly(value)?;
				Some(Tag::Monthly {
					month: period.month,
					year: period.year,
				})
			}
			TagKind::Regular => Some(Tag::Regular(value.to_string())),
		}
	}

	pub fn kind(&self) -> TagKind {
		match self {
			Tag::Regular(_) => TagKind::Regular,
			Tag::Balancing(_) => TagKind::Balancing,
			Tag::Monthly { .. } => TagKind::Monthly,
		}
	}

	/// The tag wrapped in delimiters, ready to be placed in a note.
	pub fn delimited(&self) -> String {
		format!("{DELIMITER}{self}{DELIMITER}")
	}
}

impl fmt::Display for Tag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Tag::Regular(id) => write!(f, "{id}"),
			Tag::Balancing(id) => write!(f, "{BALANCING_PREFIX}{id}"),
			Tag::Monthly { month, year } => {
				write!(f, "{MONTHLY_PREFIX}{:02}-{:02}", month, year.rem_euclid(100))
			}
		}
	}
}

impl TryFrom<String> for Tag {
	type Error = String;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Tag::parse(&value).ok_or_else(|| format!("malformed tag: {value}"))
	}
}

impl From<Tag> for String {
	fn from(tag: Tag) -> Self {
		tag.to_string()
	}
}

/// Random id of [`ID_LENGTH`] symbols drawn from [`ALPHABET`].
pub fn generate_id() -> String {
	let mut rng = rand::rng();
	(0..ID_LENGTH)
		.map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
		.collect()
}

pub fn classify(value: &str) -> TagKind {
	if value.starts_with(BALANCING_PREFIX) {
		TagKind::Balancing
	} else if value.starts_with(MONTHLY_PREFIX) {
		TagKind::Monthly
	} else {
		TagKind::Regular
	}
}

/// Split `M-MM-YY` on `-`. Exactly three parts are required; the year is at most two digits and
/// is taken as 2000 + YY.
///
/// The month is not range checked, `M-13-26` parses.
pub fn parse_monthly(value: &str) -> Option<MonthlyPeriod> {
	let parts: Vec<&str> = value.split('-').collect();
	if parts.len() != 3 {
		return None;
	}
	let month = parts[1].parse::<u32>().ok()?;
	if parts[2].len() > 2 {
		return None;
	}
	let year = parts[2].parse::<u8>().ok()?;
	Some(MonthlyPeriod {
		month,
		year: 2000 + i32::from(year),
	})
}

/// First delimited tag in the note, if any.
pub fn extract(note: &str) -> Option<Tag> {
	let captures = TAG_PATTERN.captures(note)?;
	Tag::parse(captures.get(1)?.as_str())
}

/// Every delimited value in the note, in order of appearance.
pub fn extract_all(note: &str) -> Vec<String> {
	TAG_PATTERN
		.captures_iter(note)
		.filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
		.collect()
}

/// Put `tag` into the note, replacing an existing tag in place or appending it after a space.
pub fn upsert(note: &str, tag: &Tag) -> String {
	let delimited = tag.delimited();
	if let Some(existing) = TAG_PATTERN.find(note) {
		let mut updated = String::with_capacity(note.len() + delimited.len());
		updated.push_str(&note[..existing.start()]);
		updated.push_str(&delimited);
		updated.push_str(&note[existing.end()..]);
		return updated;
	}
	if note.trim().is_empty() {
		delimited
	} else {
		format!("{note} {delimited}")
	}
}

/// Remove `tag` and the whitespace around it from the note. Other text is kept as is.
///
/// The tag is matched by value, so `#M-1-26#` is removed for `M-01-26`.
pub fn remove(note: &str, tag: &Tag) -> String {
	let Some(found) = TAG_PATTERN
		.captures_iter(note)
		.filter_map(|c| c.get(0).zip(c.get(1)))
		.find(|(_, value)| Tag::parse(value.as_str()).as_ref() == Some(tag))
		.map(|(whole, _)| whole)
	else {
		return note.to_string();
	};
	let before = note[..found.start()].trim_end();
	let after = note[found.end()..].trim_start();
	match (before.is_empty(), after.is_empty()) {
		(true, _) => after.to_string(),
		(_, true) => before.to_string(),
		_ => format!("{before} {after}"),
	}
}
