use chrono::{Datelike, Months, NaiveDate, Utc};

/// Remote amounts are integers in 1/1000 of the display currency unit.
pub const MILLIUNITS_PER_UNIT: i64 = 1000;

pub fn format_milliunits(amount: i64) -> String {
	let sign = if amount < 0 { "-" } else { "" };
	let abs = amount.unsigned_abs();
	let units = abs / MILLIUNITS_PER_UNIT as u64;
	let cents = (abs % MILLIUNITS_PER_UNIT as u64) / 10;
	format!("{}{}.{:02}", sign, units, cents)
}

/// Parse a display amount such as `12.5` into milliunits. At most three decimals.
pub fn parse_milliunits(value: &str) -> Option<i64> {
	let (units, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
	if units.is_empty() || fraction.len() > 3 || !units.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	if !fraction.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	let units: i64 = units.parse().ok()?;
	let fraction: i64 = format!("{fraction:0<3}").parse().ok()?;
	units.checked_mul(MILLIUNITS_PER_UNIT)?.checked_add(fraction)
}

pub fn today() -> NaiveDate {
	Utc::now().date_naive()
}

/// Same calendar day `years` earlier, clamped to the month end (Feb 29 -> Feb 28).
pub fn years_before(date: NaiveDate, years: u32) -> NaiveDate {
	date.checked_sub_months(Months::new(years * 12))
		.unwrap_or(NaiveDate::MIN)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
	date.with_day(1).unwrap_or(date)
}
