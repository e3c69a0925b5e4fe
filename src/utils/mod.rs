//!
//! Utility module for the ledger sync service.
//!
//! Re-exports amount formatting and calendar helpers used throughout the codebase.
/// Amount and date helpers
pub mod index;

pub use index::{MILLIUNITS_PER_UNIT, first_of_month, format_milliunits, parse_milliunits, today, years_before};
