//! Remote ledger integration.
//!
//! This module provides the client and types for talking to the externally hosted ledger
//! service: listing ledgers, accounts and categories, moving category budgets, and reading or
//! writing transactions with incremental cursors.

/// HTTP client and the `LedgerApi` trait
mod client;
/// Type definitions for remote ledger data
mod types;
/// In-memory ledger service for tests
#[cfg(test)]
pub mod testing;

pub use client::{HttpLedgerClient, LedgerApi};
pub use types::*;
