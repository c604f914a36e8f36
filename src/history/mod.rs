// src/history/mod.rs
//! Append-only run ledger: one small JSON file per event, so re-runs can
//! skip steps already committed.

pub mod state;
pub mod store;

pub use state::State;
pub use store::{Ledger, LedgerRecord};
