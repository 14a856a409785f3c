//! Developer tooling: read-only inspection of captured history.
//!
//! # Invariants
//! - Tools never mutate history.

mod inspector;

pub use inspector::{HistorySummary, HistoryInspector, RevisionInfo, TransactionInfo};

pub fn crate_info() -> &'static str {
    "rewind-tools v0.1.0"
}
