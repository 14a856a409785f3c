//! Record kernel: the persistence adapter contract the revision engine writes
//! through, and a deterministic in-memory store implementing it.
//!
//! # Invariants
//! - Every write produces a store event.
//! - Primary keys are carried by `EntityRef`, never inside attributes.
//! - Constraint checks apply to raw writes as well as validated ones.

pub mod adapter;
pub mod memory;

pub use adapter::{RawWrite, Record, RecordStore, StoreError};
pub use memory::{MemoryStore, StoreEvent};

pub fn crate_info() -> &'static str {
    "rewind-kernel v0.1.0"
}
