//! Shared types: entity references, transaction ids and scalar values.

mod types;

pub use types::{Attributes, EntityRef, InstanceId, TransactionId, Value, attrs};

/// Name of the attribute that carries the primary key in host records.
pub const ID_ATTRIBUTE: &str = "id";

pub fn crate_info() -> &'static str {
    "rewind-common v0.1.0"
}
