//! Persistence of history: snapshot capture, payload codec, numbered revisions,
//! transactions, and the on-disk journal.
//!
//! # Invariants
//! - Snapshots embed owned targets only; reference relations keep ids.
//! - `(entity, revision number)` is unique and numbers are never reused.
//! - Payloads and journal files are content-addressed and verified on load.

pub mod codec;
pub mod journal;
pub mod revision;
pub mod snapshot;
pub mod transaction;

pub use codec::{CodecError, EncodedPayload, PayloadCodec};
pub use journal::{Journal, JournalContents, JournalError, JournalMeta};
pub use revision::{Operation, Retention, Revision, RevisionError, RevisionKey, RevisionStore};
pub use snapshot::{Association, Node, Snapshot, SnapshotError, SnapshotSerializer};
pub use transaction::Transaction;

pub fn crate_info() -> &'static str {
    "rewind-persist v0.1.0"
}
