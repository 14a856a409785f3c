use crate::config::ConfigError;
use rewind_common::{EntityRef, TransactionId};
use rewind_kernel::StoreError;
use rewind_persist::{CodecError, JournalError, RevisionError, RevisionKey, SnapshotError};
use std::fmt;

/// A reference-relation target that no longer resolves during restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReference {
    pub owner: EntityRef,
    pub relation: String,
    pub target: EntityRef,
}

impl fmt::Display for MissingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.owner, self.relation, self.target)
    }
}

/// Errors from capture and undo.
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("revision error: {0}")]
    Revision(#[from] RevisionError),
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("relation {relation} cannot be restored on {type_name}")]
    SchemaMismatch { type_name: String, relation: String },
    #[error("restoring {entity} was rejected: {source}")]
    RestoreValidationFailed {
        entity: EntityRef,
        #[source]
        source: StoreError,
    },
    #[error("referenced record is gone: {0}")]
    MissingReference(MissingReference),
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),
    #[error("undo stopped at {failed} after {completed} of {total} revisions: {source}")]
    PartialUndo {
        completed: usize,
        total: usize,
        failed: RevisionKey,
        #[source]
        source: Box<UndoError>,
    },
}

impl UndoError {
    /// The error that stopped an undo, looking through `PartialUndo`.
    pub fn root(&self) -> &UndoError {
        match self {
            Self::PartialUndo { source, .. } => source.root(),
            other => other,
        }
    }
}
