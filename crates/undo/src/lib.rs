//! Undo: transactions, the capture contract, snapshot reconstruction and
//! reverse-order undo.
//!
//! # Invariants
//! - Capture only happens inside an active transaction.
//! - Undo disables capture before its first corrective write.
//! - Revisions are inverted newest first; the first failure stops the walk and is reported.
//! - Reference relations are restored to exactly the captured membership.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod log;
pub mod reconstruct;

pub use config::{ConfigError, EngineConfig, RetentionConfig};
pub use context::CaptureContext;
pub use dispatcher::{Inverse, OperationDispatcher, Validation};
pub use engine::UndoEngine;
pub use error::{MissingReference, UndoError};
pub use log::{TransactionLog, UndoReport};
pub use reconstruct::{RebuildMode, Rebuilt, Reconstructor};

pub fn crate_info() -> &'static str {
    "rewind-undo v0.1.0"
}
