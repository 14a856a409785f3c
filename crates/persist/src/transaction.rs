use crate::revision::RevisionKey;
use chrono::{DateTime, Utc};
use rewind_common::TransactionId;
use serde::{Deserialize, Serialize};

/// A logical unit of work owning the revisions captured during it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Owned revisions in capture order.
    revisions: Vec<RevisionKey>,
}

impl Transaction {
    pub fn new(description: Option<String>) -> Self {
        Self {
            id: TransactionId::new(),
            description,
            created_at: Utc::now(),
            revisions: Vec::new(),
        }
    }

    pub fn push(&mut self, key: RevisionKey) {
        self.revisions.push(key);
    }

    pub fn revisions(&self) -> &[RevisionKey] {
        &self.revisions
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}
