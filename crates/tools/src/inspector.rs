use rewind_common::{EntityRef, TransactionId};
use rewind_persist::{Operation, PayloadCodec, Revision, RevisionKey};
use rewind_undo::TransactionLog;
use std::collections::BTreeSet;
use std::fmt;

/// History inspector for developer tooling.
///
/// Read-only queries against a transaction log for debugging and the CLI.
pub struct HistoryInspector;

impl HistoryInspector {
    /// Produce a summary of the whole log.
    pub fn summary(log: &TransactionLog) -> HistorySummary {
        let revisions = log.revisions();
        HistorySummary {
            transactions: log.transactions().len(),
            revisions: revisions.len(),
            entities: revisions
                .iter()
                .map(|r| &r.entity)
                .collect::<BTreeSet<_>>()
                .len(),
            payload_bytes: revisions.iter().map(|r| r.payload.len()).sum(),
        }
    }

    /// Describe one transaction and each revision it owns, in capture order.
    pub fn describe_transaction(
        log: &TransactionLog,
        codec: &PayloadCodec,
        id: TransactionId,
    ) -> Option<TransactionInfo> {
        let transaction = log.transaction(id).ok()?;
        let revisions = transaction
            .revisions()
            .iter()
            .map(|key| match log.revisions().get(key) {
                Some(revision) => RevisionInfo::from_revision(revision, codec),
                None => RevisionInfo::truncated(key),
            })
            .collect();
        Some(TransactionInfo {
            id,
            description: transaction.description.clone(),
            created_at: transaction.created_at.to_rfc3339(),
            revisions,
        })
    }

    /// All stored revisions of one entity, oldest first.
    pub fn entity_history(
        log: &TransactionLog,
        codec: &PayloadCodec,
        entity: &EntityRef,
    ) -> Vec<RevisionInfo> {
        log.revisions()
            .revisions_for(entity)
            .map(|r| RevisionInfo::from_revision(r, codec))
            .collect()
    }
}

/// Summary of a transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub transactions: usize,
    pub revisions: usize,
    pub entities: usize,
    pub payload_bytes: usize,
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "History: transactions={} revisions={} entities={} payload_bytes={}",
            self.transactions, self.revisions, self.entities, self.payload_bytes
        )
    }
}

/// One line of a transaction listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub key: RevisionKey,
    /// `None` when the revision was truncated.
    pub operation: Option<Operation>,
    pub payload_bytes: usize,
    /// Records captured in the payload; `None` if it could not be decoded.
    pub captured: Option<usize>,
}

impl RevisionInfo {
    fn from_revision(revision: &Revision, codec: &PayloadCodec) -> Self {
        let captured = match revision.decode(codec) {
            Ok(snapshot) => Some(snapshot.captured_entities().len()),
            Err(e) => {
                tracing::warn!(revision = %revision.key(), error = %e, "payload unreadable");
                None
            }
        };
        Self {
            key: revision.key(),
            operation: Some(revision.operation),
            payload_bytes: revision.payload.len(),
            captured,
        }
    }

    fn truncated(key: &RevisionKey) -> Self {
        Self {
            key: key.clone(),
            operation: None,
            payload_bytes: 0,
            captured: None,
        }
    }
}

impl fmt::Display for RevisionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(operation) = self.operation else {
            return write!(f, "{} (truncated)", self.key);
        };
        write!(f, "{} {:<7} bytes={}", self.key, operation, self.payload_bytes)?;
        match self.captured {
            Some(n) => write!(f, " records={n}"),
            None => write!(f, " records=?"),
        }
    }
}

/// Detailed info about a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub description: Option<String>,
    pub created_at: String,
    pub revisions: Vec<RevisionInfo>,
}

impl fmt::Display for TransactionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction [{:.8}] {} at {}",
            self.id.to_string(),
            self.description.as_deref().unwrap_or("-"),
            self.created_at
        )?;
        for revision in &self.revisions {
            write!(f, "\n  {revision}")?;
        }
        Ok(())
    }
}
