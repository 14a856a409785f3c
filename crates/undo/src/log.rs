use crate::context::CaptureContext;
use crate::dispatcher::{Inverse, OperationDispatcher};
use crate::error::{MissingReference, UndoError};
use rewind_common::{EntityRef, TransactionId};
use rewind_kernel::RecordStore;
use rewind_persist::{EncodedPayload, Operation, RevisionKey, RevisionStore, Transaction};

/// What an undo did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoReport {
    /// Revisions inverted, in the order they were undone.
    pub undone: Vec<RevisionKey>,
    /// Revisions already removed by retention truncation.
    pub skipped: Vec<RevisionKey>,
    pub missing_references: Vec<MissingReference>,
    /// Records restored, across all revisions.
    pub restored: usize,
    /// Created records deleted.
    pub deleted: usize,
}

/// Transactions and the revisions they own.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    revisions: RevisionStore,
    transactions: Vec<Transaction>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from previously saved parts.
    pub fn from_parts(revisions: RevisionStore, transactions: Vec<Transaction>) -> Self {
        Self {
            revisions,
            transactions,
        }
    }

    /// Start a new transaction.
    pub fn begin(&mut self, description: Option<&str>) -> TransactionId {
        let transaction = Transaction::new(description.map(str::to_owned));
        let id = transaction.id;
        tracing::debug!(transaction = %id, ?description, "began transaction");
        self.transactions.push(transaction);
        id
    }

    /// Add an existing revision to the end of a transaction.
    pub fn append(&mut self, transaction: TransactionId, key: RevisionKey) -> Result<(), UndoError> {
        self.transaction_mut(transaction)?.push(key);
        Ok(())
    }

    /// Number and store a revision, then append it to `transaction`.
    pub fn record(
        &mut self,
        transaction: TransactionId,
        operation: Operation,
        entity: &EntityRef,
        payload: EncodedPayload,
    ) -> Result<RevisionKey, UndoError> {
        self.transaction(transaction)?;
        let key = self.revisions.append(operation, entity, payload, transaction)?;
        self.append(transaction, key.clone())?;
        Ok(key)
    }

    /// Undo a transaction by inverting its revisions newest first.
    ///
    /// Capture is switched off in `ctx` before any corrective write. The first
    /// failed inversion stops the walk and is returned as `PartialUndo`.
    /// Undoing the same transaction twice is not supported.
    pub fn undo<S: RecordStore + ?Sized>(
        &self,
        ctx: &mut CaptureContext,
        transaction: TransactionId,
        dispatcher: &OperationDispatcher<'_>,
        store: &mut S,
    ) -> Result<UndoReport, UndoError> {
        ctx.clear();
        let keys = self.transaction(transaction)?.revisions();
        let total = keys.len();
        let _span = tracing::info_span!("undo", %transaction, total).entered();
        tracing::info!("undo started");

        let mut report = UndoReport::default();
        for key in keys.iter().rev() {
            let Some(revision) = self.revisions.get(key) else {
                tracing::warn!(revision = %key, "revision was truncated, skipping");
                report.skipped.push(key.clone());
                continue;
            };
            match dispatcher.invert(revision, store) {
                Ok(Inverse::Deleted { .. }) => report.deleted += 1,
                Ok(Inverse::Restored(rebuilt)) => {
                    report.restored += rebuilt.written.len();
                    report.missing_references.extend(rebuilt.missing);
                }
                Err(source) => {
                    tracing::warn!(revision = %key, error = %source, "undo stopped");
                    return Err(UndoError::PartialUndo {
                        completed: report.undone.len() + report.skipped.len(),
                        total,
                        failed: key.clone(),
                        source: Box::new(source),
                    });
                }
            }
            report.undone.push(key.clone());
        }

        tracing::info!(
            undone = report.undone.len(),
            skipped = report.skipped.len(),
            missing = report.missing_references.len(),
            "undo finished"
        );
        Ok(report)
    }

    /// Remove a transaction and every revision it owns. Returns the revisions removed.
    pub fn destroy(&mut self, transaction: TransactionId) -> Result<usize, UndoError> {
        let index = self
            .transactions
            .iter()
            .position(|t| t.id == transaction)
            .ok_or(UndoError::UnknownTransaction(transaction))?;
        let removed = self.transactions.remove(index);
        let count = removed
            .revisions()
            .iter()
            .filter(|key| self.revisions.remove(key).is_some())
            .count();
        tracing::debug!(%transaction, revisions = count, "destroyed transaction");
        Ok(count)
    }

    pub fn transaction(&self, id: TransactionId) -> Result<&Transaction, UndoError> {
        self.transactions
            .iter()
            .find(|t| t.id == id)
            .ok_or(UndoError::UnknownTransaction(id))
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Result<&mut Transaction, UndoError> {
        self.transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(UndoError::UnknownTransaction(id))
    }

    /// Transactions in creation order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn revisions(&self) -> &RevisionStore {
        &self.revisions
    }

    pub fn revisions_mut(&mut self) -> &mut RevisionStore {
        &mut self.revisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_persist::codec::sha256_hex;

    fn payload() -> EncodedPayload {
        EncodedPayload {
            bytes: vec![0],
            digest: sha256_hex(&[0]),
        }
    }

    #[test]
    fn transactions_keep_creation_and_capture_order() {
        let mut log = TransactionLog::new();
        let first = log.begin(Some("first"));
        let second = log.begin(None);
        let post = EntityRef::new("Post", 1);
        let a = log.record(first, Operation::Create, &post, payload()).unwrap();
        let b = log.record(first, Operation::Update, &post, payload()).unwrap();

        let ids: Vec<TransactionId> = log.transactions().iter().map(|t| t.id).collect();
        assert_eq!(ids, [first, second]);
        assert_eq!(log.transaction(first).unwrap().revisions(), [a, b]);
        assert_eq!(
            log.transaction(first).unwrap().description.as_deref(),
            Some("first")
        );
        assert!(log.transaction(second).unwrap().is_empty());
    }

    #[test]
    fn unknown_transaction_rejected() {
        let mut log = TransactionLog::new();
        let stray = TransactionId::new();
        let err = log
            .record(stray, Operation::Create, &EntityRef::new("Post", 1), payload())
            .unwrap_err();
        assert!(matches!(err, UndoError::UnknownTransaction(id) if id == stray));
        assert!(log.revisions().is_empty());
    }

    #[test]
    fn destroy_removes_owned_revisions_only() {
        let mut log = TransactionLog::new();
        let keep = log.begin(None);
        let drop = log.begin(None);
        let post = EntityRef::new("Post", 1);
        log.record(keep, Operation::Create, &post, payload()).unwrap();
        log.record(drop, Operation::Update, &post, payload()).unwrap();
        log.record(drop, Operation::Update, &post, payload()).unwrap();

        assert_eq!(log.destroy(drop).unwrap(), 2);
        assert_eq!(log.revisions().len(), 1);
        assert_eq!(log.transactions().len(), 1);
        assert!(matches!(log.destroy(drop), Err(UndoError::UnknownTransaction(_))));
    }
}
