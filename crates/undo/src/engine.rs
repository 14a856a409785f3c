use crate::config::EngineConfig;
use crate::context::CaptureContext;
use crate::dispatcher::{OperationDispatcher, Validation};
use crate::error::UndoError;
use crate::log::{TransactionLog, UndoReport};
use chrono::Utc;
use rewind_common::{EntityRef, TransactionId};
use rewind_kernel::{Record, RecordStore};
use rewind_persist::{Journal, Operation, PayloadCodec, Retention, RevisionKey};
use rewind_schema::RelationSchema;
use std::path::Path;

/// The host's entry point: schema, configuration and history in one place.
///
/// Methods take `&mut self`; hosts sharing an engine across threads wrap it
/// in their own lock.
pub struct UndoEngine {
    schema: RelationSchema,
    config: EngineConfig,
    codec: PayloadCodec,
    log: TransactionLog,
}

impl UndoEngine {
    /// Config exclusions are merged into the schema's exclusion list.
    pub fn new(mut schema: RelationSchema, config: EngineConfig) -> Self {
        for type_name in &config.exclusions {
            schema.exclude(type_name.as_str());
        }
        Self {
            codec: config.codec(),
            schema,
            config,
            log: TransactionLog::new(),
        }
    }

    /// Resume from a journal saved by `save`.
    pub fn open(
        schema: RelationSchema,
        config: EngineConfig,
        path: impl AsRef<Path>,
    ) -> Result<Self, UndoError> {
        let contents = Journal::open(path)?.load()?;
        let mut engine = Self::new(schema, config);
        engine.log = TransactionLog::from_parts(contents.revisions, contents.transactions);
        Ok(engine)
    }

    /// Write all transactions and revisions to a journal directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), UndoError> {
        let mut journal = Journal::open(path)?;
        journal.save(self.log.revisions(), self.log.transactions())?;
        Ok(())
    }

    pub fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Start a transaction and make it the active one in `ctx`.
    pub fn begin(&mut self, ctx: &mut CaptureContext, description: Option<&str>) -> TransactionId {
        let id = self.log.begin(description);
        ctx.activate(id);
        id
    }

    pub fn capture<S: RecordStore + ?Sized>(
        &mut self,
        ctx: &CaptureContext,
        store: &S,
        operation: Operation,
        entity: &EntityRef,
        validation: Validation,
    ) -> Result<Option<RevisionKey>, UndoError> {
        OperationDispatcher::new(&self.schema, &self.codec).capture(
            ctx,
            &mut self.log,
            store,
            operation,
            entity,
            validation,
        )
    }

    pub fn capture_bulk<S: RecordStore + ?Sized>(
        &mut self,
        ctx: &CaptureContext,
        store: &S,
        operation: Operation,
        entities: &[EntityRef],
    ) -> Result<Vec<RevisionKey>, UndoError> {
        OperationDispatcher::new(&self.schema, &self.codec).capture_bulk(
            ctx,
            &mut self.log,
            store,
            operation,
            entities,
        )
    }

    pub fn capture_matching<S, F>(
        &mut self,
        ctx: &CaptureContext,
        store: &S,
        operation: Operation,
        type_name: &str,
        predicate: F,
    ) -> Result<Vec<RevisionKey>, UndoError>
    where
        S: RecordStore + ?Sized,
        F: Fn(&Record) -> bool,
    {
        OperationDispatcher::new(&self.schema, &self.codec).capture_matching(
            ctx,
            &mut self.log,
            store,
            operation,
            type_name,
            predicate,
        )
    }

    pub fn capture_membership_change<S: RecordStore + ?Sized>(
        &mut self,
        ctx: &CaptureContext,
        store: &S,
        owner: &EntityRef,
    ) -> Result<Option<RevisionKey>, UndoError> {
        OperationDispatcher::new(&self.schema, &self.codec).capture_membership_change(
            ctx,
            &mut self.log,
            store,
            owner,
        )
    }

    pub fn undo<S: RecordStore + ?Sized>(
        &mut self,
        ctx: &mut CaptureContext,
        transaction: TransactionId,
        store: &mut S,
    ) -> Result<UndoReport, UndoError> {
        let dispatcher = OperationDispatcher::new(&self.schema, &self.codec)
            .strict_references(self.config.strict_references);
        self.log.undo(ctx, transaction, &dispatcher, store)
    }

    pub fn destroy(&mut self, transaction: TransactionId) -> Result<usize, UndoError> {
        self.log.destroy(transaction)
    }

    pub fn truncate(&mut self, entity: &EntityRef, retention: &Retention) -> usize {
        self.log.revisions_mut().truncate(entity, retention, Utc::now())
    }

    /// Truncate with the configured retention.
    pub fn apply_retention(&mut self, entity: &EntityRef) -> Result<usize, UndoError> {
        let retention = self.config.retention.to_retention()?;
        Ok(self.truncate(entity, &retention))
    }
}
