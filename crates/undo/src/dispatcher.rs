use crate::context::CaptureContext;
use crate::error::UndoError;
use crate::log::TransactionLog;
use crate::reconstruct::{RebuildMode, Rebuilt, Reconstructor};
use rewind_common::EntityRef;
use rewind_kernel::{Record, RecordStore};
use rewind_persist::{Operation, PayloadCodec, Revision, RevisionKey, SnapshotSerializer};
use rewind_schema::RelationSchema;

/// Result of the host's validation of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Passed,
    Failed,
}

/// What inverting one revision did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Inverse {
    /// A created record was deleted. `existed` is false if it was already gone.
    Deleted { entity: EntityRef, existed: bool },
    Restored(Rebuilt),
}

/// Maps operation kinds to their inverse actions and implements the capture
/// contract hosts call around their mutations.
pub struct OperationDispatcher<'a> {
    schema: &'a RelationSchema,
    codec: &'a PayloadCodec,
    strict_references: bool,
}

impl<'a> OperationDispatcher<'a> {
    pub fn new(schema: &'a RelationSchema, codec: &'a PayloadCodec) -> Self {
        Self {
            schema,
            codec,
            strict_references: false,
        }
    }

    /// Fail the inversion when a reference target no longer exists.
    pub fn strict_references(mut self, strict: bool) -> Self {
        self.strict_references = strict;
        self
    }

    /// Record a revision of `entity` for `operation`.
    ///
    /// Call after a successful create, and before an update or destroy commits.
    /// Returns `None` when nothing was captured: no active transaction, failed
    /// validation, or an excluded type.
    pub fn capture<S: RecordStore + ?Sized>(
        &self,
        ctx: &CaptureContext,
        log: &mut TransactionLog,
        store: &S,
        operation: Operation,
        entity: &EntityRef,
        validation: Validation,
    ) -> Result<Option<RevisionKey>, UndoError> {
        let Some(transaction) = ctx.active() else {
            return Ok(None);
        };
        if validation == Validation::Failed {
            tracing::debug!(%entity, %operation, "validation failed, not capturing");
            return Ok(None);
        }
        if self.schema.is_excluded(&entity.type_name) {
            return Ok(None);
        }

        let snapshot = SnapshotSerializer::new(self.schema, store).serialize(entity)?;
        let payload = self.codec.encode(&snapshot)?;
        let key = log.record(transaction, operation, entity, payload)?;
        tracing::debug!(revision = %key, %operation, %transaction, "captured revision");
        Ok(Some(key))
    }

    /// Capture each record a bulk update or delete is about to touch.
    pub fn capture_bulk<S: RecordStore + ?Sized>(
        &self,
        ctx: &CaptureContext,
        log: &mut TransactionLog,
        store: &S,
        operation: Operation,
        entities: &[EntityRef],
    ) -> Result<Vec<RevisionKey>, UndoError> {
        let mut keys = Vec::new();
        for entity in entities {
            if let Some(key) = self.capture(ctx, log, store, operation, entity, Validation::Passed)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Capture every record of `type_name` matching a condition-based bulk mutation.
    pub fn capture_matching<S, F>(
        &self,
        ctx: &CaptureContext,
        log: &mut TransactionLog,
        store: &S,
        operation: Operation,
        type_name: &str,
        predicate: F,
    ) -> Result<Vec<RevisionKey>, UndoError>
    where
        S: RecordStore + ?Sized,
        F: Fn(&Record) -> bool,
    {
        if !ctx.is_active() || self.schema.is_excluded(type_name) {
            return Ok(Vec::new());
        }
        let matching: Vec<EntityRef> = store
            .scan(type_name)?
            .into_iter()
            .filter(|r| predicate(r))
            .map(|r| r.entity)
            .collect();
        self.capture_bulk(ctx, log, store, operation, &matching)
    }

    /// Capture the owner before its collection membership is replaced or appended to.
    ///
    /// Owners not yet persisted have nothing to restore.
    pub fn capture_membership_change<S: RecordStore + ?Sized>(
        &self,
        ctx: &CaptureContext,
        log: &mut TransactionLog,
        store: &S,
        owner: &EntityRef,
    ) -> Result<Option<RevisionKey>, UndoError> {
        if !ctx.is_active() || !store.exists(owner)? {
            return Ok(None);
        }
        self.capture(ctx, log, store, Operation::Update, owner, Validation::Passed)
    }

    /// Undo the effect of one revision.
    pub fn invert<S: RecordStore + ?Sized>(
        &self,
        revision: &Revision,
        store: &mut S,
    ) -> Result<Inverse, UndoError> {
        let mode = match revision.operation {
            Operation::Create => {
                let existed = store.delete(&revision.entity)?;
                return Ok(Inverse::Deleted {
                    entity: revision.entity.clone(),
                    existed,
                });
            }
            Operation::Destroy => RebuildMode::Insert,
            Operation::Update => RebuildMode::Merge,
        };
        let snapshot = revision.decode(self.codec)?;
        let rebuilt = Reconstructor::new(self.schema).rebuild(&snapshot, mode, store)?;
        match rebuilt.missing.first() {
            Some(missing) if self.strict_references => {
                return Err(UndoError::MissingReference(missing.clone()));
            }
            _ => {}
        }
        Ok(Inverse::Restored(rebuilt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_common::{Attributes, Value, attrs};
    use rewind_kernel::{MemoryStore, RawWrite};
    use rewind_schema::EntitySchema;

    struct Fixture {
        schema: RelationSchema,
        codec: PayloadCodec,
        log: TransactionLog,
        store: MemoryStore,
        ctx: CaptureContext,
    }

    impl Fixture {
        fn new() -> Self {
            let mut schema = RelationSchema::new()
                .with(EntitySchema::new("Post").reference_many("tags", "Tag"))
                .unwrap()
                .with(EntitySchema::new("Tag"))
                .unwrap();
            schema.exclude("AuditEntry");
            let store = MemoryStore::from_schema(&schema);
            let mut log = TransactionLog::new();
            let mut ctx = CaptureContext::new();
            ctx.activate(log.begin(None));
            Self {
                schema,
                codec: PayloadCodec::default(),
                log,
                store,
                ctx,
            }
        }

        fn dispatcher(&self) -> OperationDispatcher<'_> {
            OperationDispatcher::new(&self.schema, &self.codec)
        }
    }

    #[test]
    fn capture_requires_active_transaction() {
        let mut f = Fixture::new();
        let post = EntityRef::new("Post", f.store.insert("Post", Attributes::new()).unwrap().0);
        let idle = CaptureContext::new();
        let dispatcher = OperationDispatcher::new(&f.schema, &f.codec);
        let key = dispatcher
            .capture(&idle, &mut f.log, &f.store, Operation::Create, &post, Validation::Passed)
            .unwrap();
        assert!(key.is_none());
        assert!(f.log.revisions().is_empty());
    }

    #[test]
    fn failed_validation_and_excluded_types_are_not_captured() {
        let mut f = Fixture::new();
        let post = EntityRef::new("Post", f.store.insert("Post", Attributes::new()).unwrap().0);
        let audit = EntityRef::new("AuditEntry", 1);
        f.store.raw_write(&audit, &Attributes::new(), RawWrite::Create).unwrap();

        let dispatcher = OperationDispatcher::new(&f.schema, &f.codec);
        let failed = dispatcher
            .capture(&f.ctx, &mut f.log, &f.store, Operation::Update, &post, Validation::Failed)
            .unwrap();
        let excluded = dispatcher
            .capture(&f.ctx, &mut f.log, &f.store, Operation::Create, &audit, Validation::Passed)
            .unwrap();
        assert!(failed.is_none() && excluded.is_none());
        assert!(f.log.revisions().is_empty());
    }

    #[test]
    fn capture_matching_records_one_revision_per_match() {
        let mut f = Fixture::new();
        for draft in [true, false, true] {
            f.store
                .insert("Post", attrs([("draft", Value::Bool(draft))]))
                .unwrap();
        }
        let dispatcher = OperationDispatcher::new(&f.schema, &f.codec);
        let keys = dispatcher
            .capture_matching(&f.ctx, &mut f.log, &f.store, Operation::Destroy, "Post", |r| {
                r.attributes.get("draft") == Some(&Value::Bool(true))
            })
            .unwrap();
        let ids: Vec<u64> = keys.iter().map(|k| k.entity.id.0).collect();
        assert_eq!(ids, [1, 3]);
    }

    #[test]
    fn membership_change_skips_unsaved_owner() {
        let mut f = Fixture::new();
        let dispatcher = OperationDispatcher::new(&f.schema, &f.codec);
        let unsaved = EntityRef::new("Post", 40);
        assert!(dispatcher
            .capture_membership_change(&f.ctx, &mut f.log, &f.store, &unsaved)
            .unwrap()
            .is_none());

        let post = EntityRef::new("Post", f.store.insert("Post", Attributes::new()).unwrap().0);
        let key = dispatcher
            .capture_membership_change(&f.ctx, &mut f.log, &f.store, &post)
            .unwrap()
            .unwrap();
        assert_eq!(f.log.revisions().get(&key).unwrap().operation, Operation::Update);
    }

    #[test]
    fn invert_create_deletes_and_tolerates_absence() {
        let mut f = Fixture::new();
        let post = EntityRef::new("Post", f.store.insert("Post", Attributes::new()).unwrap().0);
        let key = OperationDispatcher::new(&f.schema, &f.codec)
            .capture(&f.ctx, &mut f.log, &f.store, Operation::Create, &post, Validation::Passed)
            .unwrap()
            .unwrap();
        let revision = f.log.revisions().get(&key).unwrap().clone();

        let dispatcher = f.dispatcher();
        let mut store = f.store.clone();
        let first = dispatcher.invert(&revision, &mut store).unwrap();
        let second = dispatcher.invert(&revision, &mut store).unwrap();
        assert_eq!(first, Inverse::Deleted { entity: post.clone(), existed: true });
        assert_eq!(second, Inverse::Deleted { entity: post, existed: false });
    }

    #[test]
    fn strict_references_turn_missing_targets_into_errors() {
        let mut f = Fixture::new();
        let post = EntityRef::new("Post", f.store.insert("Post", Attributes::new()).unwrap().0);
        let tag = EntityRef::new("Tag", f.store.insert("Tag", Attributes::new()).unwrap().0);
        f.store.replace_related(&post, "tags", &[tag.clone()]).unwrap();
        let key = OperationDispatcher::new(&f.schema, &f.codec)
            .capture(&f.ctx, &mut f.log, &f.store, Operation::Update, &post, Validation::Passed)
            .unwrap()
            .unwrap();
        f.store.delete(&tag).unwrap();
        let revision = f.log.revisions().get(&key).unwrap().clone();

        let lenient = f.dispatcher().invert(&revision, &mut f.store.clone()).unwrap();
        assert!(matches!(lenient, Inverse::Restored(ref r) if r.missing.len() == 1));

        let err = f
            .dispatcher()
            .strict_references(true)
            .invert(&revision, &mut f.store.clone())
            .unwrap_err();
        assert!(matches!(err, UndoError::MissingReference(ref m) if m.target == tag));
    }
}
