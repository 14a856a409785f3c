use rewind_common::{Attributes, EntityRef, InstanceId};
use serde::{Deserialize, Serialize};

/// A persisted row: its reference plus scalar attributes.
///
/// The primary key lives in `entity`, never in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: EntityRef,
    pub attributes: Attributes,
}

/// How a raw write treats an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawWrite {
    /// Row must not exist yet. The given primary key is used as-is.
    Create,
    /// Create the row, or replace its attributes if it exists.
    Upsert,
    /// Row must exist; its attributes are replaced wholesale.
    Overwrite,
}

/// Errors reported by the backing store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(EntityRef),
    #[error("record {0} already exists")]
    AlreadyExists(EntityRef),
    #[error("unique constraint on {type_name}.{attribute} violated by {value}")]
    UniqueViolation {
        type_name: String,
        attribute: String,
        value: String,
    },
    #[error("type {type_name} has no relation {relation}")]
    UnknownRelation { type_name: String, relation: String },
}

/// Primitive operations the revision engine requires from the host's backing store.
///
/// `insert` and `update` are the validated paths ordinary application code uses.
/// `raw_write` is the restoration path: it accepts protected attributes and
/// pre-known primary keys, and skips derived-field hooks. Constraint checks still
/// apply to every write.
pub trait RecordStore {
    fn load(&self, entity: &EntityRef) -> Result<Option<Record>, StoreError>;

    fn exists(&self, entity: &EntityRef) -> Result<bool, StoreError> {
        Ok(self.load(entity)?.is_some())
    }

    /// Insert a new row through the validated path. Returns the assigned key.
    fn insert(&mut self, type_name: &str, attributes: Attributes) -> Result<InstanceId, StoreError>;

    /// Merge attributes into an existing row through the validated path.
    fn update(&mut self, entity: &EntityRef, attributes: Attributes) -> Result<(), StoreError>;

    /// Delete a row. Returns `false` if it was already absent.
    fn delete(&mut self, entity: &EntityRef) -> Result<bool, StoreError>;

    /// Ordered targets of a relation. Targets that no longer exist are omitted.
    fn find_related(&self, entity: &EntityRef, relation: &str) -> Result<Vec<EntityRef>, StoreError>;

    /// Replace a relation's membership with exactly `targets`, in order.
    fn replace_related(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<(), StoreError>;

    /// Write attributes directly, bypassing allow-lists and hooks.
    ///
    /// The written set becomes the row's full attribute set; nothing from the
    /// previous row survives.
    fn raw_write(
        &mut self,
        entity: &EntityRef,
        attributes: &Attributes,
        mode: RawWrite,
    ) -> Result<(), StoreError>;

    /// All rows of a type, ordered by primary key.
    fn scan(&self, type_name: &str) -> Result<Vec<Record>, StoreError>;
}
