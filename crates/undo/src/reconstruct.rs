use crate::error::{MissingReference, UndoError};
use rewind_common::{Attributes, EntityRef};
use rewind_kernel::{RawWrite, RecordStore, StoreError};
use rewind_persist::{Association, Node, Snapshot};
use rewind_schema::{RelationDef, RelationSchema, RelationShape};

/// How the root record of a snapshot is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// The record was destroyed: recreate it under its original key.
    Insert,
    /// The record still exists: replace its attributes in place.
    Merge,
}

impl RebuildMode {
    fn raw(self) -> RawWrite {
        match self {
            Self::Insert => RawWrite::Create,
            Self::Merge => RawWrite::Overwrite,
        }
    }
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rebuilt {
    /// Records written, root first.
    pub written: Vec<EntityRef>,
    /// Reference targets skipped because they no longer exist.
    pub missing: Vec<MissingReference>,
}

/// Writes a snapshot back into the store, relation-shape aware.
///
/// Attributes go through the raw write path so protected and managed fields
/// receive their captured values. Every write is issued immediately; the first
/// rejection stops the rebuild.
pub struct Reconstructor<'a> {
    schema: &'a RelationSchema,
}

impl<'a> Reconstructor<'a> {
    pub fn new(schema: &'a RelationSchema) -> Self {
        Self { schema }
    }

    pub fn rebuild<S: RecordStore + ?Sized>(
        &self,
        snapshot: &Snapshot,
        mode: RebuildMode,
        store: &mut S,
    ) -> Result<Rebuilt, UndoError> {
        let mut out = Rebuilt::default();
        self.restore(snapshot, mode.raw(), store, &mut out)?;
        Ok(out)
    }

    fn restore<S: RecordStore + ?Sized>(
        &self,
        snapshot: &Snapshot,
        write: RawWrite,
        store: &mut S,
        out: &mut Rebuilt,
    ) -> Result<(), UndoError> {
        let entity = &snapshot.entity;
        let type_name = entity.type_name.as_str();
        if let Some(name) = snapshot
            .associations
            .keys()
            .find(|name| !self.schema.is_relation(type_name, name))
        {
            return Err(UndoError::SchemaMismatch {
                type_name: type_name.to_owned(),
                relation: name.clone(),
            });
        }

        let scalars: Attributes = snapshot
            .attributes
            .iter()
            .filter(|(key, _)| !self.schema.is_relation(type_name, key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        store
            .raw_write(entity, &scalars, write)
            .map_err(|e| restore_error(entity, e))?;
        out.written.push(entity.clone());

        for relation in self.schema.relations_of(type_name) {
            let Some(association) = snapshot.associations.get(&relation.name) else {
                continue;
            };
            let targets = match (relation.shape, association) {
                (RelationShape::OwnedOne, Association::Absent) => Vec::new(),
                (RelationShape::OwnedOne, Association::One(node)) => {
                    vec![self.restore_node(node, store, out)?]
                }
                (RelationShape::OwnedMany, Association::Many(nodes)) => {
                    self.link(store, entity, relation, &[])?;
                    let mut children = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        children.push(self.restore_node(node, store, out)?);
                    }
                    children
                }
                (RelationShape::ReferenceMany | RelationShape::PolymorphicReference, Association::Ids(ids)) => {
                    if ids.is_empty() {
                        Vec::new()
                    } else {
                        let target_type = relation.target.resolve(&snapshot.attributes).ok_or_else(|| {
                            UndoError::SchemaMismatch {
                                type_name: type_name.to_owned(),
                                relation: relation.name.clone(),
                            }
                        })?;
                        let mut found = Vec::with_capacity(ids.len());
                        for id in ids {
                            let target = EntityRef {
                                type_name: target_type.clone(),
                                id: *id,
                            };
                            if store.exists(&target)? {
                                found.push(target);
                            } else {
                                tracing::warn!(
                                    owner = %entity,
                                    relation = %relation.name,
                                    %target,
                                    "skipping missing reference"
                                );
                                out.missing.push(MissingReference {
                                    owner: entity.clone(),
                                    relation: relation.name.clone(),
                                    target,
                                });
                            }
                        }
                        found
                    }
                }
                _ => {
                    return Err(UndoError::SchemaMismatch {
                        type_name: type_name.to_owned(),
                        relation: relation.name.clone(),
                    });
                }
            };
            self.link(store, entity, relation, &targets)?;
            tracing::debug!(
                owner = %entity,
                relation = %relation.name,
                shape = relation.shape.as_str(),
                targets = targets.len(),
                "restored relation"
            );
        }
        Ok(())
    }

    /// Upsert an owned child under its original key, or link a cycle marker as-is.
    fn restore_node<S: RecordStore + ?Sized>(
        &self,
        node: &Node,
        store: &mut S,
        out: &mut Rebuilt,
    ) -> Result<EntityRef, UndoError> {
        match node {
            Node::Captured(nested) => {
                self.restore(nested, RawWrite::Upsert, store, out)?;
                Ok(nested.entity.clone())
            }
            Node::AlreadyCaptured(entity) => Ok(entity.clone()),
        }
    }

    fn link<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        entity: &EntityRef,
        relation: &RelationDef,
        targets: &[EntityRef],
    ) -> Result<(), UndoError> {
        store
            .replace_related(entity, &relation.name, targets)
            .map_err(|e| restore_error(entity, e))
    }
}

fn restore_error(entity: &EntityRef, error: StoreError) -> UndoError {
    match error {
        StoreError::UnknownRelation { type_name, relation } => {
            UndoError::SchemaMismatch { type_name, relation }
        }
        source => UndoError::RestoreValidationFailed {
            entity: entity.clone(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_common::{Value, attrs};
    use rewind_kernel::MemoryStore;
    use rewind_persist::SnapshotSerializer;
    use rewind_schema::EntitySchema;

    fn schema() -> RelationSchema {
        RelationSchema::new()
            .with(
                EntitySchema::new("Post")
                    .owned_one("summary", "Summary")
                    .owned_many("comments", "Comment")
                    .reference_many("tags", "Tag")
                    .polymorphic("pictures", "gallery_type"),
            )
            .unwrap()
            .with(EntitySchema::new("Summary"))
            .unwrap()
            .with(EntitySchema::new("Comment"))
            .unwrap()
            .with(EntitySchema::new("Tag"))
            .unwrap()
            .with(EntitySchema::new("Photo"))
            .unwrap()
    }

    fn create(store: &mut MemoryStore, entity: &EntityRef, attributes: Attributes) {
        store
            .raw_write(entity, &attributes, RawWrite::Create)
            .unwrap();
    }

    #[test]
    fn merge_round_trips_scalars() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, attrs([("title", Value::from("a")), ("views", Value::Int(3))]));
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        store
            .update(&post, attrs([("title", Value::from("b")), ("views", Value::Int(9))]))
            .unwrap();
        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert_eq!(store.get(&post), Some(&snap.attributes));
    }

    #[test]
    fn insert_restores_owned_graph_with_original_ids() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        let summary = EntityRef::new("Summary", 5);
        let c1 = EntityRef::new("Comment", 11);
        let c2 = EntityRef::new("Comment", 12);
        create(&mut store, &post, attrs([("title", "t")]));
        create(&mut store, &summary, attrs([("text", "short")]));
        create(&mut store, &c1, attrs([("body", "one")]));
        create(&mut store, &c2, attrs([("body", "two")]));
        store.replace_related(&post, "summary", &[summary.clone()]).unwrap();
        store
            .replace_related(&post, "comments", &[c2.clone(), c1.clone()])
            .unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        for r in [&post, &summary, &c1, &c2] {
            store.delete(r).unwrap();
        }
        let rebuilt = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Insert, &mut store)
            .unwrap();

        assert_eq!(rebuilt.written.len(), 4);
        assert_eq!(store.find_related(&post, "summary").unwrap(), vec![summary.clone()]);
        assert_eq!(store.find_related(&post, "comments").unwrap(), vec![c2.clone(), c1]);
        assert_eq!(store.get(&c2).unwrap()["body"], Value::from("two"));
        assert_eq!(store.get(&summary).unwrap()["text"], Value::from("short"));
    }

    #[test]
    fn merge_replaces_owned_child_rows() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        let comment = EntityRef::new("Comment", 2);
        create(&mut store, &post, Attributes::new());
        create(&mut store, &comment, attrs([("body", "one")]));
        store.replace_related(&post, "comments", &[comment.clone()]).unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        store
            .update(&comment, attrs([("body", Value::from("edited")), ("flagged", Value::Bool(true))]))
            .unwrap();
        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert_eq!(store.get(&comment), Some(&attrs([("body", "one")])));
    }

    #[test]
    fn ownership_cycle_is_relinked_by_reference() {
        let schema = RelationSchema::new()
            .with(EntitySchema::new("Folder").owned_one("index", "Page"))
            .unwrap()
            .with(EntitySchema::new("Page").owned_one("folder", "Folder"))
            .unwrap();
        let mut store = MemoryStore::from_schema(&schema);
        let folder = EntityRef::new("Folder", 1);
        let page = EntityRef::new("Page", 1);
        create(&mut store, &folder, attrs([("name", "docs")]));
        create(&mut store, &page, attrs([("title", "index")]));
        store.replace_related(&folder, "index", &[page.clone()]).unwrap();
        store.replace_related(&page, "folder", &[folder.clone()]).unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&folder).unwrap();

        store.delete(&page).unwrap();
        store.delete(&folder).unwrap();
        let rebuilt = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Insert, &mut store)
            .unwrap();

        assert_eq!(rebuilt.written, vec![folder.clone(), page.clone()]);
        assert_eq!(store.find_related(&folder, "index").unwrap(), vec![page.clone()]);
        assert_eq!(store.find_related(&page, "folder").unwrap(), vec![folder]);
    }

    #[test]
    fn absent_owned_one_clears_relation() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, Attributes::new());
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        let summary = EntityRef::new("Summary", 1);
        create(&mut store, &summary, Attributes::new());
        store.replace_related(&post, "summary", &[summary]).unwrap();

        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert!(store.find_related(&post, "summary").unwrap().is_empty());
    }

    #[test]
    fn reference_membership_is_replaced_exactly() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        let [x, y, z] = [1, 2, 3].map(|id| EntityRef::new("Tag", id));
        create(&mut store, &post, Attributes::new());
        for tag in [&x, &y, &z] {
            create(&mut store, tag, Attributes::new());
        }
        store.replace_related(&post, "tags", &[x.clone(), y.clone()]).unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        store.replace_related(&post, "tags", &[y.clone(), z.clone()]).unwrap();
        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert_eq!(store.find_related(&post, "tags").unwrap(), vec![x, y]);
        // Reference targets are never rewritten.
        assert!(store.get(&z).is_some());
    }

    #[test]
    fn polymorphic_targets_resolve_through_discriminator() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        let photo = EntityRef::new("Photo", 4);
        create(&mut store, &post, attrs([("gallery_type", "Photo")]));
        create(&mut store, &photo, Attributes::new());
        store.replace_related(&post, "pictures", &[photo.clone()]).unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        store.replace_related(&post, "pictures", &[]).unwrap();
        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert_eq!(store.find_related(&post, "pictures").unwrap(), vec![photo]);
    }

    #[test]
    fn missing_references_are_skipped_and_reported() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        let [x, y] = [1, 2].map(|id| EntityRef::new("Tag", id));
        create(&mut store, &post, Attributes::new());
        create(&mut store, &x, Attributes::new());
        create(&mut store, &y, Attributes::new());
        store.replace_related(&post, "tags", &[x.clone(), y.clone()]).unwrap();
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();

        store.delete(&x).unwrap();
        let rebuilt = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert_eq!(store.find_related(&post, "tags").unwrap(), vec![y]);
        assert_eq!(rebuilt.missing.len(), 1);
        assert_eq!(rebuilt.missing[0].target, x);
    }

    #[test]
    fn insert_over_existing_key_is_rejected() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, Attributes::new());
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();
        let err = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Insert, &mut store)
            .unwrap_err();
        assert!(matches!(err, UndoError::RestoreValidationFailed { .. }));
    }

    #[test]
    fn merge_into_vanished_record_is_rejected() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, Attributes::new());
        let snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();
        store.delete(&post).unwrap();
        let err = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap_err();
        assert!(matches!(
            err,
            UndoError::RestoreValidationFailed {
                source: StoreError::NotFound(_),
                ..
            }
        ));
    }

    #[test]
    fn undeclared_association_is_schema_mismatch() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, Attributes::new());
        let mut snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();
        snap.associations
            .insert("authors".into(), Association::Ids(Vec::new()));
        let err = Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap_err();
        assert!(matches!(err, UndoError::SchemaMismatch { ref relation, .. } if relation == "authors"));
    }

    #[test]
    fn scalar_shadowing_a_relation_is_not_written() {
        let schema = schema();
        let mut store = MemoryStore::from_schema(&schema);
        let post = EntityRef::new("Post", 1);
        create(&mut store, &post, Attributes::new());
        let mut snap = SnapshotSerializer::new(&schema, &store).serialize(&post).unwrap();
        snap.attributes.insert("tags".into(), Value::from("bogus"));
        Reconstructor::new(&schema)
            .rebuild(&snap, RebuildMode::Merge, &mut store)
            .unwrap();
        assert!(!store.get(&post).unwrap().contains_key("tags"));
    }
}
