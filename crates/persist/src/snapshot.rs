use rewind_common::{Attributes, EntityRef, InstanceId, Value};
use rewind_kernel::{RecordStore, StoreError};
use rewind_schema::{RelationDef, RelationSchema, RelationShape};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Errors from capturing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("relation {relation} declared for {type_name} cannot be resolved")]
    SchemaMismatch { type_name: String, relation: String },
    #[error("record {0} not found")]
    RecordNotFound(EntityRef),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A point-in-time image of one record and its owned relation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity: EntityRef,
    pub attributes: Attributes,
    pub associations: BTreeMap<String, Association>,
}

/// Captured state of one declared relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Association {
    /// Owned-one relation with no target.
    Absent,
    One(Box<Node>),
    Many(Vec<Node>),
    /// Linkage of a reference relation. Target contents are never embedded.
    Ids(Vec<InstanceId>),
}

/// An embedded owned target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Captured(Snapshot),
    /// Emitted instead of recursing into a record already in this capture.
    AlreadyCaptured(EntityRef),
}

impl Node {
    pub fn entity(&self) -> &EntityRef {
        match self {
            Self::Captured(snapshot) => &snapshot.entity,
            Self::AlreadyCaptured(entity) => entity,
        }
    }
}

impl Snapshot {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.get(name)
    }

    /// Every record fully captured in this snapshot, root first, depth-first.
    pub fn captured_entities(&self) -> Vec<&EntityRef> {
        let mut out = vec![&self.entity];
        for association in self.associations.values() {
            let nodes: &[Node] = match association {
                Association::One(node) => std::slice::from_ref(node.as_ref()),
                Association::Many(nodes) => nodes,
                Association::Absent | Association::Ids(_) => &[],
            };
            for node in nodes {
                if let Node::Captured(nested) = node {
                    out.extend(nested.captured_entities());
                }
            }
        }
        out
    }
}

/// Builds snapshots by walking a record's declared relations.
///
/// Read-only with respect to the store. A visited set shared across one
/// top-level call breaks ownership cycles.
pub struct SnapshotSerializer<'a, S: RecordStore + ?Sized> {
    schema: &'a RelationSchema,
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> SnapshotSerializer<'a, S> {
    pub fn new(schema: &'a RelationSchema, store: &'a S) -> Self {
        Self { schema, store }
    }

    /// Capture `entity` and everything it owns.
    pub fn serialize(&self, entity: &EntityRef) -> Result<Snapshot, SnapshotError> {
        let mut visited = BTreeSet::new();
        self.capture(entity, &mut visited)
    }

    fn capture(
        &self,
        entity: &EntityRef,
        visited: &mut BTreeSet<EntityRef>,
    ) -> Result<Snapshot, SnapshotError> {
        let record = self
            .store
            .load(entity)?
            .ok_or_else(|| SnapshotError::RecordNotFound(entity.clone()))?;
        visited.insert(entity.clone());

        let mut associations = BTreeMap::new();
        for relation in self.schema.relations_of(&entity.type_name) {
            let targets = self.related(entity, relation)?;
            let association = match relation.shape {
                RelationShape::OwnedOne => match targets.first() {
                    Some(target) => Association::One(Box::new(self.node(target, visited)?)),
                    None => Association::Absent,
                },
                RelationShape::OwnedMany => Association::Many(
                    targets
                        .iter()
                        .map(|t| self.node(t, visited))
                        .collect::<Result<_, _>>()?,
                ),
                RelationShape::ReferenceMany | RelationShape::PolymorphicReference => {
                    Association::Ids(targets.iter().map(|t| t.id).collect())
                }
            };
            associations.insert(relation.name.clone(), association);
        }

        Ok(Snapshot {
            entity: entity.clone(),
            attributes: record.attributes,
            associations,
        })
    }

    fn node(
        &self,
        entity: &EntityRef,
        visited: &mut BTreeSet<EntityRef>,
    ) -> Result<Node, SnapshotError> {
        if visited.contains(entity) {
            tracing::debug!(%entity, "cycle guard hit");
            return Ok(Node::AlreadyCaptured(entity.clone()));
        }
        Ok(Node::Captured(self.capture(entity, visited)?))
    }

    fn related(
        &self,
        entity: &EntityRef,
        relation: &RelationDef,
    ) -> Result<Vec<EntityRef>, SnapshotError> {
        self.store
            .find_related(entity, &relation.name)
            .map_err(|e| match e {
                StoreError::UnknownRelation { type_name, relation } => {
                    SnapshotError::SchemaMismatch { type_name, relation }
                }
                other => SnapshotError::Store(other),
            })
    }
}
