use crate::adapter::{RawWrite, Record, RecordStore, StoreError};
use rewind_common::{Attributes, EntityRef, ID_ATTRIBUTE, InstanceId, Value};
use rewind_schema::RelationSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An event record produced by every write to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    Inserted { entity: EntityRef },
    Updated { entity: EntityRef },
    Deleted { entity: EntityRef },
    RawWritten { entity: EntityRef, mode: RawWrite },
    LinksReplaced {
        entity: EntityRef,
        relation: String,
        targets: usize,
    },
}

/// Per-type write rules enforced by the validated path.
#[derive(Debug, Clone, Default)]
struct TypeRules {
    relations: BTreeSet<String>,
    /// Dropped from validated writes (mass-assignment guard).
    protected: BTreeSet<String>,
    /// Checked on every write, raw or validated.
    unique: BTreeSet<String>,
    /// Recomputed by the insert hook as `max + 1`.
    position: Option<String>,
}

/// Deterministic in-memory backing store.
///
/// Rows and relation links live in BTreeMaps, so iteration and relation order
/// are reproducible. Relations are link lists owned by the source row; deleting
/// a row drops its outgoing links, and links pointing at missing rows are hidden
/// from `find_related`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<EntityRef, Attributes>,
    links: BTreeMap<(EntityRef, String), Vec<EntityRef>>,
    sequences: BTreeMap<String, u64>,
    rules: BTreeMap<String, TypeRules>,
    event_log: Vec<StoreEvent>,
}

impl MemoryStore {
    /// Create an empty store with no declared types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store declaring every type and relation in `schema`.
    pub fn from_schema(schema: &RelationSchema) -> Self {
        let mut store = Self::new();
        for type_name in schema.types() {
            store.declare_type(type_name);
            for relation in schema.relations_of(type_name) {
                store.declare_relation(type_name, &relation.name);
            }
        }
        store
    }

    pub fn declare_type(&mut self, type_name: &str) {
        self.rules.entry(type_name.to_owned()).or_default();
    }

    pub fn declare_relation(&mut self, type_name: &str, relation: &str) {
        self.rules
            .entry(type_name.to_owned())
            .or_default()
            .relations
            .insert(relation.to_owned());
    }

    /// Guard an attribute against validated writes.
    pub fn protect(&mut self, type_name: &str, attribute: &str) {
        self.rules
            .entry(type_name.to_owned())
            .or_default()
            .protected
            .insert(attribute.to_owned());
    }

    pub fn unique(&mut self, type_name: &str, attribute: &str) {
        self.rules
            .entry(type_name.to_owned())
            .or_default()
            .unique
            .insert(attribute.to_owned());
    }

    /// Let the insert hook maintain `attribute` as an ordering position.
    pub fn managed_position(&mut self, type_name: &str, attribute: &str) {
        self.rules.entry(type_name.to_owned()).or_default().position = Some(attribute.to_owned());
    }

    /// Read-only access to a row's attributes.
    pub fn get(&self, entity: &EntityRef) -> Option<&Attributes> {
        self.records.get(entity)
    }

    /// Number of rows of a type.
    pub fn count(&self, type_name: &str) -> usize {
        self.records
            .keys()
            .filter(|r| r.type_name == type_name)
            .count()
    }

    /// Number of rows across all types.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only access to the write log.
    pub fn events(&self) -> &[StoreEvent] {
        &self.event_log
    }

    /// Drain and return the write log.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.event_log)
    }

    fn rules(&self, type_name: &str) -> Option<&TypeRules> {
        self.rules.get(type_name)
    }

    fn next_id(&mut self, type_name: &str) -> InstanceId {
        let seq = self.sequences.entry(type_name.to_owned()).or_insert(0);
        *seq += 1;
        InstanceId(*seq)
    }

    /// Keep the sequence ahead of keys written explicitly.
    fn observe_id(&mut self, entity: &EntityRef) {
        let seq = self.sequences.entry(entity.type_name.clone()).or_insert(0);
        *seq = (*seq).max(entity.id.0);
    }

    /// Drop the primary key and, on the validated path, protected attributes.
    fn sanitize(&self, type_name: &str, mut attributes: Attributes, validated: bool) -> Attributes {
        attributes.remove(ID_ATTRIBUTE);
        if !validated {
            return attributes;
        }
        if let Some(rules) = self.rules(type_name) {
            for attribute in &rules.protected {
                if attributes.remove(attribute).is_some() {
                    tracing::warn!(type_name, attribute = %attribute, "dropped protected attribute");
                }
            }
        }
        attributes
    }

    fn check_unique(&self, entity: &EntityRef, candidate: &Attributes) -> Result<(), StoreError> {
        let Some(rules) = self.rules(&entity.type_name) else {
            return Ok(());
        };
        for attribute in &rules.unique {
            let Some(value) = candidate.get(attribute).filter(|v| !v.is_null()) else {
                continue;
            };
            let collides = self.records.iter().any(|(other, attrs)| {
                other.type_name == entity.type_name
                    && other != entity
                    && attrs.get(attribute) == Some(value)
            });
            if collides {
                return Err(StoreError::UniqueViolation {
                    type_name: entity.type_name.clone(),
                    attribute: attribute.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn next_position(&self, type_name: &str, attribute: &str) -> i64 {
        self.records
            .iter()
            .filter(|(r, _)| r.type_name == type_name)
            .filter_map(|(_, attrs)| attrs.get(attribute).and_then(Value::as_int))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn require_relation(&self, entity: &EntityRef, relation: &str) -> Result<(), StoreError> {
        let declared = self
            .rules(&entity.type_name)
            .is_some_and(|r| r.relations.contains(relation));
        if declared {
            Ok(())
        } else {
            Err(StoreError::UnknownRelation {
                type_name: entity.type_name.clone(),
                relation: relation.to_owned(),
            })
        }
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, entity: &EntityRef) -> Result<Option<Record>, StoreError> {
        Ok(self.records.get(entity).map(|attributes| Record {
            entity: entity.clone(),
            attributes: attributes.clone(),
        }))
    }

    fn exists(&self, entity: &EntityRef) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(entity))
    }

    fn insert(&mut self, type_name: &str, attributes: Attributes) -> Result<InstanceId, StoreError> {
        let mut attributes = self.sanitize(type_name, attributes, true);
        if let Some(attribute) = self.rules(type_name).and_then(|r| r.position.clone()) {
            let position = self.next_position(type_name, &attribute);
            attributes.insert(attribute, Value::Int(position));
        }
        let sequence = self.sequences.get(type_name).copied().unwrap_or(0);
        let entity = EntityRef::new(type_name, sequence + 1);
        self.check_unique(&entity, &attributes)?;

        let id = self.next_id(type_name);
        debug_assert_eq!(id, entity.id);
        self.records.insert(entity.clone(), attributes);
        tracing::debug!(%entity, "inserted record");
        self.event_log.push(StoreEvent::Inserted { entity });
        Ok(id)
    }

    fn update(&mut self, entity: &EntityRef, attributes: Attributes) -> Result<(), StoreError> {
        let attributes = self.sanitize(&entity.type_name, attributes, true);
        let current = self
            .records
            .get(entity)
            .ok_or_else(|| StoreError::NotFound(entity.clone()))?;
        let mut merged = current.clone();
        merged.extend(attributes);
        self.check_unique(entity, &merged)?;

        self.records.insert(entity.clone(), merged);
        self.event_log.push(StoreEvent::Updated {
            entity: entity.clone(),
        });
        Ok(())
    }

    fn delete(&mut self, entity: &EntityRef) -> Result<bool, StoreError> {
        if self.records.remove(entity).is_none() {
            return Ok(false);
        }
        self.links.retain(|(source, _), _| source != entity);
        tracing::debug!(%entity, "deleted record");
        self.event_log.push(StoreEvent::Deleted {
            entity: entity.clone(),
        });
        Ok(true)
    }

    fn find_related(&self, entity: &EntityRef, relation: &str) -> Result<Vec<EntityRef>, StoreError> {
        self.require_relation(entity, relation)?;
        Ok(self
            .links
            .get(&(entity.clone(), relation.to_owned()))
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| self.records.contains_key(t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn replace_related(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        targets: &[EntityRef],
    ) -> Result<(), StoreError> {
        self.require_relation(entity, relation)?;
        if !self.records.contains_key(entity) {
            return Err(StoreError::NotFound(entity.clone()));
        }
        let key = (entity.clone(), relation.to_owned());
        if targets.is_empty() {
            self.links.remove(&key);
        } else {
            self.links.insert(key, targets.to_vec());
        }
        self.event_log.push(StoreEvent::LinksReplaced {
            entity: entity.clone(),
            relation: relation.to_owned(),
            targets: targets.len(),
        });
        Ok(())
    }

    fn raw_write(
        &mut self,
        entity: &EntityRef,
        attributes: &Attributes,
        mode: RawWrite,
    ) -> Result<(), StoreError> {
        let attributes = self.sanitize(&entity.type_name, attributes.clone(), false);
        match (mode, self.records.contains_key(entity)) {
            (RawWrite::Create, true) => return Err(StoreError::AlreadyExists(entity.clone())),
            (RawWrite::Overwrite, false) => return Err(StoreError::NotFound(entity.clone())),
            _ => {}
        }
        self.check_unique(entity, &attributes)?;

        self.records.insert(entity.clone(), attributes);
        self.observe_id(entity);
        self.event_log.push(StoreEvent::RawWritten {
            entity: entity.clone(),
            mode,
        });
        Ok(())
    }

    fn scan(&self, type_name: &str) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|(r, _)| r.type_name == type_name)
            .map(|(entity, attributes)| Record {
                entity: entity.clone(),
                attributes: attributes.clone(),
            })
            .collect())
    }
}
