//! Relation schema: which relations each entity type declares, their shapes, and
//! which types never participate in capture.
//!
//! Schemas are plain data supplied by the host, resolved once per type and read-only
//! afterwards.
//!
//! # Invariants
//! - Relation names are unique within a type.
//! - The exclusion list always contains the history types themselves.

mod relation;

pub use relation::{EntitySchema, RelationDef, RelationShape, TargetResolver};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Entity type name under which revisions are stored.
pub const REVISION_TYPE: &str = "Revision";
/// Entity type name under which transactions are stored.
pub const TRANSACTION_TYPE: &str = "Transaction";

/// Errors from building or loading a relation schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("type {type_name} declares relation {relation} twice")]
    DuplicateRelation { type_name: String, relation: String },
    #[error("type {0} is registered twice")]
    DuplicateType(String),
}

/// On-disk form of a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: Vec<EntitySchema>,
    #[serde(default)]
    exclusions: Vec<String>,
}

/// Registry of entity schemas plus the capture exclusion list.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration.
#[derive(Debug, Clone)]
pub struct RelationSchema {
    entities: BTreeMap<String, EntitySchema>,
    exclusions: BTreeSet<String>,
}

impl Default for RelationSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationSchema {
    /// Empty schema whose exclusion list holds the history types.
    pub fn new() -> Self {
        let exclusions = [REVISION_TYPE, TRANSACTION_TYPE]
            .into_iter()
            .map(str::to_owned)
            .collect();
        Self {
            entities: BTreeMap::new(),
            exclusions,
        }
    }

    /// Register an entity type.
    pub fn register(&mut self, entity: EntitySchema) -> Result<(), SchemaError> {
        if self.entities.contains_key(&entity.type_name) {
            return Err(SchemaError::DuplicateType(entity.type_name));
        }
        let mut seen = BTreeSet::new();
        for relation in &entity.relations {
            if !seen.insert(relation.name.as_str()) {
                return Err(SchemaError::DuplicateRelation {
                    type_name: entity.type_name.clone(),
                    relation: relation.name.clone(),
                });
            }
        }
        tracing::debug!(
            type_name = %entity.type_name,
            relations = entity.relations.len(),
            "registered entity schema"
        );
        self.entities.insert(entity.type_name.clone(), entity);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, entity: EntitySchema) -> Result<Self, SchemaError> {
        self.register(entity)?;
        Ok(self)
    }

    /// Never capture revisions for this type.
    pub fn exclude(&mut self, type_name: impl Into<String>) {
        self.exclusions.insert(type_name.into());
    }

    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.exclusions.contains(type_name)
    }

    pub fn exclusions(&self) -> &BTreeSet<String> {
        &self.exclusions
    }

    pub fn entity(&self, type_name: &str) -> Option<&EntitySchema> {
        self.entities.get(type_name)
    }

    /// Relations declared for a type. Unregistered types have none.
    pub fn relations_of(&self, type_name: &str) -> &[RelationDef] {
        self.entities
            .get(type_name)
            .map(|e| e.relations.as_slice())
            .unwrap_or(&[])
    }

    pub fn relation(&self, type_name: &str, name: &str) -> Option<&RelationDef> {
        self.entities.get(type_name).and_then(|e| e.get(name))
    }

    /// Whether `key` names a declared relation rather than a scalar attribute.
    pub fn is_relation(&self, type_name: &str, key: &str) -> bool {
        self.relation(type_name, key).is_some()
    }

    /// All registered types, sorted.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Parse a schema from YAML.
    ///
    /// ```yaml
    /// entities:
    ///   - type_name: Post
    ///     relations:
    ///       - { name: comments, shape: owned_many, target: { fixed: Comment } }
    /// exclusions: [AuditEntry]
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(yaml)?;
        let mut schema = Self::new();
        for entity in file.entities {
            schema.register(entity)?;
        }
        for type_name in file.exclusions {
            schema.exclude(type_name);
        }
        Ok(schema)
    }

    /// Load a schema from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&data)
    }

    /// Serialize the schema back to YAML.
    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        let file = SchemaFile {
            entities: self.entities.values().cloned().collect(),
            exclusions: self.exclusions.iter().cloned().collect(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

pub fn crate_info() -> &'static str {
    "rewind-schema v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_schema() -> RelationSchema {
        RelationSchema::new()
            .with(
                EntitySchema::new("Post")
                    .owned_many("comments", "Comment")
                    .reference_many("tags", "Tag"),
            )
            .unwrap()
            .with(EntitySchema::new("Comment"))
            .unwrap()
    }

    #[test]
    fn history_types_always_excluded() {
        let schema = RelationSchema::new();
        assert!(schema.is_excluded(REVISION_TYPE));
        assert!(schema.is_excluded(TRANSACTION_TYPE));
        assert!(!schema.is_excluded("Post"));
    }

    #[test]
    fn lookup_relations() {
        let schema = blog_schema();
        assert_eq!(schema.relations_of("Post").len(), 2);
        assert!(schema.relations_of("Unknown").is_empty());
        assert!(schema.is_relation("Post", "tags"));
        assert!(!schema.is_relation("Post", "title"));
        assert_eq!(schema.types().collect::<Vec<_>>(), ["Comment", "Post"]);
    }

    #[test]
    fn duplicate_relation_rejected() {
        let result = RelationSchema::new().with(
            EntitySchema::new("Post")
                .reference_many("tags", "Tag")
                .reference_many("tags", "Label"),
        );
        assert!(matches!(
            result,
            Err(SchemaError::DuplicateRelation { ref relation, .. }) if relation == "tags"
        ));
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut schema = blog_schema();
        assert!(matches!(
            schema.register(EntitySchema::new("Post")),
            Err(SchemaError::DuplicateType(_))
        ));
    }

    #[test]
    fn yaml_roundtrip() {
        let yaml = r#"
entities:
  - type_name: Employee
    relations:
      - name: pictures
        shape: polymorphic_reference
        target:
          discriminator: gallery_type
  - type_name: Physician
    relations:
      - { name: patients, shape: reference_many, target: { fixed: Patient } }
exclusions: [AuditEntry]
"#;
        let schema = RelationSchema::from_yaml_str(yaml).unwrap();
        let pictures = schema.relation("Employee", "pictures").unwrap();
        assert_eq!(pictures.shape, RelationShape::PolymorphicReference);
        assert_eq!(
            pictures.target,
            TargetResolver::Discriminator("gallery_type".into())
        );
        assert!(schema.is_excluded("AuditEntry"));
        assert!(schema.is_excluded(REVISION_TYPE));

        let reparsed = RelationSchema::from_yaml_str(&schema.to_yaml().unwrap()).unwrap();
        assert_eq!(
            reparsed.relation("Physician", "patients"),
            schema.relation("Physician", "patients")
        );
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "entities:\n  - type_name: Tag\n").unwrap();
        let schema = RelationSchema::load(tmp.path()).unwrap();
        assert!(schema.entity("Tag").is_some());
    }
}
