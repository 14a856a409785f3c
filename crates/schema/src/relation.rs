use rewind_common::Attributes;
use serde::{Deserialize, Serialize};

/// How a relation's targets relate to the owner's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationShape {
    /// One-to-one composition. Target is captured and restored with the owner.
    OwnedOne,
    /// One-to-many composition, ordered.
    OwnedMany,
    /// Many-to-many link to independently managed records. Only ids are captured.
    ReferenceMany,
    /// Like `ReferenceMany`, but the target type is named by an owner attribute.
    PolymorphicReference,
}

impl RelationShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OwnedOne => "owned_one",
            Self::OwnedMany => "owned_many",
            Self::ReferenceMany => "reference_many",
            Self::PolymorphicReference => "polymorphic_reference",
        }
    }
}

/// Rule for finding the concrete type of a relation's targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetResolver {
    /// Targets always have this type.
    Fixed(String),
    /// Targets have the type named by this attribute of the owning record.
    Discriminator(String),
}

impl TargetResolver {
    /// Resolve the target type from the owner's attributes.
    ///
    /// Returns `None` when a discriminator attribute is missing or not text.
    pub fn resolve(&self, owner: &Attributes) -> Option<String> {
        match self {
            Self::Fixed(type_name) => Some(type_name.clone()),
            Self::Discriminator(attribute) => owner
                .get(attribute)
                .and_then(|v| v.as_text())
                .map(str::to_owned),
        }
    }
}

/// A single declared relation on an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub shape: RelationShape,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub target: TargetResolver,
}

/// Declared relations of one entity type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub type_name: String,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntitySchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relations: Vec::new(),
        }
    }

    pub fn owned_one(self, name: &str, target: &str) -> Self {
        self.relation(name, RelationShape::OwnedOne, TargetResolver::Fixed(target.into()))
    }

    pub fn owned_many(self, name: &str, target: &str) -> Self {
        self.relation(name, RelationShape::OwnedMany, TargetResolver::Fixed(target.into()))
    }

    pub fn reference_many(self, name: &str, target: &str) -> Self {
        self.relation(
            name,
            RelationShape::ReferenceMany,
            TargetResolver::Fixed(target.into()),
        )
    }

    /// Polymorphic reference whose target type is stored in `discriminator`.
    pub fn polymorphic(self, name: &str, discriminator: &str) -> Self {
        self.relation(
            name,
            RelationShape::PolymorphicReference,
            TargetResolver::Discriminator(discriminator.into()),
        )
    }

    pub fn relation(mut self, name: &str, shape: RelationShape, target: TargetResolver) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            shape,
            target,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}
