//! Merge schema.
//!
//! A schema tells the three-way merge which fields of an entity type it
//! tracks and how: scalar fields are compared as whole JSON values, keyed
//! list fields are merged item by item using a stable identifier.

use crate::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a tracked field is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Compared as a whole value
    Scalar,
    /// Array of objects identified by the `key` member
    KeyedList { key: String },
}

/// Definition of a tracked field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDef {
    /// A field compared as a whole value.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
        }
    }

    /// A list of objects merged by their `key` member.
    pub fn keyed_list(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::KeyedList { key: key.into() },
        }
    }
}

/// Tracked fields of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Create a new entity schema.
    pub fn new(entity_type: impl Into<EntityType>, fields: Vec<FieldDef>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Merge schemas for all entity types.
///
/// Entity types without a registered schema track every top-level field as a
/// scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entity_types: HashMap<EntityType, EntitySchema>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self {
            entity_types: HashMap::new(),
        }
    }

    /// Register an entity type.
    pub fn add_entity(&mut self, entity: EntitySchema) -> &mut Self {
        self.entity_types.insert(entity.entity_type.clone(), entity);
        self
    }

    /// Builder-style method to register an entity type.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    /// Get an entity schema by type.
    pub fn get_entity(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entity_types.get(entity_type)
    }

    /// Fields the merge should visit for this entity type.
    ///
    /// Without a registered schema this is the sorted union of the top-level
    /// keys of every given object, all treated as scalars.
    pub fn tracked_fields(
        &self,
        entity_type: &str,
        values: &[&serde_json::Value],
    ) -> Vec<FieldDef> {
        if let Some(entity) = self.entity_types.get(entity_type) {
            return entity.fields.clone();
        }

        let names: BTreeSet<&String> = values
            .iter()
            .filter_map(|v| v.as_object())
            .flat_map(|obj| obj.keys())
            .collect();

        names.into_iter().map(FieldDef::scalar).collect()
    }
}
