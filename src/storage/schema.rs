//! Entity schema for the in-memory store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// One entity and the to-many relationships it declares.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityDescription {
    pub name: String,
    pub relationships: BTreeSet<String>,
}

impl EntityDescription {
    /// True if the entity declares `relationship`.
    #[must_use]
    pub fn has_relationship(&self, relationship: &str) -> bool {
        self.relationships.contains(relationship)
    }

    /// Fail with `UnknownRelationship` unless the entity declares `relationship`.
    pub fn require_relationship(&self, relationship: &str) -> StoreResult<()> {
        if self.has_relationship(relationship) {
            Ok(())
        } else {
            Err(StoreError::UnknownRelationship {
                entity: self.name.clone(),
                relationship: relationship.to_string(),
            })
        }
    }
}

/// Set of entity descriptions shared by every context of a coordinator.
///
/// # Examples
///
/// ```
/// use kyrowatch::storage::Schema;
///
/// let schema = Schema::new()
///     .entity("Group", ["contacts"])
///     .leaf("PhoneNumber");
/// assert!(schema.get("Group").unwrap().has_relationship("contacts"));
/// assert!(schema.get("PhoneNumber").unwrap().relationships.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescription>,
}

impl Schema {
    /// Empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity with the given relationships. Redeclaring replaces.
    #[must_use]
    pub fn entity<I, S>(mut self, name: &str, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let description = EntityDescription {
            name: name.to_string(),
            relationships: relationships.into_iter().map(Into::into).collect(),
        };
        self.entities.insert(name.to_string(), description);
        self
    }

    /// Declare an entity without relationships.
    #[must_use]
    pub fn leaf(self, name: &str) -> Self {
        self.entity(name, std::iter::empty::<String>())
    }

    /// Look up an entity.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    /// Look up an entity, failing with `UnknownEntity`.
    pub fn require(&self, name: &str) -> StoreResult<&EntityDescription> {
        self.get(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }

    /// Declared entity names, sorted.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}
