//! Relationship definitions between entity types.

use serde::{Deserialize, Serialize};

/// Cardinality of a relationship, seen from its owning type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one related node; results are a single optional entity.
    One,
    /// Any number of related nodes; results are an ordered, paginated collection.
    Many,
}

/// Direction of the stored edge relative to the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// `(owner)-[:LABEL]->(target)`.
    Outgoing,
    /// `(owner)<-[:LABEL]-(target)`.
    Incoming,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
        }
    }
}

/// A relationship definition on an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Field name on the owning type (unique within the type).
    pub name: String,
    /// Owning entity type name.
    pub owner: String,
    /// Target entity type name.
    pub target: String,
    /// Edge label in the graph store.
    pub label: String,
    /// Edge direction relative to the owner.
    pub direction: Direction,
    /// Relationship cardinality.
    pub cardinality: Cardinality,
    /// Name of the inverse relationship on the target type, if declared.
    ///
    /// Validated at schema-build time to carry the same label and the
    /// opposite direction.
    pub inverse: Option<String>,
}

impl RelationshipDef {
    /// Create a single-cardinality relationship.
    ///
    /// The owner is filled in when the relationship is attached to an entity type.
    pub fn one(
        name: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            target: target.into(),
            label: label.into(),
            direction,
            cardinality: Cardinality::One,
            inverse: None,
        }
    }

    /// Create a many-cardinality relationship.
    pub fn many(
        name: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target, label, direction)
        }
    }

    /// Declare the inverse relationship on the target type.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Check if this relationship yields a collection.
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Qualified name used in error messages and cache keys.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}
