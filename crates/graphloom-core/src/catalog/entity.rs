//! Entity type definitions.

use std::collections::{BTreeMap, BTreeSet};

use super::field::PropertyDef;
use super::relation::RelationshipDef;
use super::types::PropertyType;
use crate::security::{AuthorizationDecl, MergedAuthorization};

/// Name of the identifier property every entity type carries.
pub const ID_PROPERTY: &str = "id";

/// An entity type: one node label in the graph store.
///
/// After [`SchemaBuilder::build`](super::SchemaBuilder::build) the inherited
/// properties and relationships of all supertypes are flattened into the
/// type, and its authorization declarations are merged per permission name.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Type name, also used as the node label.
    pub name: String,
    /// Property definitions (including `id`).
    pub properties: Vec<PropertyDef>,
    /// Relationship definitions.
    pub relationships: Vec<RelationshipDef>,
    /// Direct supertypes.
    pub supertypes: Vec<String>,
    /// All transitive supertypes (resolved at build time).
    pub ancestors: BTreeSet<String>,
    /// Abstract types never appear as the concrete type of a node.
    pub is_abstract: bool,
    /// Authorization declarations made directly on this type.
    pub authorizations: Vec<AuthorizationDecl>,
    /// Authorization merged across this type and its supertypes, by permission name.
    pub merged_authorizations: BTreeMap<String, MergedAuthorization>,
}

impl EntityType {
    /// Create a new concrete entity type with an `id` property.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: vec![PropertyDef::new(ID_PROPERTY, PropertyType::Id)],
            relationships: Vec::new(),
            supertypes: Vec::new(),
            ancestors: BTreeSet::new(),
            is_abstract: false,
            authorizations: Vec::new(),
            merged_authorizations: BTreeMap::new(),
        }
    }

    /// Create an abstract entity type.
    pub fn new_abstract(name: impl Into<String>) -> Self {
        Self {
            is_abstract: true,
            ..Self::new(name)
        }
    }

    /// Add a property.
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a relationship owned by this type.
    pub fn with_relationship(mut self, mut relationship: RelationshipDef) -> Self {
        relationship.owner = self.name.clone();
        self.relationships.push(relationship);
        self
    }

    /// Declare a direct supertype.
    pub fn with_supertype(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    /// Add an authorization declaration.
    pub fn with_authorization(mut self, authorization: AuthorizationDecl) -> Self {
        self.authorizations.push(authorization);
        self
    }

    /// Get a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Get a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Check whether this type is `other` or one of its subtypes.
    pub fn is_subtype_of(&self, other: &str) -> bool {
        self.name == other || self.ancestors.contains(other)
    }

    /// Labels a stored node of this type carries.
    pub fn labels(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.ancestors.iter().cloned())
            .collect()
    }

    /// Merged authorization for a permission name, if any was declared.
    pub fn authorization(&self, permission: &str) -> Option<&MergedAuthorization> {
        self.merged_authorizations.get(permission)
    }
}
