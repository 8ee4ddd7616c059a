//! Property definitions for entity types.

use super::types::PropertyType;
use serde::{Deserialize, Serialize};

/// A property definition within an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Property data type.
    pub property_type: PropertyType,
    /// Whether the property may be absent or null.
    pub nullable: bool,
}

impl PropertyDef {
    /// Create a new required property.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            nullable: false,
        }
    }

    /// Create a nullable property.
    pub fn optional(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            nullable: true,
        }
    }
}
