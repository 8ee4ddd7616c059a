//! Schema model for graphloom.
//!
//! The catalog describes entity types, their properties and their typed
//! relationships. It is built once, validated, and then shared read-only.

mod entity;
mod field;
mod relation;
mod schema;
mod types;

pub use entity::{EntityType, ID_PROPERTY};
pub use field::PropertyDef;
pub use relation::{Cardinality, Direction, RelationshipDef};
pub use schema::{Schema, SchemaBuilder};
pub use types::PropertyType;
