//! Result ordering.
//!
//! An [`Order`] always ends with the `id` key, so no two distinct nodes ever
//! compare equal. Keyset pagination depends on that total order.

use serde::{Deserialize, Serialize};

use crate::catalog::{EntityType, RelationshipDef, Schema, ID_PROPERTY};
use crate::error::Error;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// What a sort key reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderPath {
    /// A property of the node itself.
    Property(String),
    /// A property of the node reached through a single-cardinality relationship.
    Related {
        relationship: RelationshipDef,
        property: String,
    },
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Key name, as requested (`name` or `author.name`). Also the cursor key.
    pub name: String,
    /// What the key reads.
    pub path: OrderPath,
    /// Sort direction.
    pub direction: SortDirection,
    /// Whether the key can read null. Nulls sort after every other value.
    #[serde(default)]
    pub nullable: bool,
}

impl OrderKey {
    /// Sort by a property of the node.
    pub fn property(name: impl Into<String>, direction: SortDirection) -> Self {
        let name = name.into();
        Self {
            path: OrderPath::Property(name.clone()),
            name,
            direction,
            nullable: false,
        }
    }

    /// Sort by a property of a related node.
    ///
    /// The key is nullable since the related node may be missing.
    pub fn related(
        relationship: RelationshipDef,
        property: impl Into<String>,
        direction: SortDirection,
    ) -> Self {
        let property = property.into();
        Self {
            name: format!("{}.{}", relationship.name, property),
            path: OrderPath::Related {
                relationship,
                property,
            },
            direction,
            nullable: true,
        }
    }

    /// Mark whether the key can read null.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// An ordered list of sort keys ending with the `id` tie-breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    keys: Vec<OrderKey>,
}

impl Default for Order {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Order {
    /// Create an order from explicit keys, appending the `id` tie-breaker.
    ///
    /// The tie-breaker takes the direction of the last explicit key unless
    /// `id` is already one of the keys.
    pub fn new(mut keys: Vec<OrderKey>) -> Self {
        if !keys.iter().any(|k| k.name == ID_PROPERTY) {
            let direction = keys.last().map(|k| k.direction).unwrap_or_default();
            keys.push(OrderKey::property(ID_PROPERTY, direction));
        }
        Self { keys }
    }

    /// The sort keys, tie-breaker included.
    pub fn keys(&self) -> &[OrderKey] {
        &self.keys
    }

    /// Key names, in order.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.name.as_str())
    }

    /// Parse an `orderBy` argument: `{field, direction}` or a list of them.
    pub fn parse(
        schema: &Schema,
        entity: &EntityType,
        raw: &serde_json::Value,
    ) -> Result<Order, Error> {
        let items: Vec<&serde_json::Value> = match raw {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(_) => vec![raw],
            serde_json::Value::Null => Vec::new(),
            other => {
                return Err(Error::InvalidOrder(format!(
                    "expected an object or a list, got {}",
                    other
                )))
            }
        };

        let mut keys: Vec<OrderKey> = Vec::with_capacity(items.len() + 1);
        for item in items {
            let key = parse_key(schema, entity, item)?;
            if keys.iter().any(|k| k.name == key.name) {
                return Err(Error::InvalidOrder(format!("'{}' is ordered twice", key.name)));
            }
            keys.push(key);
        }
        Ok(Order::new(keys))
    }
}

fn parse_key(
    schema: &Schema,
    entity: &EntityType,
    item: &serde_json::Value,
) -> Result<OrderKey, Error> {
    let object = item
        .as_object()
        .ok_or_else(|| Error::InvalidOrder(format!("expected {{field, direction}}, got {}", item)))?;

    let field = object
        .get("field")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::InvalidOrder(format!("missing 'field' in {}", item)))?;

    let direction = match object.get("direction").and_then(serde_json::Value::as_str) {
        None | Some("ASC") => SortDirection::Asc,
        Some("DESC") => SortDirection::Desc,
        Some(other) => {
            return Err(Error::InvalidOrder(format!("unknown direction '{}'", other)))
        }
    };

    match field.split_once('.') {
        None => {
            let property = entity.property(field).ok_or_else(|| {
                Error::InvalidOrder(format!(
                    "'{}' is not a property of '{}'",
                    field, entity.name
                ))
            })?;
            Ok(OrderKey::property(field, direction).with_nullable(property.nullable))
        }
        Some((relationship_name, property)) => {
            let relationship = entity
                .relationship(relationship_name)
                .filter(|r| !r.is_many())
                .ok_or_else(|| {
                    Error::InvalidOrder(format!(
                        "'{}' is not a single relationship of '{}'",
                        relationship_name, entity.name
                    ))
                })?;
            let target = schema.entity(&relationship.target)?;
            if target.property(property).is_none() {
                return Err(Error::InvalidOrder(format!(
                    "'{}' is not a property of '{}'",
                    property, target.name
                )));
            }
            Ok(OrderKey::related(relationship.clone(), property, direction))
        }
    }
}
