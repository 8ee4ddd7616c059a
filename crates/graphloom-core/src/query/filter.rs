//! Filter expressions over entity properties and relationships.
//!
//! A [`FilterExpr`] is an immutable boolean tree. `And([])` is the identity
//! ("match everything") and `Or([])` matches nothing. The parser never
//! produces empty combinators from client input; they only appear through
//! [`FilterExpr::all`] and [`FilterExpr::none`].

use graphloom_proto::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::{EntityType, PropertyDef, PropertyType, RelationshipDef, Schema};
use crate::error::Error;

/// How a filter on a to-many relationship aggregates over related nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantifier {
    /// Every related node matches (vacuously true without related nodes).
    All,
    /// At least one related node matches.
    Any,
    /// No related node matches.
    None,
}

/// Operator applied to a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyOperator {
    Eq(Value),
    In(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    /// Full match against a regular expression.
    Matches(String),
    /// `true` matches absent or null properties, `false` the others.
    IsNull(bool),
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterExpr {
    /// All children match. Empty means match everything.
    And(Vec<FilterExpr>),
    /// At least one child matches. Empty means match nothing.
    Or(Vec<FilterExpr>),
    /// The child does not match.
    Not(Box<FilterExpr>),
    /// A predicate on a property of the current node.
    Property {
        property: String,
        operator: PropertyOperator,
    },
    /// A predicate on the nodes reached through a relationship.
    Relationship {
        relationship: RelationshipDef,
        quantifier: Quantifier,
        filter: Box<FilterExpr>,
    },
}

impl Default for FilterExpr {
    fn default() -> Self {
        FilterExpr::all()
    }
}

impl FilterExpr {
    /// The identity filter.
    pub fn all() -> Self {
        FilterExpr::And(Vec::new())
    }

    /// The filter that matches nothing.
    pub fn none() -> Self {
        FilterExpr::Or(Vec::new())
    }

    /// Create a property predicate.
    pub fn property(property: impl Into<String>, operator: PropertyOperator) -> Self {
        FilterExpr::Property {
            property: property.into(),
            operator,
        }
    }

    /// Create a relationship predicate.
    pub fn relationship(
        relationship: RelationshipDef,
        quantifier: Quantifier,
        filter: FilterExpr,
    ) -> Self {
        FilterExpr::Relationship {
            relationship,
            quantifier,
            filter: Box::new(filter),
        }
    }

    /// Negate a filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(filter))
    }

    /// Check whether this is the identity filter.
    pub fn is_all(&self) -> bool {
        matches!(self, FilterExpr::And(children) if children.is_empty())
    }

    /// Conjunction of several filters, dropping identity members.
    pub fn conjoin(filters: impl IntoIterator<Item = FilterExpr>) -> Self {
        let mut children: Vec<FilterExpr> = filters.into_iter().filter(|f| !f.is_all()).collect();
        match children.len() {
            1 => children.remove(0),
            _ => FilterExpr::And(children),
        }
    }
}

/// Parses generic JSON filter input into [`FilterExpr`] trees.
///
/// Accepted shapes, per entry of a filter object (several entries are ANDed):
///
/// - `"and": [filter, ...]` / `"or": [filter, ...]` with at least one child
/// - `"not": filter`
/// - `"<property>": {"<operator>": value, ...}`
/// - `"<many relationship>": {"all" | "any" | "none": filter, ...}`
/// - `"<one relationship>": filter` (or `null` for "no related node")
pub struct FilterParser<'a> {
    schema: &'a Schema,
}

impl<'a> FilterParser<'a> {
    /// Create a parser resolving relationship targets against a schema.
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Parse a filter for nodes of `entity`.
    pub fn parse(&self, entity: &EntityType, raw: &serde_json::Value) -> Result<FilterExpr, Error> {
        let object = raw.as_object().ok_or_else(|| {
            Error::MalformedFilter(format!("expected an object for '{}', got {}", entity.name, raw))
        })?;

        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            entries.push(self.parse_entry(entity, key, value)?);
        }
        Ok(FilterExpr::conjoin(entries))
    }

    fn parse_entry(
        &self,
        entity: &EntityType,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<FilterExpr, Error> {
        match key {
            "and" => Ok(FilterExpr::And(self.parse_list(entity, key, value)?)),
            "or" => Ok(FilterExpr::Or(self.parse_list(entity, key, value)?)),
            "not" => Ok(FilterExpr::not(self.parse(entity, value)?)),
            _ => {
                if let Some(property) = entity.property(key) {
                    parse_property(property, value)
                } else if let Some(relationship) = entity.relationship(key) {
                    self.parse_relationship(relationship, value)
                } else {
                    Err(Error::MalformedFilter(format!(
                        "'{}' is not a property or relationship of '{}'",
                        key, entity.name
                    )))
                }
            }
        }
    }

    fn parse_list(
        &self,
        entity: &EntityType,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<FilterExpr>, Error> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::MalformedFilter(format!("'{}' expects a list", key)))?;
        if items.is_empty() {
            return Err(Error::MalformedFilter(format!("'{}' expects at least one filter", key)));
        }
        items.iter().map(|item| self.parse(entity, item)).collect()
    }

    fn parse_relationship(
        &self,
        relationship: &RelationshipDef,
        value: &serde_json::Value,
    ) -> Result<FilterExpr, Error> {
        let target = self.schema.entity(&relationship.target)?;

        if !relationship.is_many() {
            if value.is_null() {
                return Ok(FilterExpr::relationship(
                    relationship.clone(),
                    Quantifier::None,
                    FilterExpr::all(),
                ));
            }
            let nested = self.parse(target, value)?;
            return Ok(FilterExpr::relationship(relationship.clone(), Quantifier::Any, nested));
        }

        let object = value
            .as_object()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                Error::MalformedFilter(format!(
                    "'{}' expects an object of 'all', 'any' or 'none'",
                    relationship.name
                ))
            })?;

        let mut entries = Vec::with_capacity(object.len());
        for (key, nested) in object {
            let quantifier = match key.as_str() {
                "all" => Quantifier::All,
                "any" => Quantifier::Any,
                "none" => Quantifier::None,
                other => {
                    return Err(Error::MalformedFilter(format!(
                        "unknown quantifier '{}' on '{}'",
                        other, relationship.name
                    )))
                }
            };
            let nested = self.parse(target, nested)?;
            entries.push(FilterExpr::relationship(relationship.clone(), quantifier, nested));
        }
        Ok(FilterExpr::conjoin(entries))
    }
}

fn parse_property(property: &PropertyDef, value: &serde_json::Value) -> Result<FilterExpr, Error> {
    let operators = value
        .as_object()
        .filter(|o| !o.is_empty())
        .ok_or_else(|| {
            Error::MalformedFilter(format!("'{}' expects an object of operators", property.name))
        })?;

    let mut predicates = Vec::with_capacity(operators.len());
    for (name, argument) in operators {
        let operator = parse_operator(property, name, argument)?;
        predicates.push(FilterExpr::property(property.name.clone(), operator));
    }
    Ok(FilterExpr::conjoin(predicates))
}

fn parse_operator(
    property: &PropertyDef,
    name: &str,
    argument: &serde_json::Value,
) -> Result<PropertyOperator, Error> {
    let operator = match name {
        "eq" if argument.is_null() => PropertyOperator::IsNull(true),
        "eq" => PropertyOperator::Eq(coerce(property, argument)?),
        "in" => {
            let items = argument.as_array().ok_or_else(|| {
                Error::MalformedFilter(format!("'in' on '{}' expects a list", property.name))
            })?;
            PropertyOperator::In(
                items
                    .iter()
                    .map(|item| coerce(property, item))
                    .collect::<Result<_, _>>()?,
            )
        }
        "lt" | "lte" | "gt" | "gte" => {
            if property.property_type == PropertyType::Boolean {
                return Err(Error::MalformedFilter(format!(
                    "'{}' cannot be applied to boolean '{}'",
                    name, property.name
                )));
            }
            let bound = coerce(property, argument)?;
            match name {
                "lt" => PropertyOperator::Lt(bound),
                "lte" => PropertyOperator::Lte(bound),
                "gt" => PropertyOperator::Gt(bound),
                _ => PropertyOperator::Gte(bound),
            }
        }
        "startsWith" | "endsWith" | "contains" | "matches" => {
            let text = text_argument(property, name, argument)?;
            match name {
                "startsWith" => PropertyOperator::StartsWith(text),
                "endsWith" => PropertyOperator::EndsWith(text),
                "contains" => PropertyOperator::Contains(text),
                _ => {
                    Regex::new(&text).map_err(|e| {
                        Error::MalformedFilter(format!(
                            "invalid pattern for '{}': {}",
                            property.name, e
                        ))
                    })?;
                    PropertyOperator::Matches(text)
                }
            }
        }
        "isNull" => PropertyOperator::IsNull(argument.as_bool().ok_or_else(|| {
            Error::MalformedFilter(format!("'isNull' on '{}' expects a boolean", property.name))
        })?),
        other => {
            return Err(Error::MalformedFilter(format!(
                "unknown operator '{}' on '{}'",
                other, property.name
            )))
        }
    };
    Ok(operator)
}

fn coerce(property: &PropertyDef, argument: &serde_json::Value) -> Result<Value, Error> {
    match property.property_type.coerce(argument) {
        Some(Value::Null) => Err(Error::MalformedFilter(format!(
            "null operand for '{}'",
            property.name
        ))),
        Some(value) => Ok(value),
        None => Err(Error::MalformedFilter(format!(
            "{} does not fit {:?} property '{}'",
            argument, property.property_type, property.name
        ))),
    }
}

fn text_argument(
    property: &PropertyDef,
    operator: &str,
    argument: &serde_json::Value,
) -> Result<String, Error> {
    if !property.property_type.is_textual() {
        return Err(Error::MalformedFilter(format!(
            "'{}' requires a string property, '{}' is {:?}",
            operator, property.name, property.property_type
        )));
    }
    argument.as_str().map(str::to_string).ok_or_else(|| {
        Error::MalformedFilter(format!("'{}' on '{}' expects a string", operator, property.name))
    })
}
