//! Selection tree types produced by the transport layer.
//!
//! A selection tree mirrors the shape of a client request: every requested
//! field carries its name, an optional alias (which becomes the result key),
//! its arguments as generic JSON trees, an optional type condition when the
//! field was requested inside a fragment on a subtype, and its own nested
//! selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single requested field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionField {
    /// Field name as declared on the type.
    pub name: String,
    /// Alias chosen by the client, if any.
    pub alias: Option<String>,
    /// Field arguments (e.g. `filter`, `orderBy`, `first`).
    pub arguments: BTreeMap<String, serde_json::Value>,
    /// Type condition of the enclosing fragment, for polymorphic requests.
    pub type_condition: Option<String>,
    /// Nested selection.
    pub selection: Vec<SelectionField>,
}

impl SelectionField {
    /// Create a field selection without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add an argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Restrict this field to a fragment on the given type.
    pub fn on_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_condition = Some(type_name.into());
        self
    }

    /// Add a nested field.
    pub fn select(mut self, field: SelectionField) -> Self {
        self.selection.push(field);
        self
    }

    /// The key under which this field's result is returned.
    pub fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Get an argument by name.
    pub fn argument(&self, name: &str) -> Option<&serde_json::Value> {
        self.arguments.get(name)
    }

    /// Find the first nested field with the given name.
    pub fn child(&self, name: &str) -> Option<&SelectionField> {
        self.selection.iter().find(|f| f.name == name)
    }

    /// Check whether a nested field with the given name was requested.
    pub fn has_child(&self, name: &str) -> bool {
        self.selection.iter().any(|f| f.name == name)
    }
}
