//! Permission context attached to a request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A named access-control check plus the contextual parameters rules may read
/// (e.g. the authenticated user's id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Permission name, e.g. `"read"`.
    pub name: String,
    /// Context parameters available to rule generators.
    pub context: BTreeMap<String, Value>,
}

impl Permission {
    /// Create a permission without context parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: BTreeMap::new(),
        }
    }

    /// Add a context parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(name.into(), value.into());
        self
    }

    /// Get a context parameter.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.context.get(name)
    }
}
