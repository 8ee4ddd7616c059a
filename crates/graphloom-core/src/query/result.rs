//! Typed query results handed to the transport layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphloom_proto::Value;
use serde::{Serialize, Serializer};

use super::cache::RelationshipCache;

static NULL: Value = Value::Null;

/// Page existence flags and boundary cursors of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// A returned node with the cursor it was returned at.
#[derive(Debug, Clone, Serialize)]
pub struct ResultItem {
    pub cursor: String,
    pub node: Node,
}

/// A page of nodes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub items: Vec<ResultItem>,
    /// Number of matching nodes before paging, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    pub page_info: PageInfo,
}

impl QueryResult {
    /// Returned nodes in order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.items.iter().map(|item| &item.node)
    }

    /// Identifiers of the returned nodes in order.
    pub fn ids(&self) -> Vec<&str> {
        self.nodes().map(|node| node.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Result of one relationship of a node.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RelationshipResult {
    /// Single-cardinality relationship: at most one node.
    One(Option<Node>),
    /// Many-cardinality relationship: a page of nodes.
    Many(QueryResult),
}

impl RelationshipResult {
    /// The related node of a single-cardinality relationship.
    pub fn as_one(&self) -> Option<&Node> {
        match self {
            RelationshipResult::One(node) => node.as_ref(),
            RelationshipResult::Many(_) => None,
        }
    }

    /// The page of a many-cardinality relationship.
    pub fn as_many(&self) -> Option<&QueryResult> {
        match self {
            RelationshipResult::One(_) => None,
            RelationshipResult::Many(page) => Some(page),
        }
    }
}

/// A typed node with the relationship results requested for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    /// Concrete entity type.
    #[serde(rename = "__typename")]
    pub type_name: String,
    #[serde(serialize_with = "properties_as_json")]
    pub properties: BTreeMap<String, Value>,
    /// Relationship results by result key.
    pub relationships: BTreeMap<String, Arc<RelationshipResult>>,
    #[serde(skip)]
    cache: Arc<RelationshipCache>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        properties: BTreeMap<String, Value>,
        cache: Arc<RelationshipCache>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            properties,
            relationships: BTreeMap::new(),
            cache,
        }
    }

    /// Get a property value; absent properties read as null.
    pub fn property(&self, name: &str) -> &Value {
        self.properties.get(name).unwrap_or(&NULL)
    }

    /// Get the relationship result stored under a result key.
    pub fn relationship(&self, result_key: &str) -> Option<&RelationshipResult> {
        self.relationships.get(result_key).map(Arc::as_ref)
    }

    /// Relationship results memoized for this node identity.
    pub fn cache(&self) -> &Arc<RelationshipCache> {
        &self.cache
    }
}

fn properties_as_json<S: Serializer>(
    properties: &BTreeMap<String, Value>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(properties.iter().map(|(k, v)| (k, v.to_json())))
}
