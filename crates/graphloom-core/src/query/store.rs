//! Graph store interface.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use graphloom_proto::Value;

use super::compiler::Statement;
use crate::error::Error;

/// A node as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub id: String,
    pub labels: BTreeSet<String>,
    pub properties: BTreeMap<String, Value>,
}

/// One row of a block: the node, its observed order key values and the
/// results of the child blocks that applied to it, by child variable.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub node: RawNode,
    pub keys: BTreeMap<String, Value>,
    pub children: BTreeMap<String, RawResult>,
}

/// Result of one block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawResult {
    /// Number of nodes matching the block condition before paging, when requested.
    pub total_count: Option<u64>,
    /// Rows in the requested order, at most `limit` of them.
    pub rows: Vec<RawRow>,
}

/// A backing store able to run compiled statements.
///
/// Failures are reported as [`Error::StoreExecution`] and are not retried by
/// the engine.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute a statement as one atomic read.
    async fn execute(&self, statement: &Statement) -> Result<RawResult, Error>;
}
