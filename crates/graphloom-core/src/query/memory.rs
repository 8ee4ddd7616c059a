//! In-memory graph store.
//!
//! Evaluates compiled statements directly against a labelled property graph
//! held in memory. Used for tests and embedding. Evaluation follows the
//! rendered Cypher: conditions are three-valued (a comparison involving null
//! is unknown, and only rows whose condition is true are kept) and nulls sort
//! after every other value.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use graphloom_proto::Value;
use parking_lot::RwLock;
use regex::Regex;
use tracing::trace;

use super::compiler::{MatchBlock, Source, Statement};
use super::condition::{CompareOp, Condition, Exists, Operand, TextOp};
use super::filter::Quantifier;
use super::order::SortDirection;
use super::store::{GraphStore, RawNode, RawResult, RawRow};
use crate::catalog::{Direction, EntityType, ID_PROPERTY};
use crate::error::Error;

#[derive(Debug, Clone)]
struct StoredNode {
    labels: BTreeSet<String>,
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct Edge {
    from: String,
    label: String,
    to: String,
}

#[derive(Debug, Default)]
struct GraphData {
    nodes: BTreeMap<String, StoredNode>,
    edges: Vec<Edge>,
}

/// A labelled property graph held in memory.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    data: RwLock<GraphData>,
    statements_executed: AtomicU64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a node. The identifier is also stored as the `id` property.
    pub fn add_node(
        &self,
        id: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
        properties: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) {
        let id = id.into();
        let mut properties: BTreeMap<String, Value> =
            properties.into_iter().map(|(k, v)| (k.into(), v)).collect();
        properties.insert(ID_PROPERTY.to_string(), Value::String(id.clone()));
        let node = StoredNode {
            labels: labels.into_iter().map(Into::into).collect(),
            properties,
        };
        self.data.write().nodes.insert(id, node);
    }

    /// Add a node of an entity type, labelled with the type and its supertypes.
    ///
    /// Every property must be declared on the type and hold a value of its
    /// declared type. Null is only accepted for nullable properties.
    pub fn insert(
        &self,
        entity: &EntityType,
        id: impl Into<String>,
        properties: impl IntoIterator<Item = (impl Into<String>, Value)>,
    ) -> Result<(), Error> {
        let mut checked = Vec::new();
        for (name, value) in properties {
            let name = name.into();
            let def = entity.property(&name).ok_or_else(|| {
                Error::StoreExecution(format!("'{}' is not a property of '{}'", name, entity.name))
            })?;
            if !def.property_type.accepts(&value) || (value.is_null() && !def.nullable) {
                return Err(Error::StoreExecution(format!(
                    "{:?} is not a valid value for '{}.{}'",
                    value, entity.name, name
                )));
            }
            checked.push((name, value));
        }
        self.add_node(id, entity.labels(), checked);
        Ok(())
    }

    /// Add a directed relationship between two existing nodes.
    pub fn add_edge(
        &self,
        from: impl Into<String>,
        label: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<(), Error> {
        let (from, to) = (from.into(), to.into());
        let mut data = self.data.write();
        for id in [&from, &to] {
            if !data.nodes.contains_key(id) {
                return Err(Error::StoreExecution(format!("no node with id '{}'", id)));
            }
        }
        data.edges.push(Edge {
            from,
            label: label.into(),
            to,
        });
        Ok(())
    }

    /// Number of statements executed so far.
    pub fn statements_executed(&self) -> u64 {
        self.statements_executed.load(Ordering::Relaxed)
    }

    fn run(&self, statement: &Statement) -> Result<RawResult, Error> {
        let data = self.data.read();
        let evaluator = Evaluator {
            data: &data,
            params: &statement.params,
        };
        evaluator.block(&statement.root, &mut Vec::new())
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn execute(&self, statement: &Statement) -> Result<RawResult, Error> {
        self.statements_executed.fetch_add(1, Ordering::Relaxed);
        self.run(statement)
    }
}

/// Variable bindings of the rows being evaluated, innermost last.
type Scope = Vec<(String, String)>;

struct Evaluator<'a> {
    data: &'a GraphData,
    params: &'a BTreeMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    fn block(&self, block: &MatchBlock, scope: &mut Scope) -> Result<RawResult, Error> {
        let mut matched = Vec::new();
        for id in self.candidates(block, scope)? {
            if self.holds_for(&block.var, &id, &block.condition, scope)? {
                matched.push(id);
            }
        }
        let total_count = block.count.then_some(matched.len() as u64);

        let mut keyed = Vec::with_capacity(matched.len());
        for id in matched {
            if !self.holds_for(&block.var, &id, &block.seek, scope)? {
                continue;
            }
            scope.push((block.var.clone(), id.clone()));
            let keys = block
                .order
                .iter()
                .map(|term| self.operand(&term.operand, scope))
                .collect::<Result<Vec<_>, _>>();
            scope.pop();
            keyed.push((id, keys?));
        }

        keyed.sort_by(|(_, left), (_, right)| {
            for ((term, l), r) in block.order.iter().zip(left).zip(right) {
                let ordering = match block.effective_direction(term) {
                    SortDirection::Asc => l.total_cmp(r),
                    SortDirection::Desc => r.total_cmp(l),
                };
                if ordering != CmpOrdering::Equal {
                    return ordering;
                }
            }
            CmpOrdering::Equal
        });
        if let Some(limit) = block.limit {
            keyed.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        if block.reversed {
            keyed.reverse();
        }

        let mut rows = Vec::with_capacity(keyed.len());
        for (id, values) in keyed {
            let node = self.node(&id)?;
            let mut children = BTreeMap::new();
            scope.push((block.var.clone(), id.clone()));
            for child in &block.children {
                if child.applies_to(node.labels.iter()) {
                    let result = self.block(child, scope);
                    match result {
                        Ok(result) => {
                            children.insert(child.var.clone(), result);
                        }
                        Err(e) => {
                            scope.pop();
                            return Err(e);
                        }
                    }
                }
            }
            scope.pop();

            let keys = block
                .order
                .iter()
                .map(|term| term.name.clone())
                .zip(values)
                .collect();
            rows.push(RawRow {
                node: RawNode {
                    id: id.clone(),
                    labels: node.labels.clone(),
                    properties: node.properties.clone(),
                },
                keys,
                children,
            });
        }

        trace!(var = %block.var, rows = rows.len(), "evaluated block");
        Ok(RawResult { total_count, rows })
    }

    fn candidates(&self, block: &MatchBlock, scope: &Scope) -> Result<BTreeSet<String>, Error> {
        let ids: BTreeSet<String> = match &block.source {
            Source::All => self
                .data
                .nodes
                .iter()
                .filter(|(_, node)| node.labels.contains(&block.label))
                .map(|(id, _)| id.clone())
                .collect(),
            Source::Anchored {
                parent_label,
                parent_param,
                label,
                direction,
            } => {
                let parent = match self.param(parent_param)? {
                    Value::String(id) => id.clone(),
                    other => {
                        return Err(Error::StoreExecution(format!(
                            "parent identifier must be a string, got {:?}",
                            other
                        )))
                    }
                };
                match self.data.nodes.get(&parent) {
                    Some(node) if node.labels.contains(parent_label) => {
                        self.neighbours(&parent, label, *direction, &block.label)
                    }
                    _ => BTreeSet::new(),
                }
            }
            Source::Traversal {
                from,
                label,
                direction,
            } => {
                let from = lookup(scope, from)?;
                self.neighbours(from, label, *direction, &block.label)
            }
        };
        Ok(ids)
    }

    fn neighbours(
        &self,
        from: &str,
        label: &str,
        direction: Direction,
        target_label: &str,
    ) -> BTreeSet<String> {
        self.data
            .edges
            .iter()
            .filter(|edge| edge.label == label)
            .filter_map(|edge| match direction {
                Direction::Outgoing if edge.from == from => Some(&edge.to),
                Direction::Incoming if edge.to == from => Some(&edge.from),
                _ => None,
            })
            .filter(|id| {
                self.data
                    .nodes
                    .get(*id)
                    .is_some_and(|node| node.labels.contains(target_label))
            })
            .cloned()
            .collect()
    }

    fn node(&self, id: &str) -> Result<&'a StoredNode, Error> {
        self.data
            .nodes
            .get(id)
            .ok_or_else(|| Error::StoreExecution(format!("no node with id '{}'", id)))
    }

    fn param(&self, name: &str) -> Result<&'a Value, Error> {
        self.params
            .get(name)
            .ok_or_else(|| Error::StoreExecution(format!("unbound parameter ${}", name)))
    }

    fn holds_for(
        &self,
        var: &str,
        id: &str,
        condition: &Condition,
        scope: &mut Scope,
    ) -> Result<bool, Error> {
        Ok(self.truth_for(var, id, condition, scope)? == Some(true))
    }

    fn truth_for(
        &self,
        var: &str,
        id: &str,
        condition: &Condition,
        scope: &mut Scope,
    ) -> Result<Option<bool>, Error> {
        if *condition == Condition::True {
            return Ok(Some(true));
        }
        scope.push((var.to_string(), id.to_string()));
        let result = self.truth(condition, scope);
        scope.pop();
        result
    }

    /// Evaluate a condition; `None` is unknown.
    fn truth(&self, condition: &Condition, scope: &mut Scope) -> Result<Option<bool>, Error> {
        match condition {
            Condition::True => Ok(Some(true)),
            Condition::False => Ok(Some(false)),
            Condition::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match self.truth(child, scope)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                Ok(result)
            }
            Condition::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match self.truth(child, scope)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(result)
            }
            Condition::Not(inner) => Ok(self.truth(inner, scope)?.map(|b| !b)),
            Condition::Compare { operand, op, param } => {
                let value = self.operand(operand, scope)?;
                let Some(ordering) = compare(&value, self.param(param)?, *op) else {
                    return Ok(None);
                };
                Ok(Some(match op {
                    CompareOp::Eq => ordering == CmpOrdering::Equal,
                    CompareOp::Lt => ordering == CmpOrdering::Less,
                    CompareOp::Lte => ordering != CmpOrdering::Greater,
                    CompareOp::Gt => ordering == CmpOrdering::Greater,
                    CompareOp::Gte => ordering != CmpOrdering::Less,
                }))
            }
            Condition::In { operand, params } => {
                let value = self.operand(operand, scope)?;
                let mut result = Some(false);
                for param in params {
                    match compare(&value, self.param(param)?, CompareOp::Eq) {
                        Some(CmpOrdering::Equal) => return Ok(Some(true)),
                        None => result = None,
                        Some(_) => {}
                    }
                }
                Ok(result)
            }
            Condition::IsNull(operand) => Ok(Some(self.operand(operand, scope)?.is_null())),
            Condition::Text { operand, op, param } => {
                let value = self.operand(operand, scope)?;
                let (Some(text), Some(pattern)) = (value.as_str(), self.param(param)?.as_str()) else {
                    return Ok(None);
                };
                let matched = match op {
                    TextOp::StartsWith => text.starts_with(pattern),
                    TextOp::EndsWith => text.ends_with(pattern),
                    TextOp::Contains => text.contains(pattern),
                    TextOp::Matches => {
                        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                            Error::StoreExecution(format!("invalid pattern '{}': {}", pattern, e))
                        })?;
                        regex.is_match(text)
                    }
                };
                Ok(Some(matched))
            }
            Condition::Exists(exists) => self.exists(exists, scope).map(Some),
        }
    }

    /// `any` and `none` look for a related node whose condition is true,
    /// `all` for one whose condition is false.
    fn exists(&self, exists: &Exists, scope: &mut Scope) -> Result<bool, Error> {
        let from = lookup(scope, &exists.from)?.to_string();
        let related = self.neighbours(&from, &exists.label, exists.direction, &exists.target_label);

        let mut any_true = false;
        let mut any_false = false;
        for id in related {
            match self.truth_for(&exists.to, &id, &exists.condition, scope)? {
                Some(true) => any_true = true,
                Some(false) => any_false = true,
                None => {}
            }
        }
        Ok(match exists.quantifier {
            Quantifier::Any => any_true,
            Quantifier::None => !any_true,
            Quantifier::All => !any_false,
        })
    }

    fn operand(&self, operand: &Operand, scope: &Scope) -> Result<Value, Error> {
        match operand {
            Operand::Property { var, name } => {
                let node = self.node(lookup(scope, var)?)?;
                Ok(node.properties.get(name).cloned().unwrap_or(Value::Null))
            }
            Operand::Related {
                var,
                label,
                direction,
                target_label,
                name,
            } => {
                let from = lookup(scope, var)?;
                let first = self.neighbours(from, label, *direction, target_label).into_iter().next();
                match first {
                    Some(id) => Ok(self
                        .node(&id)?
                        .properties
                        .get(name)
                        .cloned()
                        .unwrap_or(Value::Null)),
                    None => Ok(Value::Null),
                }
            }
        }
    }
}

/// Compare two values, or `None` when the comparison is unknown: either side
/// is null, or an ordering is asked of values that have none. Equality of
/// values of different kinds is false.
fn compare(left: &Value, right: &Value, op: CompareOp) -> Option<CmpOrdering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    let comparable = match (left, right) {
        (Value::Int64(_) | Value::Float64(_), Value::Int64(_) | Value::Float64(_)) => true,
        (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_))
        | (Value::Timestamp(_), Value::Timestamp(_)) => true,
        _ => op == CompareOp::Eq,
    };
    comparable.then(|| left.total_cmp(right))
}

fn lookup<'s>(scope: &'s Scope, var: &str) -> Result<&'s str, Error> {
    scope
        .iter()
        .rev()
        .find(|(name, _)| name == var)
        .map(|(_, id)| id.as_str())
        .ok_or_else(|| Error::StoreExecution(format!("unbound variable '{}'", var)))
}
