//! Store-neutral condition trees.
//!
//! Filters, authorization and cursor boundaries are all lowered into
//! [`Condition`]s bound to statement variables. Literal values never appear
//! inline; they live in the statement's parameter table.

use std::collections::BTreeMap;

use graphloom_proto::Value;
use serde::Serialize;

use super::filter::{FilterExpr, PropertyOperator, Quantifier};
use crate::catalog::Direction;

/// A value read from a bound node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    /// `var.name`.
    Property { var: String, name: String },
    /// `name` of the first node reached from `var` through one relationship.
    Related {
        var: String,
        label: String,
        direction: Direction,
        target_label: String,
        name: String,
    },
}

impl Operand {
    /// Property of a bound variable.
    pub fn property(var: impl Into<String>, name: impl Into<String>) -> Self {
        Operand::Property {
            var: var.into(),
            name: name.into(),
        }
    }

    /// Render as a Cypher expression.
    pub fn to_cypher(&self) -> String {
        match self {
            Operand::Property { var, name } => format!("{}.{}", var, name),
            Operand::Related {
                var,
                label,
                direction,
                target_label,
                name,
            } => format!(
                "head([{} | _r.{}])",
                pattern(var, label, *direction, "_r", target_label),
                name
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextOp {
    StartsWith,
    EndsWith,
    Contains,
    /// Full-string regular expression match.
    Matches,
}

impl TextOp {
    fn keyword(self) -> &'static str {
        match self {
            TextOp::StartsWith => "STARTS WITH",
            TextOp::EndsWith => "ENDS WITH",
            TextOp::Contains => "CONTAINS",
            TextOp::Matches => "=~",
        }
    }
}

/// A correlated sub-pattern test: `(from)-[:label]-(to:target_label)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exists {
    pub from: String,
    pub label: String,
    pub direction: Direction,
    pub to: String,
    pub target_label: String,
    pub quantifier: Quantifier,
    /// Evaluated with `to` bound to each related node.
    pub condition: Condition,
}

/// A boolean condition over bound variables and named parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    True,
    False,
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        operand: Operand,
        op: CompareOp,
        param: String,
    },
    In {
        operand: Operand,
        params: Vec<String>,
    },
    IsNull(Operand),
    Text {
        operand: Operand,
        op: TextOp,
        param: String,
    },
    Exists(Box<Exists>),
}

impl Condition {
    /// Conjunction, folding constant members.
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut children = Vec::new();
        for condition in conditions {
            match condition {
                Condition::True => {}
                Condition::False => return Condition::False,
                Condition::And(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        match children.len() {
            0 => Condition::True,
            1 => children.remove(0),
            _ => Condition::And(children),
        }
    }

    /// Disjunction, folding constant members.
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut children = Vec::new();
        for condition in conditions {
            match condition {
                Condition::False => {}
                Condition::True => return Condition::True,
                Condition::Or(nested) => children.extend(nested),
                other => children.push(other),
            }
        }
        match children.len() {
            0 => Condition::False,
            1 => children.remove(0),
            _ => Condition::Or(children),
        }
    }

    /// Negation, folding constants and double negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        match condition {
            Condition::True => Condition::False,
            Condition::False => Condition::True,
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }

    /// Render as a Cypher boolean expression.
    pub fn to_cypher(&self) -> String {
        match self {
            Condition::True => "true".to_string(),
            Condition::False => "false".to_string(),
            Condition::And(children) => join(children, " AND "),
            Condition::Or(children) => join(children, " OR "),
            Condition::Not(inner) => format!("NOT {}", inner.to_cypher()),
            Condition::Compare { operand, op, param } => {
                format!("{} {} ${}", operand.to_cypher(), op.symbol(), param)
            }
            Condition::In { operand, params } => {
                let list: Vec<String> = params.iter().map(|p| format!("${}", p)).collect();
                format!("{} IN [{}]", operand.to_cypher(), list.join(", "))
            }
            Condition::IsNull(operand) => format!("{} IS NULL", operand.to_cypher()),
            Condition::Text { operand, op, param } => {
                format!("{} {} ${}", operand.to_cypher(), op.keyword(), param)
            }
            Condition::Exists(exists) => {
                let matched = pattern(
                    &exists.from,
                    &exists.label,
                    exists.direction,
                    &exists.to,
                    &exists.target_label,
                );
                let (prefix, condition) = match exists.quantifier {
                    Quantifier::Any => ("", exists.condition.clone()),
                    Quantifier::None => ("NOT ", exists.condition.clone()),
                    Quantifier::All => ("NOT ", Condition::not(exists.condition.clone())),
                };
                match condition {
                    Condition::True => format!("{}EXISTS {{ MATCH {} }}", prefix, matched),
                    condition => format!(
                        "{}EXISTS {{ MATCH {} WHERE {} }}",
                        prefix,
                        matched,
                        condition.to_cypher()
                    ),
                }
            }
        }
    }
}

fn join(children: &[Condition], separator: &str) -> String {
    let parts: Vec<String> = children.iter().map(Condition::to_cypher).collect();
    format!("({})", parts.join(separator))
}

/// Render a one-hop Cypher pattern.
pub(crate) fn pattern(
    from: &str,
    label: &str,
    direction: Direction,
    to: &str,
    to_label: &str,
) -> String {
    match direction {
        Direction::Outgoing => format!("({})-[:{}]->({}:{})", from, label, to, to_label),
        Direction::Incoming => format!("({})<-[:{}]-({}:{})", from, label, to, to_label),
    }
}

/// Variable and parameter allocation for one statement.
///
/// Variables are unique across the whole statement so sibling and nested
/// blocks never collide.
#[derive(Debug, Default)]
pub struct Bindings {
    next_var: usize,
    params: BTreeMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh variable name.
    pub fn fresh_var(&mut self) -> String {
        let var = format!("n{}", self.next_var);
        self.next_var += 1;
        var
    }

    /// Register a parameter value and return its name.
    pub fn param(&mut self, value: Value) -> String {
        let name = format!("p{}", self.params.len());
        self.params.insert(name.clone(), value);
        name
    }

    /// The collected parameter table.
    pub fn into_params(self) -> BTreeMap<String, Value> {
        self.params
    }

    /// Lower a filter into a condition on `var`.
    pub fn lower_filter(&mut self, filter: &FilterExpr, var: &str) -> Condition {
        match filter {
            FilterExpr::And(children) => {
                let lowered: Vec<Condition> =
                    children.iter().map(|c| self.lower_filter(c, var)).collect();
                Condition::and(lowered)
            }
            FilterExpr::Or(children) => {
                let lowered: Vec<Condition> =
                    children.iter().map(|c| self.lower_filter(c, var)).collect();
                Condition::or(lowered)
            }
            FilterExpr::Not(inner) => Condition::not(self.lower_filter(inner, var)),
            FilterExpr::Property { property, operator } => {
                self.lower_property(Operand::property(var, property.as_str()), operator)
            }
            FilterExpr::Relationship {
                relationship,
                quantifier,
                filter,
            } => {
                let to = self.fresh_var();
                let condition = self.lower_filter(filter, &to);
                Condition::Exists(Box::new(Exists {
                    from: var.to_string(),
                    label: relationship.label.clone(),
                    direction: relationship.direction,
                    to,
                    target_label: relationship.target.clone(),
                    quantifier: *quantifier,
                    condition,
                }))
            }
        }
    }

    fn lower_property(&mut self, operand: Operand, operator: &PropertyOperator) -> Condition {
        match operator {
            PropertyOperator::Eq(value) => self.compare(operand, CompareOp::Eq, value),
            PropertyOperator::In(values) => {
                if values.is_empty() {
                    return Condition::False;
                }
                let params = values.iter().map(|v| self.param(v.clone())).collect();
                Condition::In { operand, params }
            }
            PropertyOperator::Lt(value) => self.range(operand, CompareOp::Lt, value),
            PropertyOperator::Lte(value) => self.range(operand, CompareOp::Lte, value),
            PropertyOperator::Gt(value) => self.range(operand, CompareOp::Gt, value),
            PropertyOperator::Gte(value) => self.range(operand, CompareOp::Gte, value),
            PropertyOperator::StartsWith(text) => self.text(operand, TextOp::StartsWith, text),
            PropertyOperator::EndsWith(text) => self.text(operand, TextOp::EndsWith, text),
            PropertyOperator::Contains(text) => self.text(operand, TextOp::Contains, text),
            PropertyOperator::Matches(text) => self.text(operand, TextOp::Matches, text),
            PropertyOperator::IsNull(true) => Condition::IsNull(operand),
            PropertyOperator::IsNull(false) => Condition::not(Condition::IsNull(operand)),
        }
    }

    /// A comparison against a parameter.
    pub fn compare(&mut self, operand: Operand, op: CompareOp, value: &Value) -> Condition {
        let param = self.param(value.clone());
        Condition::Compare { operand, op, param }
    }

    // absent properties must never satisfy a range bound
    fn range(&mut self, operand: Operand, op: CompareOp, value: &Value) -> Condition {
        let guard = Condition::not(Condition::IsNull(operand.clone()));
        let compare = self.compare(operand, op, value);
        Condition::and([guard, compare])
    }

    fn text(&mut self, operand: Operand, op: TextOp, text: &str) -> Condition {
        let param = self.param(Value::String(text.to_string()));
        Condition::Text { operand, op, param }
    }
}
