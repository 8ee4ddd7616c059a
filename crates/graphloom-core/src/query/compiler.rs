//! Plan compilation into a single statement.
//!
//! Each [`NodeQuery`] becomes one [`MatchBlock`] with its own unique variable.
//! Nested sub-queries become child blocks correlated with the parent row, so
//! the whole plan tree runs as one statement.

use std::collections::BTreeMap;

use graphloom_proto::Value;
use tracing::debug;

use super::condition::{pattern, Bindings, Condition, Operand};
use super::cursor::{seek_condition, Cursor};
use super::order::{OrderPath, SortDirection};
use super::planner::{NodeQuery, SubQuery};
use crate::catalog::{Direction, EntityType, RelationshipDef, Schema};
use crate::error::Error;

/// Where the nodes of a block come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Every node carrying the block label.
    All,
    /// Nodes related to one parent node identified by a parameter.
    Anchored {
        parent_label: String,
        parent_param: String,
        label: String,
        direction: Direction,
    },
    /// Nodes related to the current row of the enclosing block.
    Traversal {
        from: String,
        label: String,
        direction: Direction,
    },
}

/// One sort term of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    /// Order key name, echoed back in the row keys for cursors.
    pub name: String,
    pub operand: Operand,
    pub direction: SortDirection,
}

/// One level of a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchBlock {
    /// Variable bound to the nodes of this block.
    pub var: String,
    /// Node label (the entity type name).
    pub label: String,
    pub source: Source,
    /// Result key of the plan part this block was compiled from (empty at the root).
    pub result_key: String,
    /// Index of the sub-query within its part.
    pub sub_query: usize,
    /// Parent labels the block applies to; `None` for every parent.
    pub only_on_types: Option<Vec<String>>,
    /// Filter and authorization condition.
    pub condition: Condition,
    /// Count the filtered nodes before paging.
    pub count: bool,
    /// Keyset boundary from `after`/`before`.
    pub seek: Condition,
    /// Sort terms as requested; `reversed` flips them for execution.
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    /// Sort backwards, limit, then restore the requested order (`last`).
    pub reversed: bool,
    pub children: Vec<MatchBlock>,
}

impl MatchBlock {
    /// Find the child block compiled for a sub-query.
    pub fn child(&self, result_key: &str, sub_query: usize) -> Option<&MatchBlock> {
        self.children
            .iter()
            .find(|c| c.result_key == result_key && c.sub_query == sub_query)
    }

    /// Whether the block applies below a parent with these labels.
    pub fn applies_to<'a>(&self, mut labels: impl Iterator<Item = &'a String>) -> bool {
        match &self.only_on_types {
            None => true,
            Some(types) => labels.any(|label| types.contains(label)),
        }
    }

    /// Sort direction of a term as executed.
    pub fn effective_direction(&self, term: &OrderTerm) -> SortDirection {
        if self.reversed {
            term.direction.reverse()
        } else {
            term.direction
        }
    }
}

/// A compiled, store-neutral statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub root: MatchBlock,
    /// Named parameter values referenced by conditions.
    pub params: BTreeMap<String, Value>,
}

/// Compiles plan trees against a schema.
pub struct Compiler<'a> {
    schema: &'a Schema,
    bindings: Bindings,
}

impl<'a> Compiler<'a> {
    /// Compile a plan tree into one statement.
    pub fn compile(schema: &'a Schema, query: &NodeQuery) -> Result<Statement, Error> {
        let mut compiler = Compiler {
            schema,
            bindings: Bindings::new(),
        };

        let source = match &query.anchor {
            None => Source::All,
            Some(anchor) => {
                let parent = compiler.bound_entity(&anchor.parent_type)?;
                require_relationship(parent, &anchor.relationship)?;
                Source::Anchored {
                    parent_label: anchor.parent_type.clone(),
                    parent_param: compiler.bindings.param(anchor.parent_id.clone()),
                    label: anchor.relationship.label.clone(),
                    direction: anchor.relationship.direction,
                }
            }
        };

        let root = compiler.compile_block(query, source, String::new(), 0, None)?;
        let statement = Statement {
            root,
            params: compiler.bindings.into_params(),
        };
        debug!(
            entity = %query.entity_type,
            params = statement.params.len(),
            "compiled statement"
        );
        Ok(statement)
    }

    fn bound_entity(&self, name: &str) -> Result<&'a EntityType, Error> {
        self.schema
            .get(name)
            .map(|entity| entity.as_ref())
            .ok_or_else(|| Error::PlanCompilation(format!("plan references unknown type '{}'", name)))
    }

    fn compile_block(
        &mut self,
        query: &NodeQuery,
        source: Source,
        result_key: String,
        sub_query: usize,
        only_on_types: Option<Vec<String>>,
    ) -> Result<MatchBlock, Error> {
        let entity = self.bound_entity(&query.entity_type)?;
        let var = self.bindings.fresh_var();
        let condition = self.bindings.lower_filter(&query.condition, &var);

        let order_keys = query.options.order().keys();
        let mut order = Vec::with_capacity(order_keys.len());
        for key in order_keys {
            let operand = match &key.path {
                OrderPath::Property(name) => Operand::property(var.as_str(), name.as_str()),
                OrderPath::Related {
                    relationship,
                    property,
                } => {
                    require_relationship(entity, relationship)?;
                    related_operand(&var, relationship, property)
                }
            };
            order.push(OrderTerm {
                name: key.name.clone(),
                operand,
                direction: key.direction,
            });
        }

        let operand_of = |name: &str| -> Operand {
            order
                .iter()
                .find(|term| term.name == name)
                .map(|term| term.operand.clone())
                .unwrap_or_else(|| Operand::property(var.as_str(), name))
        };
        let mut seek = Vec::new();
        if let Some(after) = query.options.after() {
            let values = Cursor::decode(query.options.order(), after)?;
            seek.push(seek_condition(
                query.options.order(),
                &values,
                true,
                &mut self.bindings,
                |key| operand_of(&key.name),
            ));
        }
        if let Some(before) = query.options.before() {
            let values = Cursor::decode(query.options.order(), before)?;
            seek.push(seek_condition(
                query.options.order(),
                &values,
                false,
                &mut self.bindings,
                |key| operand_of(&key.name),
            ));
        }
        let seek = Condition::and(seek);

        let mut children = Vec::new();
        for (key, part) in &query.parts {
            for (index, sub) in part.sub_queries.iter().enumerate() {
                self.check_sub_query(entity, sub)?;
                let child_source = Source::Traversal {
                    from: var.clone(),
                    label: sub.relationship.label.clone(),
                    direction: sub.relationship.direction,
                };
                let only = sub
                    .only_on_types
                    .as_ref()
                    .map(|types| types.iter().cloned().collect());
                children.push(self.compile_block(&sub.query, child_source, key.clone(), index, only)?);
            }
        }

        Ok(MatchBlock {
            var,
            label: entity.name.clone(),
            source,
            result_key,
            sub_query,
            only_on_types,
            condition,
            count: query.options.fetch_total_count(),
            seek,
            order,
            limit: query.limit,
            reversed: query.options.last().is_some(),
            children,
        })
    }

    /// The relationship must exist on the bound type or, for polymorphic
    /// sub-queries, on every type the sub-query is restricted to.
    fn check_sub_query(&self, entity: &EntityType, sub: &SubQuery) -> Result<(), Error> {
        match &sub.only_on_types {
            None => require_relationship(entity, &sub.relationship),
            Some(types) => {
                for type_name in types {
                    let scope = self.bound_entity(type_name)?;
                    if !scope.is_subtype_of(&entity.name) {
                        return Err(Error::PlanCompilation(format!(
                            "'{}' is not a subtype of '{}'",
                            scope.name, entity.name
                        )));
                    }
                    require_relationship(scope, &sub.relationship)?;
                }
                Ok(())
            }
        }
    }
}

fn require_relationship(entity: &EntityType, relationship: &RelationshipDef) -> Result<(), Error> {
    match entity.relationship(&relationship.name) {
        Some(found) if found.label == relationship.label && found.direction == relationship.direction => {
            Ok(())
        }
        _ => Err(Error::PlanCompilation(format!(
            "'{}' is not a relationship of '{}'",
            relationship.qualified_name(),
            entity.name
        ))),
    }
}

fn related_operand(var: &str, relationship: &RelationshipDef, property: &str) -> Operand {
    Operand::Related {
        var: var.to_string(),
        label: relationship.label.clone(),
        direction: relationship.direction,
        target_label: relationship.target.clone(),
        name: property.to_string(),
    }
}

impl Statement {
    /// Render the statement as one Cypher query.
    ///
    /// Every block counts in its own correlated sub-query, then pages in a
    /// second one that aggregates its rows (children included) into a list,
    /// so each block contributes exactly one row to its parent. The query
    /// returns one `result` map `{total, rows: [{node, keys, children}]}`.
    pub fn to_cypher(&self) -> String {
        let mut writer = CypherWriter::default();
        writer.block_body(&self.root, None, 0);
        writer.line(0, &format!("RETURN {} AS result", result_map(&self.root)));
        writer.finish()
    }
}

#[derive(Default)]
struct CypherWriter {
    lines: Vec<String>,
}

impl CypherWriter {
    fn line(&mut self, indent: usize, text: &str) {
        self.lines.push(format!("{}{}", "  ".repeat(indent), text));
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }

    fn block_body(&mut self, block: &MatchBlock, parent: Option<&str>, indent: usize) {
        let matched = match_clause(block);
        let mut filters = Vec::new();
        if let (Some(parent), Some(types)) = (parent, &block.only_on_types) {
            let guards: Vec<String> = types.iter().map(|t| format!("{}:{}", parent, t)).collect();
            filters.push(format!("({})", guards.join(" OR ")));
        }
        if block.condition != Condition::True {
            filters.push(block.condition.to_cypher());
        }

        if block.count {
            self.line(indent, "CALL {");
            if let Some(parent) = parent {
                self.line(indent + 1, &format!("WITH {}", parent));
            }
            self.line(indent + 1, &matched);
            if !filters.is_empty() {
                self.line(indent + 1, &format!("WHERE {}", filters.join(" AND ")));
            }
            self.line(indent + 1, &format!("RETURN count({}) AS {}_total", block.var, block.var));
            self.line(indent, "}");
        }

        if block.seek != Condition::True {
            filters.push(block.seek.to_cypher());
        }

        self.line(indent, "CALL {");
        if let Some(parent) = parent {
            self.line(indent + 1, &format!("WITH {}", parent));
        }
        self.line(indent + 1, &matched);
        if !filters.is_empty() {
            self.line(indent + 1, &format!("WHERE {}", filters.join(" AND ")));
        }

        let key_vars: Vec<String> = (0..block.order.len())
            .map(|i| format!("{}_k{}", block.var, i))
            .collect();
        let projections: Vec<String> = block
            .order
            .iter()
            .zip(&key_vars)
            .map(|(term, key_var)| format!("{} AS {}", term.operand.to_cypher(), key_var))
            .collect();
        let mut with = format!("WITH {}", block.var);
        if !projections.is_empty() {
            with.push_str(", ");
            with.push_str(&projections.join(", "));
        }
        self.line(indent + 1, &with);

        if !block.order.is_empty() {
            let sorts: Vec<String> = block
                .order
                .iter()
                .zip(&key_vars)
                .map(|(term, key_var)| {
                    let direction = match block.effective_direction(term) {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {}", key_var, direction)
                })
                .collect();
            self.line(indent + 1, &format!("ORDER BY {}", sorts.join(", ")));
        }
        if let Some(limit) = block.limit {
            self.line(indent + 1, &format!("LIMIT {}", limit));
        }

        for child in &block.children {
            self.line(indent + 1, "CALL {");
            self.line(indent + 2, &format!("WITH {}", block.var));
            self.block_body(child, Some(&block.var), indent + 2);
            self.line(
                indent + 2,
                &format!("RETURN {} AS {}_result", result_map(child), child.var),
            );
            self.line(indent + 1, "}");
        }

        let keys: Vec<String> = block
            .order
            .iter()
            .zip(&key_vars)
            .map(|(term, key_var)| format!("{}: {}", map_key(&term.name), key_var))
            .collect();
        let children: Vec<String> = block
            .children
            .iter()
            .map(|child| format!("{}: {}_result", child.var, child.var))
            .collect();
        self.line(
            indent + 1,
            &format!(
                "RETURN collect({{node: {}, keys: {{{}}}, children: {{{}}}}}) AS {}_rows",
                block.var,
                keys.join(", "),
                children.join(", "),
                block.var
            ),
        );
        self.line(indent, "}");
    }
}

fn match_clause(block: &MatchBlock) -> String {
    match &block.source {
        Source::All => format!("MATCH ({}:{})", block.var, block.label),
        Source::Anchored {
            parent_label,
            parent_param,
            label,
            direction,
        } => {
            let parent = format!("_parent:{} {{id: ${}}}", parent_label, parent_param);
            format!(
                "MATCH {}",
                pattern(&parent, label, *direction, &block.var, &block.label)
            )
        }
        Source::Traversal {
            from,
            label,
            direction,
        } => format!(
            "MATCH {}",
            pattern(from, label, *direction, &block.var, &block.label)
        ),
    }
}

fn result_map(block: &MatchBlock) -> String {
    let total = if block.count {
        format!("{}_total", block.var)
    } else {
        "null".to_string()
    };
    let rows = if block.reversed {
        format!("reverse({}_rows)", block.var)
    } else {
        format!("{}_rows", block.var)
    };
    format!("{{total: {}, rows: {}}}", total, rows)
}

fn map_key(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("`{}`", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PropertyDef, PropertyType};
    use crate::query::{FilterExpr, Order, OrderKey, PlanBudget, Planner, QueryOptions};
    use crate::security::AuthorizationConditionBuilder;
    use graphloom_proto::SelectionField;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder()
            .with_entity(
                EntityType::new("Folder")
                    .with_property(PropertyDef::new("name", PropertyType::String))
                    .with_relationship(
                        RelationshipDef::many("children", "Folder", "CHILD", Direction::Outgoing)
                            .with_inverse("parent"),
                    )
                    .with_relationship(
                        RelationshipDef::one("parent", "Folder", "CHILD", Direction::Incoming)
                            .with_inverse("children"),
                    ),
            )
            .build()
            .unwrap()
    }

    fn plan(selection: &[SelectionField], options: QueryOptions) -> NodeQuery {
        let schema = schema();
        let authorization = AuthorizationConditionBuilder::default();
        Planner::new(&schema, &authorization, PlanBudget::default())
            .plan("Folder", selection, options, None)
            .unwrap()
    }

    #[test]
    fn test_render_root_block() {
        let schema = schema();
        let statement = Compiler::compile(&schema, &plan(&[], QueryOptions::default())).unwrap();

        let expected = "\
CALL {
  MATCH (n0:Folder)
  WITH n0, n0.id AS n0_k0
  ORDER BY n0_k0 ASC
  RETURN collect({node: n0, keys: {id: n0_k0}, children: {}}) AS n0_rows
}
RETURN {total: null, rows: n0_rows} AS result";
        assert_eq!(statement.to_cypher(), expected);
    }

    #[test]
    fn test_render_nested_block() {
        let schema = schema();
        let children = SelectionField::new("children")
            .with_argument("filter", json!({"name": {"startsWith": "x"}}))
            .with_argument("orderBy", json!({"field": "name"}))
            .with_argument("last", json!(2))
            .select(SelectionField::new("totalCount"));
        let options = QueryOptions::builder()
            .filter(FilterExpr::property(
                "id",
                crate::query::PropertyOperator::Eq(Value::from("a1")),
            ))
            .build()
            .unwrap();
        let statement = Compiler::compile(&schema, &plan(&[children], options)).unwrap();

        let expected = "\
CALL {
  MATCH (n0:Folder)
  WHERE n0.id = $p0
  WITH n0, n0.id AS n0_k0
  ORDER BY n0_k0 ASC
  CALL {
    WITH n0
    CALL {
      WITH n0
      MATCH (n0)-[:CHILD]->(n1:Folder)
      WHERE n1.name STARTS WITH $p1
      RETURN count(n1) AS n1_total
    }
    CALL {
      WITH n0
      MATCH (n0)-[:CHILD]->(n1:Folder)
      WHERE n1.name STARTS WITH $p1
      WITH n1, n1.name AS n1_k0, n1.id AS n1_k1
      ORDER BY n1_k0 DESC, n1_k1 DESC
      LIMIT 3
      RETURN collect({node: n1, keys: {name: n1_k0, id: n1_k1}, children: {}}) AS n1_rows
    }
    RETURN {total: n1_total, rows: reverse(n1_rows)} AS n1_result
  }
  RETURN collect({node: n0, keys: {id: n0_k0}, children: {n1: n1_result}}) AS n0_rows
}
RETURN {total: null, rows: n0_rows} AS result";
        assert_eq!(statement.to_cypher(), expected);
        assert_eq!(statement.params.len(), 2);
        assert!(statement.root.children[0].reversed);
    }

    #[test]
    fn test_seek_condition_compiled() {
        let schema = schema();
        let order = Order::new(vec![OrderKey::property("name", SortDirection::Asc)]);
        let cursor = Cursor::encode(
            &order,
            &BTreeMap::from([
                ("name".to_string(), Value::from("xb")),
                ("id".to_string(), Value::from("c2")),
            ]),
        )
        .unwrap();
        let options = QueryOptions::builder()
            .order(order)
            .after(cursor)
            .first(2)
            .build()
            .unwrap();
        let statement = Compiler::compile(&schema, &plan(&[], options)).unwrap();

        assert_eq!(statement.root.limit, Some(3));
        assert_eq!(
            statement.root.seek.to_cypher(),
            "(n0.name > $p1 OR (n0.name = $p1 AND n0.id > $p0))"
        );
    }

    #[test]
    fn test_cursor_from_other_order_fails() {
        let schema = schema();
        let cursor = Cursor::encode(&Order::default(), &BTreeMap::new()).unwrap();
        let options = QueryOptions::builder()
            .order(Order::new(vec![OrderKey::property("name", SortDirection::Desc)]))
            .before(cursor)
            .build()
            .unwrap();
        let result = Compiler::compile(&schema, &plan(&[], options));
        assert!(matches!(result, Err(Error::InvalidCursor(_))));
    }

    #[test]
    fn test_relationship_absent_from_bound_type() {
        let schema = schema();
        let mut query = plan(&[SelectionField::new("children")], QueryOptions::default());
        let part = query.parts.get_mut("children").unwrap();
        part.sub_queries[0].relationship =
            RelationshipDef::many("siblings", "Folder", "SIBLING", Direction::Outgoing);

        let result = Compiler::compile(&schema, &query);
        assert!(matches!(result, Err(Error::PlanCompilation(_))));
    }

    #[test]
    fn test_variables_are_unique() {
        let schema = schema();
        let selection = [
            SelectionField::new("children").select(SelectionField::new("children")),
            SelectionField::new("parent"),
        ];
        let statement = Compiler::compile(&schema, &plan(&selection, QueryOptions::default())).unwrap();

        let mut vars = Vec::new();
        fn collect(block: &MatchBlock, vars: &mut Vec<String>) {
            vars.push(block.var.clone());
            for child in &block.children {
                collect(child, vars);
            }
        }
        collect(&statement.root, &mut vars);
        let unique: std::collections::BTreeSet<_> = vars.iter().collect();
        assert_eq!(unique.len(), vars.len());
        assert_eq!(vars.len(), 4);
    }
}
