//! Maps raw store results back to typed nodes and pages.

use std::collections::BTreeMap;

use tracing::trace;

use super::cache::{CacheKey, RequestCache};
use super::compiler::MatchBlock;
use super::cursor::Cursor;
use super::planner::NodeQuery;
use super::result::{Node, PageInfo, QueryResult, RelationshipResult, ResultItem};
use super::store::{RawResult, RawRow};
use crate::catalog::{Cardinality, Schema};
use crate::error::Error;

/// Assembles the results of one statement.
///
/// Every assembled node gets the relationship cache of its identity from the
/// request cache, and every planned relationship result is registered there
/// so later ad hoc loads with the same options reuse it.
pub struct Assembler<'a> {
    schema: &'a Schema,
    cache: &'a RequestCache,
}

impl<'a> Assembler<'a> {
    pub fn new(schema: &'a Schema, cache: &'a RequestCache) -> Self {
        Self { schema, cache }
    }

    /// Assemble the result of a plan node according to its cardinality.
    pub fn assemble(
        &self,
        query: &NodeQuery,
        block: &MatchBlock,
        raw: RawResult,
    ) -> Result<RelationshipResult, Error> {
        match query.cardinality {
            Cardinality::One => {
                let node = match raw.rows.into_iter().next() {
                    Some(row) => Some(self.node(query, block, row)?),
                    None => None,
                };
                Ok(RelationshipResult::One(node))
            }
            Cardinality::Many => Ok(RelationshipResult::Many(self.assemble_page(query, block, raw)?)),
        }
    }

    /// Assemble a page, dropping the overflow row fetched to detect more pages.
    pub fn assemble_page(
        &self,
        query: &NodeQuery,
        block: &MatchBlock,
        raw: RawResult,
    ) -> Result<QueryResult, Error> {
        let options = &query.options;
        let mut rows = raw.rows;

        let (has_next_page, has_previous_page) = if let Some(first) = options.first() {
            let overflow = exceeds(rows.len(), first);
            rows.truncate(clamp(first));
            (overflow, options.after().is_some())
        } else if let Some(last) = options.last() {
            let overflow = exceeds(rows.len(), last);
            let excess = rows.len().saturating_sub(clamp(last));
            rows.drain(..excess);
            (options.before().is_some(), overflow)
        } else {
            (options.before().is_some(), options.after().is_some())
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let cursor = Cursor::encode(options.order(), &row.keys)?;
            let node = self.node(query, block, row)?;
            items.push(ResultItem { cursor, node });
        }

        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: items.first().map(|item| item.cursor.clone()),
            end_cursor: items.last().map(|item| item.cursor.clone()),
        };
        trace!(
            entity = %query.entity_type,
            items = items.len(),
            has_next_page,
            has_previous_page,
            "assembled page"
        );

        Ok(QueryResult {
            items,
            total_count: raw.total_count,
            page_info,
        })
    }

    fn node(&self, query: &NodeQuery, block: &MatchBlock, mut row: RawRow) -> Result<Node, Error> {
        let entity = self.schema.concrete_type(row.node.labels.iter()).ok_or_else(|| {
            Error::StoreExecution(format!(
                "node '{}' has no concrete type among its labels",
                row.node.id
            ))
        })?;
        let cache = self.cache.for_node(&entity.name, &row.node.id);

        let mut relationships = BTreeMap::new();
        for (result_key, part) in &query.parts {
            let Some((index, sub)) = part.for_type(&entity.name) else {
                continue;
            };
            let child = block.child(result_key, index).ok_or_else(|| {
                Error::PlanCompilation(format!(
                    "no compiled block for '{}' on '{}'",
                    result_key, entity.name
                ))
            })?;
            let raw = row.children.remove(&child.var).unwrap_or_default();
            let result = self.assemble(&sub.query, child, raw)?;

            let key = CacheKey::for_query(&sub.relationship, &sub.query);
            relationships.insert(result_key.clone(), cache.insert_ready(key, result));
        }

        let mut node = Node::new(row.node.id, entity.name.clone(), row.node.properties, cache);
        node.relationships = relationships;
        Ok(node)
    }
}

fn exceeds(rows: usize, limit: u64) -> bool {
    u64::try_from(rows).map_or(true, |rows| rows > limit)
}

fn clamp(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Direction, EntityType, PropertyDef, PropertyType, RelationshipDef};
    use crate::query::{Compiler, PlanBudget, Planner, QueryOptions, RawNode};
    use crate::security::AuthorizationConditionBuilder;
    use graphloom_proto::{SelectionField, Value};
    use std::collections::BTreeSet;

    fn schema() -> Schema {
        Schema::builder()
            .with_entity(
                EntityType::new("Folder")
                    .with_property(PropertyDef::new("name", PropertyType::String))
                    .with_relationship(RelationshipDef::many(
                        "children",
                        "Folder",
                        "CHILD",
                        Direction::Outgoing,
                    )),
            )
            .build()
            .unwrap()
    }

    fn row(id: &str) -> RawRow {
        RawRow {
            node: RawNode {
                id: id.to_string(),
                labels: BTreeSet::from(["Folder".to_string()]),
                properties: BTreeMap::from([("id".to_string(), Value::from(id))]),
            },
            keys: BTreeMap::from([("id".to_string(), Value::from(id))]),
            children: BTreeMap::new(),
        }
    }

    fn assemble(options: QueryOptions, ids: &[&str]) -> QueryResult {
        let schema = schema();
        let authorization = AuthorizationConditionBuilder::default();
        let plan = Planner::new(&schema, &authorization, PlanBudget::default())
            .plan("Folder", &[], options, None)
            .unwrap();
        let statement = Compiler::compile(&schema, &plan).unwrap();
        let raw = RawResult {
            total_count: None,
            rows: ids.iter().map(|id| row(id)).collect(),
        };
        let cache = RequestCache::new();
        Assembler::new(&schema, &cache)
            .assemble_page(&plan, &statement.root, raw)
            .unwrap()
    }

    #[test]
    fn test_first_drops_trailing_overflow() {
        let page = assemble(QueryOptions::builder().first(2).build().unwrap(), &["a", "b", "c"]);
        assert_eq!(page.ids(), vec!["a", "b"]);
        assert!(page.page_info.has_next_page);
        assert!(!page.page_info.has_previous_page);
        assert_eq!(page.page_info.end_cursor.as_deref(), Some(page.items[1].cursor.as_str()));
    }

    #[test]
    fn test_last_drops_leading_overflow() {
        let page = assemble(QueryOptions::builder().last(2).build().unwrap(), &["a", "b", "c"]);
        assert_eq!(page.ids(), vec!["b", "c"]);
        assert!(page.page_info.has_previous_page);
        assert!(!page.page_info.has_next_page);
    }

    #[test]
    fn test_exact_page_has_no_more() {
        let page = assemble(QueryOptions::builder().first(2).build().unwrap(), &["a", "b"]);
        assert_eq!(page.len(), 2);
        assert!(!page.page_info.has_next_page);
    }

    #[test]
    fn test_unknown_labels_rejected() {
        let schema = schema();
        let authorization = AuthorizationConditionBuilder::default();
        let plan = Planner::new(&schema, &authorization, PlanBudget::default())
            .plan("Folder", &[SelectionField::new("children")], QueryOptions::default(), None)
            .unwrap();
        let statement = Compiler::compile(&schema, &plan).unwrap();
        let mut stray = row("x");
        stray.node.labels = BTreeSet::from(["Unknown".to_string()]);

        let cache = RequestCache::new();
        let result = Assembler::new(&schema, &cache).assemble_page(
            &plan,
            &statement.root,
            RawResult {
                total_count: None,
                rows: vec![stray],
            },
        );
        assert!(matches!(result, Err(Error::StoreExecution(_))));
    }
}
