//! Query planner: selection trees to [`NodeQuery`] plan trees.
//!
//! Planning is a pure function of the schema, the selection tree, the
//! options and the permission. Every relationship field in the selection
//! becomes a nested [`SubQuery`] with its own options, authorization
//! condition and page limit, so the whole tree can be compiled into one
//! statement.

use std::collections::{BTreeMap, BTreeSet};

use graphloom_proto::{Permission, SelectionField, Value};
use tracing::trace;

use super::filter::{FilterExpr, FilterParser};
use super::options::{OptionsKey, QueryOptions};
use super::order::Order;
use crate::catalog::{Cardinality, EntityType, RelationshipDef, Schema};
use crate::error::Error;
use crate::security::AuthorizationConditionBuilder;

/// Default maximum nesting of relationship sub-queries.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Default maximum value for `first`/`last`.
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1_000;

/// Limits applied while planning, to keep single statements bounded.
#[derive(Debug, Clone)]
pub struct PlanBudget {
    /// Maximum depth of nested relationship sub-queries.
    pub max_depth: usize,
    /// Maximum requested page size.
    pub max_page_size: u64,
}

impl Default for PlanBudget {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl PlanBudget {
    /// Create a budget with custom limits.
    pub fn new(max_depth: usize, max_page_size: u64) -> Self {
        Self {
            max_depth,
            max_page_size,
        }
    }

    /// Create an unlimited budget (use with caution).
    pub fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
            max_page_size: u64::MAX - 1,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = max_page_size;
        self
    }
}

/// Restricts a query to the nodes related to one parent node.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    /// Type of the parent node.
    pub parent_type: String,
    /// Identifier of the parent node.
    pub parent_id: Value,
    /// Relationship followed from the parent.
    pub relationship: RelationshipDef,
}

/// One level of a plan tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    /// Entity type the level returns.
    pub entity_type: String,
    /// Options as requested. Also the relationship cache key.
    pub options: QueryOptions,
    /// Requested filter combined with the authorization condition.
    pub condition: FilterExpr,
    /// Rows to fetch: one more than the page size so that an extra page can
    /// be detected without a second query.
    pub limit: Option<u64>,
    /// Whether the level yields one optional node or a page of nodes.
    pub cardinality: Cardinality,
    /// Parent restriction for ad hoc relationship loads.
    pub anchor: Option<Anchor>,
    /// Requested relationships, by result key.
    pub parts: BTreeMap<String, Part>,
}

impl NodeQuery {
    /// Get the part planned for a result key.
    pub fn part(&self, result_key: &str) -> Option<&Part> {
        self.parts.get(result_key)
    }

    /// Depth of the deepest nested sub-query (0 without sub-queries).
    pub fn depth(&self) -> usize {
        self.parts
            .values()
            .flat_map(|part| part.sub_queries.iter())
            .map(|sub| sub.query.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Fingerprint of the relationships selected below this level, with
    /// their result keys, options and applicable types.
    pub fn selection_key(&self) -> OptionsKey {
        let mut hasher = blake3::Hasher::new();
        self.hash_selection(&mut hasher);
        OptionsKey::from_hasher(&hasher)
    }

    fn hash_selection(&self, hasher: &mut blake3::Hasher) {
        for (result_key, part) in &self.parts {
            hasher.update(result_key.as_bytes());
            for sub in &part.sub_queries {
                hasher.update(b"\0");
                hasher.update(sub.relationship.qualified_name().as_bytes());
                hasher.update(sub.query.options.key().as_bytes());
                for type_name in sub.only_on_types.iter().flatten() {
                    hasher.update(type_name.as_bytes());
                    hasher.update(b",");
                }
                hasher.update(b"(");
                sub.query.hash_selection(hasher);
                hasher.update(b")");
            }
            hasher.update(b";");
        }
    }
}

/// Sub-queries requested under one result key.
///
/// There is more than one only when the key was requested through fragments
/// on different subtypes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Part {
    pub sub_queries: Vec<SubQuery>,
}

impl Part {
    /// The sub-query applying to a node of the given concrete type.
    pub fn for_type(&self, type_name: &str) -> Option<(usize, &SubQuery)> {
        self.sub_queries
            .iter()
            .enumerate()
            .find(|(_, sub)| sub.applies_to(type_name))
    }
}

/// A nested plan node for one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    /// Relationship followed from the parent level.
    pub relationship: RelationshipDef,
    /// Plan for the related nodes.
    pub query: NodeQuery,
    /// Concrete parent types the sub-query applies to; `None` for all.
    pub only_on_types: Option<BTreeSet<String>>,
}

impl SubQuery {
    /// Check whether the sub-query applies to a parent of the given concrete type.
    pub fn applies_to(&self, type_name: &str) -> bool {
        self.only_on_types
            .as_ref()
            .map_or(true, |types| types.contains(type_name))
    }
}

/// Builds plan trees.
pub struct Planner<'a> {
    schema: &'a Schema,
    authorization: &'a AuthorizationConditionBuilder,
    budget: PlanBudget,
}

impl<'a> Planner<'a> {
    pub fn new(
        schema: &'a Schema,
        authorization: &'a AuthorizationConditionBuilder,
        budget: PlanBudget,
    ) -> Self {
        Self {
            schema,
            authorization,
            budget,
        }
    }

    /// Plan a root query over `entity_type` with explicit options.
    ///
    /// `selection` is the node-level selection (the fields of each returned node).
    pub fn plan(
        &self,
        entity_type: &str,
        selection: &[SelectionField],
        options: QueryOptions,
        permission: Option<&Permission>,
    ) -> Result<NodeQuery, Error> {
        let entity = self.schema.entity(entity_type)?;
        let selection: Vec<&SelectionField> = selection.iter().collect();
        self.plan_node(entity, &selection, options, Cardinality::Many, permission, 0)
    }

    /// Plan a root query from a connection-shaped field carrying its options
    /// as arguments (`filter`, `orderBy`, `after`, `before`, `first`, `last`).
    pub fn plan_connection(
        &self,
        entity_type: &str,
        field: &SelectionField,
        permission: Option<&Permission>,
    ) -> Result<NodeQuery, Error> {
        let entity = self.schema.entity(entity_type)?;
        let options = self.parse_options(entity, field)?;
        let selection = node_selection(&[field], Cardinality::Many);
        self.plan_node(entity, &selection, options, Cardinality::Many, permission, 0)
    }

    /// Plan an ad hoc load of one relationship of an already loaded node.
    ///
    /// The returned query is anchored on the parent node.
    pub fn plan_relationship(
        &self,
        parent_type: &str,
        parent_id: &Value,
        field: &SelectionField,
        permission: Option<&Permission>,
    ) -> Result<NodeQuery, Error> {
        let parent = self.schema.entity(parent_type)?;
        let relationship = parent.relationship(&field.name).ok_or_else(|| {
            Error::PlanCompilation(format!(
                "'{}' is not a relationship of '{}'",
                field.name, parent.name
            ))
        })?;
        let target = self.schema.entity(&relationship.target)?;

        let options = self.relationship_options(relationship, target, &[field])?;
        let selection = node_selection(&[field], relationship.cardinality);
        let mut query = self.plan_node(
            target,
            &selection,
            options,
            relationship.cardinality,
            permission,
            0,
        )?;
        query.anchor = Some(Anchor {
            parent_type: parent.name.clone(),
            parent_id: parent_id.clone(),
            relationship: relationship.clone(),
        });
        Ok(query)
    }

    /// Parse the pagination arguments of a field into options for `entity`.
    pub fn parse_options(
        &self,
        entity: &EntityType,
        field: &SelectionField,
    ) -> Result<QueryOptions, Error> {
        self.parse_arguments(entity, field, field.has_child("totalCount"))
    }

    fn parse_arguments(
        &self,
        entity: &EntityType,
        field: &SelectionField,
        fetch_total_count: bool,
    ) -> Result<QueryOptions, Error> {
        let mut builder = QueryOptions::builder().fetch_total_count(fetch_total_count);

        if let Some(raw) = present(field.argument("filter")) {
            builder = builder.filter(FilterParser::new(self.schema).parse(entity, raw)?);
        }
        if let Some(raw) = present(field.argument("orderBy")) {
            builder = builder.order(Order::parse(self.schema, entity, raw)?);
        }
        if let Some(raw) = present(field.argument("after")) {
            builder = builder.after(cursor_argument("after", raw)?);
        }
        if let Some(raw) = present(field.argument("before")) {
            builder = builder.before(cursor_argument("before", raw)?);
        }
        if let Some(raw) = present(field.argument("first")) {
            builder = builder.first(limit_argument("first", raw)?);
        }
        if let Some(raw) = present(field.argument("last")) {
            builder = builder.last(limit_argument("last", raw)?);
        }
        builder.build()
    }

    /// Options of a relationship requested through one or more fields under
    /// the same result key.
    ///
    /// The fields must carry identical arguments. The total count is fetched
    /// if any of them selects it.
    fn relationship_options(
        &self,
        relationship: &RelationshipDef,
        target: &EntityType,
        fields: &[&SelectionField],
    ) -> Result<QueryOptions, Error> {
        let Some((&field, rest)) = fields.split_first() else {
            return Err(Error::PlanCompilation(format!(
                "no field requests '{}'",
                relationship.qualified_name()
            )));
        };
        if let Some(other) = rest.iter().find(|other| other.arguments != field.arguments) {
            return Err(Error::InvalidQueryOptions(format!(
                "'{}' is requested with conflicting arguments",
                other.result_key()
            )));
        }
        if relationship.is_many() {
            let fetch_total_count = fields.iter().any(|f| f.has_child("totalCount"));
            self.parse_arguments(target, field, fetch_total_count)
        } else {
            Ok(QueryOptions::single())
        }
    }

    fn plan_node(
        &self,
        entity: &EntityType,
        selection: &[&SelectionField],
        options: QueryOptions,
        cardinality: Cardinality,
        permission: Option<&Permission>,
        depth: usize,
    ) -> Result<NodeQuery, Error> {
        if let Some(size) = options.page_size() {
            if size > self.budget.max_page_size {
                return Err(Error::BudgetExceeded(format!(
                    "page size {} on '{}' exceeds {}",
                    size, entity.name, self.budget.max_page_size
                )));
            }
        }

        let authorization = match permission {
            Some(permission) => {
                self.authorization
                    .build_condition(self.schema, entity, permission)?
            }
            None => FilterExpr::all(),
        };
        let condition = FilterExpr::conjoin([options.filter().clone(), authorization]);

        let limit = match cardinality {
            Cardinality::One => Some(1),
            Cardinality::Many => options.page_size().map(|size| size + 1),
        };

        let mut parts: BTreeMap<String, Part> = BTreeMap::new();
        for group in self.group_relationship_fields(entity, selection)? {
            if depth + 1 > self.budget.max_depth {
                return Err(Error::BudgetExceeded(format!(
                    "'{}' nests deeper than {}",
                    group.relationship.qualified_name(),
                    self.budget.max_depth
                )));
            }

            let target = self.schema.entity(&group.relationship.target)?;
            let sub_options = self.relationship_options(&group.relationship, target, &group.fields)?;
            let sub_selection = node_selection(&group.fields, group.relationship.cardinality);
            let query = self.plan_node(
                target,
                &sub_selection,
                sub_options,
                group.relationship.cardinality,
                permission,
                depth + 1,
            )?;

            trace!(
                result_key = %group.result_key,
                relationship = %group.relationship.qualified_name(),
                depth = depth + 1,
                "planned sub-query"
            );

            parts.entry(group.result_key).or_default().sub_queries.push(SubQuery {
                relationship: group.relationship,
                query,
                only_on_types: group.only_on_types,
            });
        }

        Ok(NodeQuery {
            entity_type: entity.name.clone(),
            options,
            condition,
            limit,
            cardinality,
            anchor: None,
            parts,
        })
    }

    /// Group relationship fields by result key and applicable subtypes.
    ///
    /// Fields that are not relationships of their scope type are scalar
    /// selections and are skipped; nodes always carry all their properties.
    fn group_relationship_fields<'s>(
        &self,
        entity: &EntityType,
        selection: &[&'s SelectionField],
    ) -> Result<Vec<FieldGroup<'s>>, Error> {
        let mut groups: Vec<FieldGroup<'s>> = Vec::new();
        for &field in selection {
            let scope = match &field.type_condition {
                Some(type_name) => self.schema.entity(type_name)?.as_ref(),
                None => entity,
            };
            if !scope.is_subtype_of(&entity.name) && !entity.is_subtype_of(&scope.name) {
                return Err(Error::PlanCompilation(format!(
                    "type condition '{}' does not apply to '{}'",
                    scope.name, entity.name
                )));
            }
            let Some(relationship) = scope.relationship(&field.name) else {
                continue;
            };
            let only_on_types = if entity.is_subtype_of(&scope.name) {
                None
            } else {
                Some(self.schema.concrete_subtypes(&scope.name))
            };

            let result_key = field.result_key();
            match groups
                .iter_mut()
                .find(|g| g.result_key == result_key && g.only_on_types == only_on_types)
            {
                Some(group) => group.fields.push(field),
                None => groups.push(FieldGroup {
                    result_key: result_key.to_string(),
                    relationship: relationship.clone(),
                    only_on_types,
                    fields: vec![field],
                }),
            }
        }
        Ok(groups)
    }
}

struct FieldGroup<'s> {
    result_key: String,
    relationship: RelationshipDef,
    only_on_types: Option<BTreeSet<String>>,
    fields: Vec<&'s SelectionField>,
}

/// The node-level selection under relationship fields.
///
/// Many-relationships may be selected connection-style (`nodes`,
/// `edges { node }`, `totalCount`, `pageInfo`) or directly as a list.
fn node_selection<'s>(fields: &[&'s SelectionField], cardinality: Cardinality) -> Vec<&'s SelectionField> {
    let mut selection = Vec::new();
    for field in fields {
        for child in &field.selection {
            match (cardinality, child.name.as_str()) {
                (Cardinality::Many, "nodes") => selection.extend(child.selection.iter()),
                (Cardinality::Many, "edges") => {
                    for edge_field in &child.selection {
                        if edge_field.name == "node" {
                            selection.extend(edge_field.selection.iter());
                        }
                    }
                }
                (Cardinality::Many, "totalCount" | "pageInfo") => {}
                _ => selection.push(child),
            }
        }
    }
    selection
}

fn present(raw: Option<&serde_json::Value>) -> Option<&serde_json::Value> {
    raw.filter(|value| !value.is_null())
}

fn cursor_argument(name: &str, raw: &serde_json::Value) -> Result<String, Error> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidCursor(format!("'{}' must be a string", name)))
}

fn limit_argument(name: &str, raw: &serde_json::Value) -> Result<i64, Error> {
    raw.as_i64()
        .ok_or_else(|| Error::InvalidQueryOptions(format!("'{}' must be an integer", name)))
}
