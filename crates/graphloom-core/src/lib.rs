//! graphloom core - schema model, query planning, compilation and assembly.
//!
//! This crate turns hierarchical selection requests into single graph-store
//! statements with per-level filtering, keyset pagination and authorization,
//! and maps the results back to typed, cached nodes.

pub mod catalog;
pub mod error;
pub mod query;
pub mod security;

pub use catalog::{
    Cardinality, Direction, EntityType, PropertyDef, PropertyType, RelationshipDef, Schema,
    SchemaBuilder, ID_PROPERTY,
};
pub use error::{Error, Result};
pub use query::{
    Cursor, FilterExpr, FilterParser, GraphStore, MemoryGraph, Node, NodeQuery, Order, OrderKey,
    PageInfo, PlanBudget, Planner, PropertyOperator, Quantifier, QueryExecutor, QueryOptions,
    QueryResult, RelationshipResult, RequestCache, SortDirection, Statement,
};
pub use security::{
    AuthorizationConditionBuilder, AuthorizationConfig, AuthorizationDecl, RuleContext,
    RuleDecl, RuleGenerator, RuleRegistry,
};

/// Re-export protocol types.
pub use graphloom_proto as proto;
