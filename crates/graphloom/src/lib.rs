//! graphloom - graph-shaped queries answered with a single statement.
//!
//! A request selects a root entity type and any depth of its relationships,
//! each level with its own filter, order, keyset pagination and permission
//! scope. The engine plans the whole tree, compiles it into one statement,
//! runs it once against a [`GraphStore`] and returns typed, paginated results.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use graphloom::{Engine, EngineConfig, MemoryGraph, RuleRegistry, SelectionField};
//!
//! let engine = Engine::new(schema, Arc::new(MemoryGraph::new()), RuleRegistry::with_builtin_rules(), EngineConfig::default());
//! let request = engine.request(None);
//! let folders = request.query_connection("Folder", &SelectionField::new("folders")).await?;
//! ```

mod config;
mod engine;
mod error;
pub mod telemetry;

pub use config::{EngineConfig, DEFAULT_LOG_STATEMENTS};
pub use engine::{Engine, Request};
pub use error::{Error, Result};
pub use graphloom_core::Error as QueryError;

pub use graphloom_core::catalog::{
    Cardinality, Direction, EntityType, PropertyDef, PropertyType, RelationshipDef, Schema,
    SchemaBuilder,
};
pub use graphloom_core::query::{
    GraphStore, MemoryGraph, Node, PageInfo, QueryOptions, QueryResult, RawNode, RawResult,
    RawRow, RelationshipResult, ResultItem, Statement,
};
pub use graphloom_core::security::{
    AuthorizationDecl, ParameterMatch, RuleContext, RuleDecl, RuleGenerator, RuleRegistry,
};
pub use graphloom_proto::{Permission, SelectionField, Value};
