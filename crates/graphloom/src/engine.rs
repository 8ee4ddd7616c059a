//! Embeddable engine and per-request scope.

use std::sync::Arc;

use graphloom_core::catalog::Schema;
use graphloom_core::query::{
    GraphStore, Node, QueryExecutor, QueryOptions, QueryResult, RelationshipResult, RequestCache,
};
use graphloom_core::security::{AuthorizationConditionBuilder, RuleRegistry};
use graphloom_proto::{Permission, SelectionField};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::Result;

/// A schema, a rule registry and a store, shared by all requests.
pub struct Engine {
    executor: QueryExecutor,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine over a built schema.
    pub fn new(
        schema: Schema,
        store: Arc<dyn GraphStore>,
        rules: RuleRegistry,
        config: EngineConfig,
    ) -> Self {
        info!(
            entities = schema.entity_names().len(),
            max_depth = config.budget.max_depth,
            max_page_size = config.budget.max_page_size,
            "graphloom engine ready"
        );
        let authorization = AuthorizationConditionBuilder::new(rules, config.authorization.clone());
        let executor = QueryExecutor::new(Arc::new(schema), store, authorization)
            .with_budget(config.budget.clone())
            .with_statement_logging(config.log_statements);
        Self { executor, config }
    }

    pub fn schema(&self) -> &Schema {
        self.executor.schema()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a request scope.
    ///
    /// The permission applies to every level of every query made through the
    /// request, and relationship results are cached for the request's lifetime.
    pub fn request(&self, permission: Option<Permission>) -> Request<'_> {
        Request {
            engine: self,
            permission,
            cache: RequestCache::new(),
        }
    }
}

/// One client request: a permission and a relationship result cache.
pub struct Request<'e> {
    engine: &'e Engine,
    permission: Option<Permission>,
    cache: RequestCache,
}

impl Request<'_> {
    pub fn permission(&self) -> Option<&Permission> {
        self.permission.as_ref()
    }

    /// Query nodes of `entity_type` with explicit options.
    pub async fn query(
        &self,
        entity_type: &str,
        selection: &[SelectionField],
        options: QueryOptions,
    ) -> Result<QueryResult> {
        Ok(self
            .engine
            .executor
            .query(entity_type, selection, options, self.permission(), &self.cache)
            .await?)
    }

    /// Query nodes of `entity_type` through a connection-shaped field.
    pub async fn query_connection(
        &self,
        entity_type: &str,
        field: &SelectionField,
    ) -> Result<QueryResult> {
        Ok(self
            .engine
            .executor
            .query_connection(entity_type, field, self.permission(), &self.cache)
            .await?)
    }

    /// Load a relationship of a node returned by this request.
    pub async fn load_relationship(
        &self,
        node: &Node,
        field: &SelectionField,
    ) -> Result<Arc<RelationshipResult>> {
        Ok(self
            .engine
            .executor
            .load_relationship(node, field, self.permission(), &self.cache)
            .await?)
    }
}
