//! Query executor: plan, compile, execute and assemble.
//!
//! Every entry point runs exactly one statement against the store, however
//! deep the requested relationship tree is.

use std::sync::Arc;

use graphloom_proto::{Permission, SelectionField, Value};
use tracing::{debug, instrument};

use super::assembler::Assembler;
use super::cache::{CacheKey, RequestCache};
use super::compiler::Compiler;
use super::options::QueryOptions;
use super::planner::{NodeQuery, PlanBudget, Planner};
use super::result::{Node, QueryResult, RelationshipResult};
use super::store::GraphStore;
use crate::catalog::Schema;
use crate::error::Error;
use crate::security::AuthorizationConditionBuilder;

/// Query executor running plans against a graph store.
pub struct QueryExecutor {
    schema: Arc<Schema>,
    store: Arc<dyn GraphStore>,
    authorization: AuthorizationConditionBuilder,
    budget: PlanBudget,
    log_statements: bool,
}

impl QueryExecutor {
    /// Create an executor with the default plan budget.
    pub fn new(
        schema: Arc<Schema>,
        store: Arc<dyn GraphStore>,
        authorization: AuthorizationConditionBuilder,
    ) -> Self {
        Self {
            schema,
            store,
            authorization,
            budget: PlanBudget::default(),
            log_statements: false,
        }
    }

    /// Use a custom plan budget.
    pub fn with_budget(mut self, budget: PlanBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Log the rendered statement text of every execution at debug level.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// A planner over this executor's schema, authorization and budget.
    pub fn planner(&self) -> Planner<'_> {
        Planner::new(&self.schema, &self.authorization, self.budget.clone())
    }

    /// Query nodes of `entity_type` with explicit options.
    #[instrument(skip_all, fields(entity = %entity_type))]
    pub async fn query(
        &self,
        entity_type: &str,
        selection: &[SelectionField],
        options: QueryOptions,
        permission: Option<&Permission>,
        cache: &RequestCache,
    ) -> Result<QueryResult, Error> {
        let plan = self.planner().plan(entity_type, selection, options, permission)?;
        self.run_page(&plan, cache).await
    }

    /// Query nodes of `entity_type` through a connection-shaped field whose
    /// arguments carry the options.
    #[instrument(skip_all, fields(entity = %entity_type, field = %field.name))]
    pub async fn query_connection(
        &self,
        entity_type: &str,
        field: &SelectionField,
        permission: Option<&Permission>,
        cache: &RequestCache,
    ) -> Result<QueryResult, Error> {
        let plan = self.planner().plan_connection(entity_type, field, permission)?;
        self.run_page(&plan, cache).await
    }

    /// Load one relationship of an already loaded node.
    ///
    /// Results are memoized in the node's relationship cache under the
    /// relationship, the options and the nested selection, shared with
    /// results planned into earlier statements. Loading a relationship from
    /// within its own computation fails with [`Error::ReentrantComputation`].
    ///
    /// Cache keys do not include the permission: `node` must come from a
    /// query made with the same permission and request cache.
    #[instrument(skip_all, fields(node = %node.id, relationship = %field.name))]
    pub async fn load_relationship(
        &self,
        node: &Node,
        field: &SelectionField,
        permission: Option<&Permission>,
        cache: &RequestCache,
    ) -> Result<Arc<RelationshipResult>, Error> {
        let plan = self.planner().plan_relationship(
            &node.type_name,
            &Value::String(node.id.clone()),
            field,
            permission,
        )?;
        let anchor = plan
            .anchor
            .as_ref()
            .ok_or_else(|| Error::PlanCompilation("relationship plan has no anchor".to_string()))?;
        let key = CacheKey::for_query(&anchor.relationship, &plan);

        node.cache()
            .get_or_compute(key, || self.run(&plan, cache))
            .await
    }

    async fn run_page(&self, plan: &NodeQuery, cache: &RequestCache) -> Result<QueryResult, Error> {
        let statement = Compiler::compile(&self.schema, plan)?;
        self.log(&statement);
        let raw = self.store.execute(&statement).await?;
        Assembler::new(&self.schema, cache).assemble_page(plan, &statement.root, raw)
    }

    async fn run(&self, plan: &NodeQuery, cache: &RequestCache) -> Result<RelationshipResult, Error> {
        let statement = Compiler::compile(&self.schema, plan)?;
        self.log(&statement);
        let raw = self.store.execute(&statement).await?;
        Assembler::new(&self.schema, cache).assemble(plan, &statement.root, raw)
    }

    fn log(&self, statement: &super::compiler::Statement) {
        if self.log_statements {
            debug!(
                statement = %statement.to_cypher(),
                params = ?statement.params,
                "executing statement"
            );
        }
    }
}
