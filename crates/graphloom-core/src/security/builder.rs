//! Turns merged authorization declarations into filter conditions.

use graphloom_proto::Permission;
use tracing::trace;

use super::rules::RuleRegistry;
use crate::catalog::{EntityType, Schema};
use crate::error::Error;
use crate::query::{FilterExpr, Quantifier};

/// Default bound on allow-from-related recursion.
pub const DEFAULT_AUTHORIZATION_DEPTH: usize = 8;

/// Authorization configuration.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Maximum number of allow-from-related hops followed while building a
    /// condition. Exceeding it is a configuration error.
    pub max_depth: usize,
}

impl AuthorizationConfig {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_AUTHORIZATION_DEPTH,
        }
    }

    /// Set the recursion bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the filter a permission imposes on an entity type.
///
/// The condition is `(allow OR related allow) AND NOT (disallow)`. A type with
/// no declaration for the permission matches nothing.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationConditionBuilder {
    rules: RuleRegistry,
    config: AuthorizationConfig,
}

impl AuthorizationConditionBuilder {
    pub fn new(rules: RuleRegistry, config: AuthorizationConfig) -> Self {
        Self { rules, config }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Build the condition `permission` imposes on nodes of `entity`.
    pub fn build_condition(
        &self,
        schema: &Schema,
        entity: &EntityType,
        permission: &Permission,
    ) -> Result<FilterExpr, Error> {
        self.build_at(schema, entity, permission, 0)
    }

    fn build_at(
        &self,
        schema: &Schema,
        entity: &EntityType,
        permission: &Permission,
        depth: usize,
    ) -> Result<FilterExpr, Error> {
        if depth > self.config.max_depth {
            return Err(Error::AuthorizationDepthExceeded(format!(
                "'{}' on '{}' follows more than {} related hops",
                permission.name, entity.name, self.config.max_depth
            )));
        }

        let Some(merged) = entity.authorization(&permission.name) else {
            trace!(entity = %entity.name, permission = %permission.name, "no authorization declared");
            return Ok(FilterExpr::none());
        };

        let allow = if merged.allow_all {
            FilterExpr::all()
        } else {
            let mut alternatives = Vec::with_capacity(merged.allow.len() + merged.allow_from_related.len());
            for rule in &merged.allow {
                alternatives.push(self.rules.generate(entity, rule, permission)?);
            }
            for relationship in &merged.allow_from_related {
                let target = schema.entity(&relationship.target)?;
                let related = self.build_at(schema, target, permission, depth + 1)?;
                alternatives.push(FilterExpr::relationship(
                    relationship.clone(),
                    Quantifier::Any,
                    related,
                ));
            }
            FilterExpr::Or(alternatives)
        };

        if merged.disallow.is_empty() {
            return Ok(allow);
        }
        let disallow = merged
            .disallow
            .iter()
            .map(|rule| self.rules.generate(entity, rule, permission))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilterExpr::conjoin([allow, FilterExpr::not(FilterExpr::Or(disallow))]))
    }
}
