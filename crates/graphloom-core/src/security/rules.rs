//! Named rule generators for authorization declarations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use graphloom_proto::{Permission, Value};

use super::authorization::RuleDecl;
use crate::catalog::EntityType;
use crate::error::Error;
use crate::query::{FilterExpr, PropertyOperator};

/// Everything a rule generator may look at.
pub struct RuleContext<'a> {
    /// Type being authorized.
    pub entity: &'a EntityType,
    /// The rule reference, with its static options.
    pub rule: &'a RuleDecl,
    /// The request permission, with its context parameters.
    pub permission: &'a Permission,
}

/// Generates the filter a rule stands for.
pub trait RuleGenerator: Send + Sync {
    fn generate(&self, context: &RuleContext<'_>) -> Result<FilterExpr, Error>;
}

impl<F> RuleGenerator for F
where
    F: Fn(&RuleContext<'_>) -> Result<FilterExpr, Error> + Send + Sync,
{
    fn generate(&self, context: &RuleContext<'_>) -> Result<FilterExpr, Error> {
        self(context)
    }
}

/// Compares a property with a permission context parameter.
///
/// Options: `property` (defaults to `id`) and `parameter`. Array parameters
/// match when the property is any of their elements.
pub struct ParameterMatch;

impl ParameterMatch {
    /// Name this generator is registered under by [`RuleRegistry::with_builtin_rules`].
    pub const NAME: &'static str = "matchesParameter";
}

impl RuleGenerator for ParameterMatch {
    fn generate(&self, context: &RuleContext<'_>) -> Result<FilterExpr, Error> {
        let property = context.rule.option("property").unwrap_or("id");
        let parameter = context.rule.option("parameter").ok_or_else(|| {
            Error::MalformedFilter(format!(
                "rule '{}' on '{}' needs a 'parameter' option",
                context.rule.name, context.entity.name
            ))
        })?;
        if context.entity.property(property).is_none() {
            return Err(Error::MalformedFilter(format!(
                "rule '{}' reads unknown property '{}' of '{}'",
                context.rule.name, property, context.entity.name
            )));
        }

        let value = context.permission.parameter(parameter).ok_or_else(|| {
            Error::MalformedFilter(format!(
                "permission '{}' has no parameter '{}'",
                context.permission.name, parameter
            ))
        })?;

        let operator = match value {
            Value::StringArray(items) => {
                PropertyOperator::In(items.iter().cloned().map(Value::String).collect())
            }
            Value::Int64Array(items) => {
                PropertyOperator::In(items.iter().copied().map(Value::Int64).collect())
            }
            Value::Null => PropertyOperator::IsNull(true),
            scalar => PropertyOperator::Eq(scalar.clone()),
        };
        Ok(FilterExpr::property(property, operator))
    }
}

/// Rule generators by name, passed to the condition builder as data.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn RuleGenerator>>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in generators.
    pub fn with_builtin_rules() -> Self {
        Self::new().with_rule(ParameterMatch::NAME, ParameterMatch)
    }

    /// Register a generator, replacing any previous one of the same name.
    pub fn with_rule(mut self, name: impl Into<String>, rule: impl RuleGenerator + 'static) -> Self {
        self.register(name, rule);
        self
    }

    /// Register a generator in place.
    pub fn register(&mut self, name: impl Into<String>, rule: impl RuleGenerator + 'static) {
        self.rules.insert(name.into(), Arc::new(rule));
    }

    /// Look up a generator.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn RuleGenerator>, Error> {
        self.rules
            .get(name)
            .ok_or_else(|| Error::UnknownRule(name.to_string()))
    }

    /// Generate the filter for a rule reference.
    pub fn generate(
        &self,
        entity: &EntityType,
        rule: &RuleDecl,
        permission: &Permission,
    ) -> Result<FilterExpr, Error> {
        self.get(&rule.name)?.generate(&RuleContext {
            entity,
            rule,
            permission,
        })
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.rules.keys().collect();
        names.sort();
        f.debug_struct("RuleRegistry").field("rules", &names).finish()
    }
}
