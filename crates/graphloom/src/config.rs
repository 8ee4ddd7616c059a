//! Engine configuration.

use graphloom_core::query::{PlanBudget, DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGE_SIZE};
use graphloom_core::security::{AuthorizationConfig, DEFAULT_AUTHORIZATION_DEPTH};

/// Whether statements are logged by default.
pub const DEFAULT_LOG_STATEMENTS: bool = false;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limits applied while planning.
    pub budget: PlanBudget,

    /// Allow-from-related recursion bound.
    pub authorization: AuthorizationConfig,

    /// Log the rendered text of every executed statement at debug level.
    pub log_statements: bool,
}

impl EngineConfig {
    /// Create a configuration with the default limits.
    pub fn new() -> Self {
        Self {
            budget: PlanBudget::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_PAGE_SIZE),
            authorization: AuthorizationConfig::new(),
            log_statements: DEFAULT_LOG_STATEMENTS,
        }
    }

    /// Set the maximum nesting of relationship sub-queries.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.budget = self.budget.with_max_depth(max_depth);
        self
    }

    /// Set the maximum `first`/`last` value.
    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.budget = self.budget.with_max_page_size(max_page_size);
        self
    }

    /// Set the allow-from-related recursion bound.
    pub fn with_authorization_depth(mut self, max_depth: usize) -> Self {
        self.authorization = self.authorization.with_max_depth(max_depth);
        self
    }

    /// Enable or disable statement logging.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
