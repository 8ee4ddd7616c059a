//! Core error types.

use thiserror::Error;

/// Query engine errors.
///
/// Every variant is surfaced to the immediate caller unmodified; the engine
/// performs no local recovery and no retries.
#[derive(Debug, Error)]
pub enum Error {
    /// A filter input did not match any recognized shape.
    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    /// An order input did not match any recognized shape.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// A cursor could not be decoded against the active order.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// An authorization rule name has no registered generator.
    #[error("unknown authorization rule: {0}")]
    UnknownRule(String),

    /// The plan does not match the schema (programmer error).
    #[error("plan compilation failed: {0}")]
    PlanCompilation(String),

    /// The backing store failed to execute a statement.
    #[error("store execution failed: {0}")]
    StoreExecution(String),

    /// A relationship result was requested while it was being computed.
    #[error("relationship result already being computed: {0}")]
    ReentrantComputation(String),

    /// Conflicting or out-of-range pagination options.
    #[error("invalid query options: {0}")]
    InvalidQueryOptions(String),

    /// The schema failed validation while being built.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// An entity type name is not part of the schema.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// A plan exceeded the configured depth or page size budget.
    #[error("query budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Allow-from-related authorization recursed past the configured depth.
    #[error("authorization depth exceeded: {0}")]
    AuthorizationDepthExceeded(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
