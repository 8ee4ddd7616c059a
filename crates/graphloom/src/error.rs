//! Engine error types.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Planning, compilation, execution or assembly failed.
    #[error("query error: {0}")]
    Query(#[from] graphloom_core::Error),

    /// The tracing subscriber could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl Error {
    /// The underlying query error, if any.
    pub fn as_query(&self) -> Option<&graphloom_core::Error> {
        match self {
            Error::Query(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
