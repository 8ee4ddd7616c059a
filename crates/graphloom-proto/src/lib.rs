//! Graphloom protocol types.
//!
//! This crate defines the data exchanged between the query engine and the
//! transport layer that feeds it.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for properties, parameters and cursors
//! - [`selection`] - Selection tree produced from a client request
//! - [`permission`] - Permission context attached to a request

pub mod permission;
pub mod selection;
pub mod value;

// Re-export commonly used types at crate root
pub use permission::Permission;
pub use selection::SelectionField;
pub use value::Value;
