//! Query engine for graphloom.
//!
//! A request flows through the modules in order: the [`Planner`] turns a
//! selection tree into a [`NodeQuery`] plan tree, the [`Compiler`] turns the
//! plan into one [`Statement`], a [`GraphStore`] executes it, and the
//! [`Assembler`] maps the raw rows back to typed, paginated results cached
//! per node in a [`RequestCache`].

mod assembler;
mod cache;
mod compiler;
mod condition;
mod cursor;
mod executor;
mod filter;
mod memory;
mod options;
mod order;
mod planner;
mod result;
mod store;

pub use assembler::Assembler;
pub use cache::{CacheKey, CacheStats, RelationshipCache, RequestCache};
pub use compiler::{Compiler, MatchBlock, OrderTerm, Source, Statement};
pub use condition::{Bindings, CompareOp, Condition, Exists, Operand, TextOp};
pub use cursor::{seek_condition, Cursor, CursorValues};
pub use executor::QueryExecutor;
pub use filter::{FilterExpr, FilterParser, PropertyOperator, Quantifier};
pub use memory::MemoryGraph;
pub use options::{OptionsKey, QueryOptions, QueryOptionsBuilder};
pub use order::{Order, OrderKey, OrderPath, SortDirection};
pub use planner::{
    Anchor, NodeQuery, Part, PlanBudget, Planner, SubQuery, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_PAGE_SIZE,
};
pub use result::{Node, PageInfo, QueryResult, RelationshipResult, ResultItem};
pub use store::{GraphStore, RawNode, RawResult, RawRow};
