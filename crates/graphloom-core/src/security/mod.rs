//! Permission-scoped authorization.
//!
//! Entity types declare, per permission name, rules that allow or disallow
//! access and relationships through which access is inherited from related
//! nodes. Declarations are merged across supertypes at schema-build time and
//! turned into filter conditions that the planner folds into every level of a
//! query.
//!
//! Rules are resolved through a [`RuleRegistry`] that callers populate with
//! named [`RuleGenerator`]s.

mod authorization;
mod builder;
mod rules;

pub use authorization::{merge_authorizations, AuthorizationDecl, MergedAuthorization, RuleDecl};
pub use builder::{AuthorizationConditionBuilder, AuthorizationConfig, DEFAULT_AUTHORIZATION_DEPTH};
pub use rules::{ParameterMatch, RuleContext, RuleGenerator, RuleRegistry};
