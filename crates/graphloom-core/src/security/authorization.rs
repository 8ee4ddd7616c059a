//! Authorization declarations and their per-permission merge.
//!
//! Types declare authorization per permission name. Declarations from a type
//! and all of its supertypes are merged at schema-build time into one
//! [`MergedAuthorization`] per permission name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{EntityType, RelationshipDef};
use crate::error::Error;

/// Reference to a named rule generator plus its static options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDecl {
    /// Name the generator is registered under.
    pub name: String,
    /// Static options passed to the generator.
    pub options: BTreeMap<String, String>,
}

impl RuleDecl {
    /// Reference a rule without options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Get an option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Authorization declared for one permission name on one type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorizationDecl {
    /// Permission name this declaration applies to.
    pub name: String,
    /// Rules granting access.
    pub allow: Vec<RuleDecl>,
    /// Relationships through which access is inherited from related nodes.
    pub allow_from_related: Vec<String>,
    /// Rules revoking access; they override every allow.
    pub disallow: Vec<RuleDecl>,
    /// Grant access unconditionally (disallow rules still apply).
    pub allow_all: bool,
}

impl AuthorizationDecl {
    /// Create an empty declaration for a permission name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an allow rule.
    pub fn allow(mut self, rule: RuleDecl) -> Self {
        self.allow.push(rule);
        self
    }

    /// Inherit access from nodes reached through a relationship.
    pub fn allow_from_related(mut self, relationship: impl Into<String>) -> Self {
        self.allow_from_related.push(relationship.into());
        self
    }

    /// Add a disallow rule.
    pub fn disallow(mut self, rule: RuleDecl) -> Self {
        self.disallow.push(rule);
        self
    }

    /// Grant access unconditionally.
    pub fn allow_all(mut self) -> Self {
        self.allow_all = true;
        self
    }
}

/// Authorization for one permission name, aggregated over a type and its supertypes.
///
/// Access is `(allow_all OR any allow OR any related allow) AND NOT (any disallow)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedAuthorization {
    /// Allow rules.
    pub allow: Vec<RuleDecl>,
    /// Resolved relationships for reachability-based allow.
    pub allow_from_related: Vec<RelationshipDef>,
    /// Disallow rules.
    pub disallow: Vec<RuleDecl>,
    /// Whether any declaration granted access unconditionally.
    pub allow_all: bool,
}

impl MergedAuthorization {
    fn absorb(&mut self, decl: &AuthorizationDecl, entity: &EntityType) -> Result<(), Error> {
        push_unique(&mut self.allow, &decl.allow);
        push_unique(&mut self.disallow, &decl.disallow);
        self.allow_all |= decl.allow_all;

        for name in &decl.allow_from_related {
            let relationship = entity.relationship(name).ok_or_else(|| {
                Error::InvalidSchema(format!(
                    "authorization '{}' on '{}' allows from unknown relationship '{}'",
                    decl.name, entity.name, name
                ))
            })?;
            if !self.allow_from_related.iter().any(|r| r.name == relationship.name) {
                self.allow_from_related.push(relationship.clone());
            }
        }
        Ok(())
    }
}

fn push_unique(target: &mut Vec<RuleDecl>, rules: &[RuleDecl]) {
    for rule in rules {
        if !target.contains(rule) {
            target.push(rule.clone());
        }
    }
}

/// Merge the declarations of a type and its supertypes, keyed by permission name.
///
/// `chain` lists the declarations of the type first and then those of each
/// ancestor. `entity` must already carry its flattened relationships so that
/// inherited allow-from-related names resolve.
pub fn merge_authorizations<'a>(
    entity: &EntityType,
    chain: impl IntoIterator<Item = &'a AuthorizationDecl>,
) -> Result<BTreeMap<String, MergedAuthorization>, Error> {
    let mut merged: BTreeMap<String, MergedAuthorization> = BTreeMap::new();
    for decl in chain {
        merged
            .entry(decl.name.clone())
            .or_default()
            .absorb(decl, entity)?;
    }
    Ok(merged)
}
