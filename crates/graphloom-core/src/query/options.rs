//! Query options for one level of a request.

use std::fmt;

use serde::Serialize;

use super::filter::FilterExpr;
use super::order::Order;
use crate::error::Error;

/// Immutable options for one plan node: filter, order and pagination.
///
/// Built through [`QueryOptionsBuilder`], which rejects setting both `first`
/// and `last` and negative limits.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryOptions {
    filter: FilterExpr,
    order: Order,
    after: Option<String>,
    before: Option<String>,
    first: Option<u64>,
    last: Option<u64>,
    fetch_total_count: bool,
}

impl QueryOptions {
    /// Start building options.
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }

    /// Options for a single-cardinality relationship: `first = 1`, no count.
    pub fn single() -> Self {
        Self {
            first: Some(1),
            ..Self::default()
        }
    }

    pub fn filter(&self) -> &FilterExpr {
        &self.filter
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    pub fn before(&self) -> Option<&str> {
        self.before.as_deref()
    }

    pub fn first(&self) -> Option<u64> {
        self.first
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn fetch_total_count(&self) -> bool {
        self.fetch_total_count
    }

    /// The requested page size, if any.
    pub fn page_size(&self) -> Option<u64> {
        self.first.or(self.last)
    }

    /// Fingerprint identifying these options in relationship caches.
    pub fn key(&self) -> OptionsKey {
        let mut hasher = blake3::Hasher::new();
        // options are plain data; serialization into a Vec cannot fail
        if let Ok(json) = serde_json::to_vec(self) {
            hasher.update(&json);
        }
        OptionsKey::from_hasher(&hasher)
    }
}

/// Builder for [`QueryOptions`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptionsBuilder {
    filter: FilterExpr,
    order: Order,
    after: Option<String>,
    before: Option<String>,
    first: Option<i64>,
    last: Option<i64>,
    fetch_total_count: bool,
}

impl QueryOptionsBuilder {
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filter = filter;
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn first(mut self, first: i64) -> Self {
        self.first = Some(first);
        self
    }

    pub fn last(mut self, last: i64) -> Self {
        self.last = Some(last);
        self
    }

    pub fn fetch_total_count(mut self, fetch: bool) -> Self {
        self.fetch_total_count = fetch;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<QueryOptions, Error> {
        if self.first.is_some() && self.last.is_some() {
            return Err(Error::InvalidQueryOptions(
                "first and last are mutually exclusive".into(),
            ));
        }
        Ok(QueryOptions {
            filter: self.filter,
            order: self.order,
            after: self.after,
            before: self.before,
            first: non_negative("first", self.first)?,
            last: non_negative("last", self.last)?,
            fetch_total_count: self.fetch_total_count,
        })
    }
}

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<u64>, Error> {
    value
        .map(|v| {
            u64::try_from(v)
                .map_err(|_| Error::InvalidQueryOptions(format!("{} must not be negative, got {}", name, v)))
        })
        .transpose()
}

/// A blake3 fingerprint used in relationship cache keys: of a
/// [`QueryOptions`] value (its canonical JSON), or of the relationships
/// selected below a plan node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionsKey([u8; 32]);

impl OptionsKey {
    pub(crate) fn from_hasher(hasher: &blake3::Hasher) -> Self {
        OptionsKey(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for OptionsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptionsKey({})", self)
    }
}

impl fmt::Display for OptionsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}
