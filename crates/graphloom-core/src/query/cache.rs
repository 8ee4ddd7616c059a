//! Request-scoped relationship result cache.
//!
//! Every node identity loaded during a request owns one [`RelationshipCache`]
//! mapping `(relationship, options fingerprint, nested selection fingerprint)`
//! to the result computed for it. Results planned into the main statement and
//! results loaded ad hoc later share the same entries, so both paths observe
//! identical data.
//!
//! Keys do not include the permission. A [`RequestCache`] must only be used
//! with the single permission of the request it belongs to.
//!
//! An entry that is still being computed rejects further lookups with
//! [`Error::ReentrantComputation`]. A computation that fails or is dropped
//! releases its entry so a later access can retry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::options::OptionsKey;
use super::planner::NodeQuery;
use super::result::RelationshipResult;
use crate::catalog::RelationshipDef;
use crate::error::Error;

/// Cache key: qualified relationship name, options fingerprint and the
/// fingerprint of the relationships selected below it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub relationship: String,
    pub options: OptionsKey,
    pub selection: OptionsKey,
}

impl CacheKey {
    pub fn new(relationship: impl Into<String>, options: OptionsKey, selection: OptionsKey) -> Self {
        Self {
            relationship: relationship.into(),
            options,
            selection,
        }
    }

    /// Key of the plan `query` for `relationship`.
    pub fn for_query(relationship: &RelationshipDef, query: &NodeQuery) -> Self {
        Self::new(
            relationship.qualified_name(),
            query.options.key(),
            query.selection_key(),
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.relationship, self.options, self.selection)
    }
}

#[derive(Debug)]
enum Slot {
    Computing,
    Ready(Arc<RelationshipResult>),
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Lookups answered from a ready entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to compute.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Relationship results of one node identity.
#[derive(Debug, Default)]
pub struct RelationshipCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    stats: CacheStats,
}

impl RelationshipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a ready result.
    ///
    /// Returns `Ok(None)` when nothing is cached and fails while the entry is
    /// being computed.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Arc<RelationshipResult>>, Error> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(result)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(result.clone()))
            }
            Some(Slot::Computing) => Err(reentrant(key)),
            None => Ok(None),
        }
    }

    /// Store a result computed elsewhere and return the cached one.
    ///
    /// An existing ready result is kept. While the entry is being computed
    /// the value is returned without being stored.
    pub fn insert_ready(&self, key: CacheKey, result: RelationshipResult) -> Arc<RelationshipResult> {
        let mut slots = self.slots.lock();
        match slots.get(&key) {
            Some(Slot::Ready(existing)) => existing.clone(),
            Some(Slot::Computing) => Arc::new(result),
            None => {
                let result = Arc::new(result);
                slots.insert(key, Slot::Ready(result.clone()));
                result
            }
        }
    }

    /// Get a result, computing it on first access.
    ///
    /// Looking up the same key from within `compute` fails with
    /// [`Error::ReentrantComputation`].
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<Arc<RelationshipResult>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RelationshipResult, Error>>,
    {
        {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(result)) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(result.clone());
                }
                Some(Slot::Computing) => return Err(reentrant(&key)),
                None => {
                    slots.insert(key.clone(), Slot::Computing);
                }
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "computing relationship result");

        let guard = ComputingGuard {
            cache: self,
            key: Some(key),
        };
        let result = Arc::new(compute().await?);
        guard.complete(result.clone());
        Ok(result)
    }

    /// Whether an entry is being computed.
    pub fn is_computing(&self, key: &CacheKey) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Computing))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Releases a computing slot unless the computation completed.
struct ComputingGuard<'a> {
    cache: &'a RelationshipCache,
    key: Option<CacheKey>,
}

impl ComputingGuard<'_> {
    fn complete(mut self, result: Arc<RelationshipResult>) {
        if let Some(key) = self.key.take() {
            self.cache.slots.lock().insert(key, Slot::Ready(result));
        }
    }
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut slots = self.cache.slots.lock();
            if matches!(slots.get(&key), Some(Slot::Computing)) {
                slots.remove(&key);
            }
        }
    }
}

fn reentrant(key: &CacheKey) -> Error {
    Error::ReentrantComputation(key.to_string())
}

/// Relationship caches of every node identity seen during one request.
///
/// Results depend on the permission they were computed under; share a
/// request cache only between queries made with the same permission.
#[derive(Debug, Default)]
pub struct RequestCache {
    nodes: Mutex<HashMap<(String, String), Arc<RelationshipCache>>>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache of a node identity, created on first use.
    pub fn for_node(&self, type_name: &str, id: &str) -> Arc<RelationshipCache> {
        self.nodes
            .lock()
            .entry((type_name.to_string(), id.to_string()))
            .or_default()
            .clone()
    }

    /// Number of node identities seen.
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}
