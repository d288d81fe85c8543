// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded identifier cache: external id → store handle.
//!
//! Each connected session owns two of these, one for nodes and one for
//! relationships. Entries are created lazily on first resolution and leave
//! the cache only through LRU eviction or explicit revocation.
//!
//! # Locking
//!
//! Every operation runs behind one mutex, and a miss holds that mutex for
//! the full store round-trip. Two concurrent misses on different keys are
//! therefore serialized.
//!
//! ```text
//! get(key) ──lock──► hit?  ──yes──► promote to MRU ──► value
//!                      │
//!                      no
//!                      ▼
//!                 resolver.resolve(key) ──err──► Lookup error (cache unchanged)
//!                      │
//!                      ok
//!                      ▼
//!                 insert at MRU (evict LRU if full) ──► value
//! ```

use crate::error::{EntityKind, ProxyError, Result};
use crate::metrics;
use crate::store::{GraphRead, GraphStore, NodeHandle, Properties, RelationshipHandle};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Property key holding an entity's external id.
pub const ID_ATTRIBUTE: &str = "id";

/// Creates a cache value for a key the cache has not seen.
pub trait Resolve<K, V>: Send + Sync {
    /// Look the key up in the backing store.
    ///
    /// Return [`ProxyError::Lookup`] when nothing matches.
    fn resolve(&self, key: &K) -> Result<V>;
}

impl<K, V, F> Resolve<K, V> for F
where
    F: Fn(&K) -> Result<V> + Send + Sync,
{
    fn resolve(&self, key: &K) -> Result<V> {
        self(key)
    }
}

/// Strict-LRU cache with lazy creation through a [`Resolve`] implementation.
pub struct IdentifierCache<K, V, R> {
    entries: Mutex<LruCache<K, V>>,
    resolver: R,
    name: &'static str,
}

impl<K, V, R> IdentifierCache<K, V, R>
where
    K: Hash + Eq + Clone,
    V: Clone,
    R: Resolve<K, V>,
{
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(name: &'static str, capacity: NonZeroUsize, resolver: R) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            resolver,
            name,
        }
    }

    /// Return the value for `key`, resolving and inserting it on a miss.
    ///
    /// A successful call always leaves `key` as the most recently used entry.
    /// A failed resolution leaves the cache untouched.
    pub fn get(&self, key: &K) -> Result<V> {
        let mut entries = self.entries.lock();

        if let Some(value) = entries.get(key) {
            metrics::record_cache_hit(self.name);
            return Ok(value.clone());
        }

        metrics::record_cache_miss(self.name);
        let value = self.resolver.resolve(key)?;

        if entries.push(key.clone(), value.clone()).is_some() {
            metrics::record_cache_eviction(self.name);
            trace!(cache = self.name, "Evicted least recently used entry");
        }

        Ok(value)
    }

    /// Non-mutating membership check. Does not touch recency.
    pub fn has(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// Drop `key` from the cache. No-op if absent.
    pub fn revoke_key(&self, key: &K) {
        if self.entries.lock().pop(key).is_some() {
            metrics::record_cache_revocation(self.name);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Node id cache for one store session.
pub type NodeCache = IdentifierCache<String, NodeHandle, NodeResolver>;

/// Relationship id cache for one store session.
pub type EdgeCache = IdentifierCache<String, RelationshipHandle, RelationshipResolver>;

/// Find a node by external id in `view`.
///
/// Tries the reserved id attribute first, then falls back to the raw handle
/// when the key is numeric and such a node exists.
pub fn lookup_node<V: GraphRead + ?Sized>(view: &V, key: &str) -> Option<NodeHandle> {
    view.find_node(ID_ATTRIBUTE, &Value::String(key.to_string()))
        .or_else(|| {
            let handle = NodeHandle(parse_handle(key)?);
            view.node(handle).map(|_| handle)
        })
}

/// Find a relationship by external id in `view`. Same fallback as [`lookup_node`].
pub fn lookup_relationship<V: GraphRead + ?Sized>(view: &V, key: &str) -> Option<RelationshipHandle> {
    view.find_relationship(ID_ATTRIBUTE, &Value::String(key.to_string()))
        .or_else(|| {
            let handle = RelationshipHandle(parse_handle(key)?);
            view.relationship(handle).map(|_| handle)
        })
}

/// External id of an entity: its reserved id attribute, or the handle's
/// string form when the attribute is missing.
pub fn external_id(properties: &Properties, handle: impl std::fmt::Display) -> String {
    match properties.get(ID_ATTRIBUTE) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => handle.to_string(),
    }
}

fn parse_handle(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Resolves node ids against the last committed state of a store.
pub struct NodeResolver {
    store: Arc<dyn GraphStore>,
}

impl NodeResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

impl Resolve<String, NodeHandle> for NodeResolver {
    fn resolve(&self, key: &String) -> Result<NodeHandle> {
        let view = self.store.snapshot()?;
        lookup_node(view.as_ref(), key).ok_or_else(|| ProxyError::lookup(EntityKind::Node, key))
    }
}

/// Resolves relationship ids against the last committed state of a store.
pub struct RelationshipResolver {
    store: Arc<dyn GraphStore>,
}

impl RelationshipResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

impl Resolve<String, RelationshipHandle> for RelationshipResolver {
    fn resolve(&self, key: &String) -> Result<RelationshipHandle> {
        let view = self.store.snapshot()?;
        lookup_relationship(view.as_ref(), key)
            .ok_or_else(|| ProxyError::lookup(EntityKind::Edge, key))
    }
}
