// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent graph store capability.
//!
//! Defines what the proxy needs from a transactional property-graph store.
//! The storage engine, query execution and indexing live behind these
//! traits; the proxy only ever talks to them through:
//!
//! 1. [`GraphStore`]: sessions, write transactions, snapshots and commit hooks
//! 2. [`StoreTransaction`]: the mutations performed inside one transaction
//! 3. [`GraphRead`]: point lookups and lazy enumeration over one consistent view
//! 4. [`TransactionEventHandler`]: the commit hook receiving [`TransactionData`]
//!
//! [`MemoryStore`] is the in-process reference implementation.
//!
//! # Example
//!
//! ```rust
//! use graphdb_proxy::store::{
//!     Entity, GraphRead, GraphStore, MemoryStore, RelationshipKind, StoreTransaction,
//! };
//! use serde_json::json;
//!
//! let store = MemoryStore::in_memory();
//!
//! let mut tx = store.begin().unwrap();
//! let a = tx.create_node().unwrap();
//! let b = tx.create_node().unwrap();
//! tx.set_property(Entity::Node(a), "id", json!("a")).unwrap();
//! tx.create_relationship(a, b, RelationshipKind::Directed).unwrap();
//! tx.success();
//! tx.finish().unwrap();
//!
//! let view = store.snapshot().unwrap();
//! assert_eq!(view.find_node("id", &json!("a")), Some(a));
//! ```

mod memory;

pub use memory::{MemoryConnector, MemoryStore, IN_MEMORY_PATH};

use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Property map of a node or relationship.
pub type Properties = BTreeMap<String, Value>;

/// Store-internal identity of a node. Meaningful only while its session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHandle(pub u64);

/// Store-internal identity of a relationship. Meaningful only while its session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipHandle(pub u64);

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RelationshipHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either kind of property-carrying entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Entity {
    Node(NodeHandle),
    Relationship(RelationshipHandle),
}

/// The two relationship types the proxy writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Directed,
    Undirected,
}

impl RelationshipKind {
    /// Map an edge's directed flag onto a relationship kind.
    pub fn from_directed(directed: bool) -> Self {
        if directed {
            RelationshipKind::Directed
        } else {
            RelationshipKind::Undirected
        }
    }

    pub fn is_directed(&self) -> bool {
        matches!(self, RelationshipKind::Directed)
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub handle: NodeHandle,
    pub properties: Properties,
}

/// Point-in-time view of a relationship. Endpoints are handles, not references.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub handle: RelationshipHandle,
    pub kind: RelationshipKind,
    pub start: NodeHandle,
    pub end: NodeHandle,
    pub properties: Properties,
}

/// Read access over one consistent view of the graph.
///
/// Snapshots and transactions both implement this. Iteration is lazy;
/// nothing is materialized beyond the current item.
pub trait GraphRead {
    fn node(&self, node: NodeHandle) -> Option<NodeRecord>;

    fn relationship(&self, rel: RelationshipHandle) -> Option<RelationshipRecord>;

    fn property(&self, entity: Entity, key: &str) -> Option<Value>;

    fn property_keys(&self, entity: Entity) -> Vec<String>;

    fn all_nodes(&self) -> Box<dyn Iterator<Item = NodeRecord> + '_>;

    fn all_relationships(&self) -> Box<dyn Iterator<Item = RelationshipRecord> + '_>;

    /// First node whose property `key` equals `value`.
    fn find_node(&self, key: &str, value: &Value) -> Option<NodeHandle>;

    /// First relationship whose property `key` equals `value`.
    fn find_relationship(&self, key: &str, value: &Value) -> Option<RelationshipHandle>;

    /// Relationships starting or ending at `node`.
    fn relationships_of(&self, node: NodeHandle) -> Vec<RelationshipHandle>;

    fn node_count(&self) -> usize {
        self.all_nodes().count()
    }

    fn relationship_count(&self) -> usize {
        self.all_relationships().count()
    }
}

/// How a finished transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

/// Mutations performed inside one store transaction.
///
/// The lifecycle is: [`GraphStore::begin`], any number of mutations, then
/// exactly one of [`success`](Self::success) or [`failure`](Self::failure),
/// then [`finish`](Self::finish). A transaction that is never marked
/// successful rolls back on `finish`; one that is dropped without `finish`
/// rolls back as well.
pub trait StoreTransaction: GraphRead {
    fn create_node(&mut self) -> StoreResult<NodeHandle>;

    /// Delete a node that has no relationships.
    fn delete_node(&mut self, node: NodeHandle) -> StoreResult<()>;

    /// Delete a node together with every incident relationship.
    ///
    /// Returns the number of relationships removed.
    fn detach_delete_node(&mut self, node: NodeHandle) -> StoreResult<usize>;

    fn create_relationship(
        &mut self,
        start: NodeHandle,
        end: NodeHandle,
        kind: RelationshipKind,
    ) -> StoreResult<RelationshipHandle>;

    fn delete_relationship(&mut self, rel: RelationshipHandle) -> StoreResult<()>;

    fn set_property(&mut self, entity: Entity, key: &str, value: Value) -> StoreResult<()>;

    /// Remove a property, returning its previous value.
    fn remove_property(&mut self, entity: Entity, key: &str) -> StoreResult<Option<Value>>;

    /// Delete every relationship and node.
    fn delete_all(&mut self) -> StoreResult<()>;

    /// Mark the transaction for commit.
    fn success(&mut self);

    /// Mark the transaction for rollback. Wins over an earlier `success`.
    fn failure(&mut self);

    /// Commit or roll back, firing commit hooks on commit.
    fn finish(self: Box<Self>) -> StoreResult<TransactionOutcome>;
}

/// A property assignment or removal recorded in a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry<H> {
    pub entity: H,
    pub key: String,
    /// Value after commit (`None` for removals).
    pub value: Option<Value>,
    /// Last committed value before this transaction.
    pub previous_value: Option<Value>,
}

/// The delta of one transaction, handed to commit hooks.
///
/// Deleted entities are captured as they were before the transaction;
/// everything else as it will be after commit. Properties of deleted
/// entities are not reported.
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    pub created_nodes: Vec<NodeRecord>,
    pub deleted_nodes: Vec<NodeRecord>,
    pub created_relationships: Vec<RelationshipRecord>,
    pub deleted_relationships: Vec<RelationshipRecord>,
    pub assigned_node_properties: Vec<PropertyEntry<NodeHandle>>,
    pub removed_node_properties: Vec<PropertyEntry<NodeHandle>>,
    pub assigned_relationship_properties: Vec<PropertyEntry<RelationshipHandle>>,
    pub removed_relationship_properties: Vec<PropertyEntry<RelationshipHandle>>,
    /// Every node referenced anywhere above (including relationship endpoints).
    pub nodes: BTreeMap<NodeHandle, NodeRecord>,
    /// Every relationship referenced anywhere above.
    pub relationships: BTreeMap<RelationshipHandle, RelationshipRecord>,
}

impl TransactionData {
    /// Look up a node referenced by this transaction.
    pub fn node(&self, node: NodeHandle) -> Option<&NodeRecord> {
        self.nodes.get(&node)
    }

    /// Look up a relationship referenced by this transaction.
    pub fn relationship(&self, rel: RelationshipHandle) -> Option<&RelationshipRecord> {
        self.relationships.get(&rel)
    }

    pub fn is_created_node(&self, node: NodeHandle) -> bool {
        self.created_nodes.iter().any(|n| n.handle == node)
    }

    pub fn is_created_relationship(&self, rel: RelationshipHandle) -> bool {
        self.created_relationships.iter().any(|r| r.handle == rel)
    }

    /// True when the transaction changed nothing.
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned_node_properties.is_empty()
            && self.removed_node_properties.is_empty()
            && self.assigned_relationship_properties.is_empty()
            && self.removed_relationship_properties.is_empty()
    }
}

/// Commit hook registered with a [`GraphStore`].
///
/// Hooks run synchronously on the thread that commits. They must not open a
/// write transaction on the same store.
pub trait TransactionEventHandler: Send + Sync {
    /// Called before the transaction becomes durable. Entities are still
    /// readable. Returning an error rolls the transaction back.
    fn before_commit(&self, data: &TransactionData) -> StoreResult<()>;

    /// Called once the transaction is durable.
    fn after_commit(&self, data: &TransactionData);

    /// Called when a transaction is rolled back after `before_commit` ran.
    fn after_rollback(&self, data: &TransactionData);
}

/// Registration token for a commit hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// One open store session.
pub trait GraphStore: Send + Sync {
    /// Start a write transaction. Blocks while another one is in progress.
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// A read-only view of the last committed state.
    fn snapshot(&self) -> StoreResult<Box<dyn GraphRead>>;

    fn register_handler(&self, handler: Arc<dyn TransactionEventHandler>) -> HandlerId;

    /// Returns `false` if the handler was not registered.
    fn unregister_handler(&self, id: HandlerId) -> bool;

    /// Close the session. Later calls to `begin`/`snapshot` fail with `Closed`.
    fn shutdown(&self) -> StoreResult<()>;

    fn is_open(&self) -> bool;
}

/// Opens store sessions. The proxy calls this once per `connect`.
pub trait StoreConnector: Send + Sync {
    fn open(&self, path: &str) -> StoreResult<Arc<dyn GraphStore>>;
}
