// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process reference implementation of the store capability.
//!
//! # Isolation
//!
//! Committed state is an immutable `Arc<GraphState>`. Snapshots clone the
//! `Arc`, so a reader keeps one consistent cut for as long as it holds it.
//! A write transaction copies the state on its first mutation and installs
//! the copy on commit.
//!
//! Only one write transaction runs at a time: [`begin`](GraphStore::begin)
//! blocks until the previous one has installed its state or been dropped.
//! Pre-commit hooks run while the writer slot is held; post-commit hooks
//! run after it is released, so they may write to the store again. A thread
//! that calls `begin` while already holding the slot gets
//! [`StoreError::WriterHeld`].
//!
//! # Durability
//!
//! When opened on a directory, every commit rewrites `graph.json` in that
//! directory (write to a temp file, then rename) before the new state is
//! installed. Opening on [`IN_MEMORY_PATH`] keeps everything in memory.
//!
//! ```text
//! begin() ──► mutate (copy-on-write) ──► success() ──► finish()
//!                                                        │
//!                         before_commit hooks ◄──────────┤
//!                         persist graph.json  ◄──────────┤
//!                         install new state   ◄──────────┤
//!                         release writer slot ◄──────────┤
//!                         after_commit hooks  ◄──────────┘
//! ```

use super::{
    Entity, GraphRead, GraphStore, HandlerId, NodeHandle, NodeRecord, Properties, PropertyEntry,
    RelationshipHandle, RelationshipKind, RelationshipRecord, StoreConnector, StoreTransaction,
    TransactionData, TransactionEventHandler, TransactionOutcome,
};
use crate::error::{StoreError, StoreResult};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Path that opens a store without any file backing.
pub const IN_MEMORY_PATH: &str = ":memory:";

const SNAPSHOT_FILE: &str = "graph.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRelationship {
    start: NodeHandle,
    end: NodeHandle,
    kind: RelationshipKind,
    properties: Properties,
}

/// The whole graph: an arena of nodes and relationships indexed by handle.
#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<NodeHandle, Properties>,
    relationships: BTreeMap<RelationshipHandle, StoredRelationship>,
    next_node: u64,
    next_relationship: u64,
}

/// On-disk form of [`GraphState`].
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    next_node: u64,
    next_relationship: u64,
    nodes: Vec<(NodeHandle, Properties)>,
    relationships: Vec<(RelationshipHandle, StoredRelationship)>,
}

impl From<&GraphState> for SnapshotFile {
    fn from(state: &GraphState) -> Self {
        Self {
            next_node: state.next_node,
            next_relationship: state.next_relationship,
            nodes: state.nodes.iter().map(|(h, p)| (*h, p.clone())).collect(),
            relationships: state
                .relationships
                .iter()
                .map(|(h, r)| (*h, r.clone()))
                .collect(),
        }
    }
}

impl From<SnapshotFile> for GraphState {
    fn from(file: SnapshotFile) -> Self {
        Self {
            nodes: file.nodes.into_iter().collect(),
            relationships: file.relationships.into_iter().collect(),
            next_node: file.next_node,
            next_relationship: file.next_relationship,
        }
    }
}

impl GraphState {
    fn contains(&self, entity: Entity) -> bool {
        match entity {
            Entity::Node(h) => self.nodes.contains_key(&h),
            Entity::Relationship(h) => self.relationships.contains_key(&h),
        }
    }

    fn properties(&self, entity: Entity) -> Option<&Properties> {
        match entity {
            Entity::Node(h) => self.nodes.get(&h),
            Entity::Relationship(h) => self.relationships.get(&h).map(|r| &r.properties),
        }
    }

    fn properties_mut(&mut self, entity: Entity) -> Option<&mut Properties> {
        match entity {
            Entity::Node(h) => self.nodes.get_mut(&h),
            Entity::Relationship(h) => self.relationships.get_mut(&h).map(|r| &mut r.properties),
        }
    }

    fn relationship_record(handle: RelationshipHandle, rel: &StoredRelationship) -> RelationshipRecord {
        RelationshipRecord {
            handle,
            kind: rel.kind,
            start: rel.start,
            end: rel.end,
            properties: rel.properties.clone(),
        }
    }
}

impl GraphRead for GraphState {
    fn node(&self, node: NodeHandle) -> Option<NodeRecord> {
        self.nodes.get(&node).map(|properties| NodeRecord {
            handle: node,
            properties: properties.clone(),
        })
    }

    fn relationship(&self, rel: RelationshipHandle) -> Option<RelationshipRecord> {
        self.relationships
            .get(&rel)
            .map(|stored| Self::relationship_record(rel, stored))
    }

    fn property(&self, entity: Entity, key: &str) -> Option<Value> {
        self.properties(entity).and_then(|p| p.get(key).cloned())
    }

    fn property_keys(&self, entity: Entity) -> Vec<String> {
        self.properties(entity)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn all_nodes(&self) -> Box<dyn Iterator<Item = NodeRecord> + '_> {
        Box::new(self.nodes.iter().map(|(handle, properties)| NodeRecord {
            handle: *handle,
            properties: properties.clone(),
        }))
    }

    fn all_relationships(&self) -> Box<dyn Iterator<Item = RelationshipRecord> + '_> {
        Box::new(
            self.relationships
                .iter()
                .map(|(handle, stored)| Self::relationship_record(*handle, stored)),
        )
    }

    fn find_node(&self, key: &str, value: &Value) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, properties)| properties.get(key) == Some(value))
            .map(|(handle, _)| *handle)
    }

    fn find_relationship(&self, key: &str, value: &Value) -> Option<RelationshipHandle> {
        self.relationships
            .iter()
            .find(|(_, stored)| stored.properties.get(key) == Some(value))
            .map(|(handle, _)| *handle)
    }

    fn relationships_of(&self, node: NodeHandle) -> Vec<RelationshipHandle> {
        self.relationships
            .iter()
            .filter(|(_, stored)| stored.start == node || stored.end == node)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}

/// Forward every [`GraphRead`] method to the `GraphState` returned by `$view`.
macro_rules! delegate_graph_read {
    ($ty:ty, $self_:ident => $view:expr) => {
        impl GraphRead for $ty {
            fn node(&$self_, node: NodeHandle) -> Option<NodeRecord> {
                $view.node(node)
            }
            fn relationship(&$self_, rel: RelationshipHandle) -> Option<RelationshipRecord> {
                $view.relationship(rel)
            }
            fn property(&$self_, entity: Entity, key: &str) -> Option<Value> {
                $view.property(entity, key)
            }
            fn property_keys(&$self_, entity: Entity) -> Vec<String> {
                $view.property_keys(entity)
            }
            fn all_nodes(&$self_) -> Box<dyn Iterator<Item = NodeRecord> + '_> {
                $view.all_nodes()
            }
            fn all_relationships(&$self_) -> Box<dyn Iterator<Item = RelationshipRecord> + '_> {
                $view.all_relationships()
            }
            fn find_node(&$self_, key: &str, value: &Value) -> Option<NodeHandle> {
                $view.find_node(key, value)
            }
            fn find_relationship(&$self_, key: &str, value: &Value) -> Option<RelationshipHandle> {
                $view.find_relationship(key, value)
            }
            fn relationships_of(&$self_, node: NodeHandle) -> Vec<RelationshipHandle> {
                $view.relationships_of(node)
            }
            fn node_count(&$self_) -> usize {
                $view.node_count()
            }
            fn relationship_count(&$self_) -> usize {
                $view.relationship_count()
            }
        }
    };
}

/// Read-only view over one committed state.
struct MemorySnapshot {
    state: Arc<GraphState>,
}

delegate_graph_read!(MemorySnapshot, self => self.state);

/// Single-writer slot. Held from `begin()` until the transaction commits
/// its state or is dropped.
///
/// The slot remembers which thread holds it, so a commit hook that feeds an
/// event back into the same store fails with [`StoreError::WriterHeld`]
/// instead of waiting on itself.
#[derive(Default)]
struct WriterGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl WriterGate {
    fn acquire(&self) -> StoreResult<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match *owner {
                None => break,
                Some(holder) if holder == me => return Err(StoreError::WriterHeld),
                Some(_) => self.released.wait(&mut owner),
            }
        }
        *owner = Some(me);
        Ok(())
    }

    fn release(&self) {
        *self.owner.lock() = None;
        self.released.notify_one();
    }
}

struct StoreInner {
    /// Snapshot file (None for in-memory stores)
    file: Option<PathBuf>,
    state: RwLock<Arc<GraphState>>,
    writer: WriterGate,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn TransactionEventHandler>)>>,
    next_handler: AtomicU64,
    open: AtomicBool,
}

impl StoreInner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn TransactionEventHandler>> {
        self.handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn persist(&self, state: &GraphState) -> StoreResult<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let persistence = |message: String| StoreError::Persistence {
            path: file.display().to_string(),
            message,
        };

        let bytes = serde_json::to_vec(&SnapshotFile::from(state))?;
        let tmp = file.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| persistence(e.to_string()))?;
        std::fs::rename(&tmp, file).map_err(|e| persistence(e.to_string()))?;
        Ok(())
    }
}

/// In-process transactional property graph.
///
/// Cloning is cheap and yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store with no file backing.
    pub fn in_memory() -> Self {
        Self::with_state(None, GraphState::default())
    }

    /// Open a store rooted at `path`.
    ///
    /// [`IN_MEMORY_PATH`] yields an in-memory store. Any other path is
    /// treated as a directory (created if missing) holding `graph.json`;
    /// an existing snapshot is loaded.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if path == Path::new(IN_MEMORY_PATH) {
            return Ok(Self::in_memory());
        }

        std::fs::create_dir_all(path)?;
        let file = path.join(SNAPSHOT_FILE);

        let state = if file.exists() {
            let bytes = std::fs::read(&file)?;
            let snapshot: SnapshotFile = serde_json::from_slice(&bytes)?;
            GraphState::from(snapshot)
        } else {
            GraphState::default()
        };

        info!(
            path = %path.display(),
            nodes = state.nodes.len(),
            relationships = state.relationships.len(),
            "Opened graph store"
        );

        Ok(Self::with_state(Some(file), state))
    }

    fn with_state(file: Option<PathBuf>, state: GraphState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                file,
                state: RwLock::new(Arc::new(state)),
                writer: WriterGate::default(),
                handlers: RwLock::new(Vec::new()),
                next_handler: AtomicU64::new(0),
                open: AtomicBool::new(true),
            }),
        }
    }

    /// The snapshot file backing this store, if any.
    pub fn snapshot_file(&self) -> Option<&Path> {
        self.inner.file.as_deref()
    }

    /// Number of registered commit hooks.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }
}

impl GraphStore for MemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.inner.ensure_open()?;
        self.inner.writer.acquire()?;

        // Shutdown may have won the race for the writer slot
        if let Err(e) = self.inner.ensure_open() {
            self.inner.writer.release();
            return Err(e);
        }

        let base = Arc::clone(&self.inner.state.read());
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            base,
            working: None,
            delta: Delta::default(),
            mark: Mark::Undecided,
            holds_writer: true,
        }))
    }

    fn snapshot(&self) -> StoreResult<Box<dyn GraphRead>> {
        self.inner.ensure_open()?;
        let state = Arc::clone(&self.inner.state.read());
        Ok(Box::new(MemorySnapshot { state }))
    }

    fn register_handler(&self, handler: Arc<dyn TransactionEventHandler>) -> HandlerId {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, handler));
        debug!(handler_id = id.0, "Registered transaction handler");
        id
    }

    fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        handlers.len() != before
    }

    fn shutdown(&self) -> StoreResult<()> {
        // Wait for the in-flight writer, if any
        self.inner.writer.acquire()?;
        let was_open = self.inner.open.swap(false, Ordering::AcqRel);
        let result = if was_open {
            let state = Arc::clone(&self.inner.state.read());
            self.inner.persist(&state)
        } else {
            Ok(())
        };
        self.inner.writer.release();

        if was_open {
            info!(
                path = ?self.inner.file,
                "Graph store shut down"
            );
        }
        result
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }
}

/// Opens [`MemoryStore`] sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryConnector;

impl StoreConnector for MemoryConnector {
    fn open(&self, path: &str) -> StoreResult<Arc<dyn GraphStore>> {
        Ok(Arc::new(MemoryStore::open(path)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Undecided,
    Success,
    Failure,
}

/// Changes recorded by a transaction, relative to its base state.
#[derive(Default)]
struct Delta {
    created_nodes: BTreeSet<NodeHandle>,
    deleted_nodes: BTreeMap<NodeHandle, NodeRecord>,
    created_relationships: BTreeSet<RelationshipHandle>,
    deleted_relationships: BTreeMap<RelationshipHandle, RelationshipRecord>,
    /// (entity, key) -> last committed value
    assigned: BTreeMap<(Entity, String), Option<Value>>,
    /// (entity, key) -> last committed value
    removed: BTreeMap<(Entity, String), Value>,
}

impl Delta {
    fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned.is_empty()
            && self.removed.is_empty()
    }

    fn is_created(&self, entity: Entity) -> bool {
        match entity {
            Entity::Node(h) => self.created_nodes.contains(&h),
            Entity::Relationship(h) => self.created_relationships.contains(&h),
        }
    }

    fn forget_properties(&mut self, entity: Entity) {
        self.assigned.retain(|(e, _), _| *e != entity);
        self.removed.retain(|(e, _), _| *e != entity);
    }

    fn into_data(self, before: &GraphState, after: &GraphState) -> TransactionData {
        let mut data = TransactionData::default();

        data.created_nodes = self
            .created_nodes
            .iter()
            .filter_map(|h| after.node(*h))
            .collect();
        data.created_relationships = self
            .created_relationships
            .iter()
            .filter_map(|h| after.relationship(*h))
            .collect();
        data.deleted_nodes = self.deleted_nodes.into_values().collect();
        data.deleted_relationships = self.deleted_relationships.into_values().collect();

        for ((entity, key), previous_value) in self.assigned {
            let value = after.property(entity, &key);
            match entity {
                Entity::Node(h) => data.assigned_node_properties.push(PropertyEntry {
                    entity: h,
                    key,
                    value,
                    previous_value,
                }),
                Entity::Relationship(h) => data.assigned_relationship_properties.push(PropertyEntry {
                    entity: h,
                    key,
                    value,
                    previous_value,
                }),
            }
        }

        for ((entity, key), previous) in self.removed {
            match entity {
                Entity::Node(h) => data.removed_node_properties.push(PropertyEntry {
                    entity: h,
                    key,
                    value: None,
                    previous_value: Some(previous),
                }),
                Entity::Relationship(h) => data.removed_relationship_properties.push(PropertyEntry {
                    entity: h,
                    key,
                    value: None,
                    previous_value: Some(previous),
                }),
            }
        }

        // Reference maps: deleted entities as they were, everything else as it will be
        for record in data.deleted_nodes.iter() {
            data.nodes.insert(record.handle, record.clone());
        }
        for record in data.deleted_relationships.iter() {
            data.relationships.insert(record.handle, record.clone());
        }

        let mut relationship_refs: Vec<RelationshipHandle> =
            data.created_relationships.iter().map(|r| r.handle).collect();
        relationship_refs.extend(data.assigned_relationship_properties.iter().map(|p| p.entity));
        relationship_refs.extend(data.removed_relationship_properties.iter().map(|p| p.entity));
        for handle in relationship_refs {
            if data.relationships.contains_key(&handle) {
                continue;
            }
            if let Some(record) = after.relationship(handle).or_else(|| before.relationship(handle)) {
                data.relationships.insert(handle, record);
            }
        }

        let mut node_refs: Vec<NodeHandle> = data.created_nodes.iter().map(|n| n.handle).collect();
        node_refs.extend(data.assigned_node_properties.iter().map(|p| p.entity));
        node_refs.extend(data.removed_node_properties.iter().map(|p| p.entity));
        node_refs.extend(data.relationships.values().flat_map(|r| [r.start, r.end]));
        for handle in node_refs {
            if data.nodes.contains_key(&handle) {
                continue;
            }
            if let Some(record) = after.node(handle).or_else(|| before.node(handle)) {
                data.nodes.insert(handle, record);
            }
        }

        data
    }
}

/// A write transaction on a [`MemoryStore`].
struct MemoryTransaction {
    inner: Arc<StoreInner>,
    /// Committed state when the transaction began
    base: Arc<GraphState>,
    /// Copy-on-write working state (None until the first mutation)
    working: Option<GraphState>,
    delta: Delta,
    mark: Mark,
    /// Cleared once the writer slot has been handed back
    holds_writer: bool,
}

delegate_graph_read!(MemoryTransaction, self => self.view());

impl MemoryTransaction {
    fn release_writer(&mut self) {
        if std::mem::take(&mut self.holds_writer) {
            self.inner.writer.release();
        }
    }

    fn view(&self) -> &GraphState {
        self.working.as_ref().unwrap_or(self.base.as_ref())
    }

    fn working_mut(&mut self) -> &mut GraphState {
        let base = &self.base;
        self.working.get_or_insert_with(|| GraphState::clone(base))
    }

    fn ensure_exists(&self, entity: Entity) -> StoreResult<()> {
        if self.view().contains(entity) {
            return Ok(());
        }
        Err(match entity {
            Entity::Node(h) => StoreError::NodeNotFound(h),
            Entity::Relationship(h) => StoreError::RelationshipNotFound(h),
        })
    }

    fn remove_node_unchecked(&mut self, node: NodeHandle) {
        self.working_mut().nodes.remove(&node);
        self.delta.forget_properties(Entity::Node(node));
        if !self.delta.created_nodes.remove(&node) {
            if let Some(record) = self.base.node(node) {
                self.delta.deleted_nodes.insert(node, record);
            }
        }
    }

    fn remove_relationship_unchecked(&mut self, rel: RelationshipHandle) {
        self.working_mut().relationships.remove(&rel);
        self.delta.forget_properties(Entity::Relationship(rel));
        if !self.delta.created_relationships.remove(&rel) {
            if let Some(record) = self.base.relationship(rel) {
                self.delta.deleted_relationships.insert(rel, record);
            }
        }
    }
}

impl StoreTransaction for MemoryTransaction {
    fn create_node(&mut self) -> StoreResult<NodeHandle> {
        let state = self.working_mut();
        let handle = NodeHandle(state.next_node);
        state.next_node += 1;
        state.nodes.insert(handle, Properties::new());
        self.delta.created_nodes.insert(handle);
        Ok(handle)
    }

    fn delete_node(&mut self, node: NodeHandle) -> StoreResult<()> {
        self.ensure_exists(Entity::Node(node))?;
        let relationships = self.view().relationships_of(node).len();
        if relationships > 0 {
            return Err(StoreError::NodeHasRelationships {
                node,
                relationships,
            });
        }
        self.remove_node_unchecked(node);
        Ok(())
    }

    fn detach_delete_node(&mut self, node: NodeHandle) -> StoreResult<usize> {
        self.ensure_exists(Entity::Node(node))?;
        let relationships = self.view().relationships_of(node);
        for rel in &relationships {
            self.remove_relationship_unchecked(*rel);
        }
        self.remove_node_unchecked(node);
        Ok(relationships.len())
    }

    fn create_relationship(
        &mut self,
        start: NodeHandle,
        end: NodeHandle,
        kind: RelationshipKind,
    ) -> StoreResult<RelationshipHandle> {
        self.ensure_exists(Entity::Node(start))?;
        self.ensure_exists(Entity::Node(end))?;

        let state = self.working_mut();
        let handle = RelationshipHandle(state.next_relationship);
        state.next_relationship += 1;
        state.relationships.insert(
            handle,
            StoredRelationship {
                start,
                end,
                kind,
                properties: Properties::new(),
            },
        );
        self.delta.created_relationships.insert(handle);
        Ok(handle)
    }

    fn delete_relationship(&mut self, rel: RelationshipHandle) -> StoreResult<()> {
        self.ensure_exists(Entity::Relationship(rel))?;
        self.remove_relationship_unchecked(rel);
        Ok(())
    }

    fn set_property(&mut self, entity: Entity, key: &str, value: Value) -> StoreResult<()> {
        self.ensure_exists(entity)?;
        if self.view().property(entity, key).as_ref() == Some(&value) {
            return Ok(());
        }

        let committed = self.base.property(entity, key);
        let restores_committed = committed.as_ref() == Some(&value);

        if let Some(properties) = self.working_mut().properties_mut(entity) {
            properties.insert(key.to_string(), value);
        }

        let entry = (entity, key.to_string());
        self.delta.removed.remove(&entry);
        if self.delta.is_created(entity) {
            self.delta.assigned.insert(entry, None);
        } else if restores_committed {
            self.delta.assigned.remove(&entry);
        } else {
            self.delta.assigned.entry(entry).or_insert(committed);
        }
        Ok(())
    }

    fn remove_property(&mut self, entity: Entity, key: &str) -> StoreResult<Option<Value>> {
        self.ensure_exists(entity)?;
        if self.view().property(entity, key).is_none() {
            return Ok(None);
        }

        let previous = self
            .working_mut()
            .properties_mut(entity)
            .and_then(|properties| properties.remove(key));

        let entry = (entity, key.to_string());
        self.delta.assigned.remove(&entry);
        if !self.delta.is_created(entity) {
            if let Some(committed) = self.base.property(entity, key) {
                self.delta.removed.insert(entry, committed);
            }
        }
        Ok(previous)
    }

    fn delete_all(&mut self) -> StoreResult<()> {
        let relationships: Vec<RelationshipHandle> =
            self.view().relationships.keys().copied().collect();
        for rel in relationships {
            self.remove_relationship_unchecked(rel);
        }
        let nodes: Vec<NodeHandle> = self.view().nodes.keys().copied().collect();
        for node in nodes {
            self.remove_node_unchecked(node);
        }
        Ok(())
    }

    fn success(&mut self) {
        if self.mark == Mark::Undecided {
            self.mark = Mark::Success;
        }
    }

    fn failure(&mut self) {
        self.mark = Mark::Failure;
    }

    fn finish(mut self: Box<Self>) -> StoreResult<TransactionOutcome> {
        if self.mark != Mark::Success {
            debug!(mark = ?self.mark, "Transaction rolled back");
            return Ok(TransactionOutcome::RolledBack);
        }

        self.inner.ensure_open()?;

        let Some(working) = self.working.take() else {
            // Read-only transaction
            return Ok(TransactionOutcome::Committed);
        };

        let delta = std::mem::take(&mut self.delta);
        let data = delta.into_data(&self.base, &working);
        let handlers = self.inner.handlers();

        if !data.is_empty() {
            for handler in &handlers {
                if let Err(e) = handler.before_commit(&data) {
                    warn!(error = %e, "Transaction handler rejected commit, rolling back");
                    for handler in &handlers {
                        handler.after_rollback(&data);
                    }
                    return Err(match e {
                        StoreError::HookRejected(_) => e,
                        other => StoreError::HookRejected(other.to_string()),
                    });
                }
            }
        }

        if let Err(e) = self.inner.persist(&working) {
            warn!(error = %e, "Failed to persist commit, rolling back");
            if !data.is_empty() {
                for handler in &handlers {
                    handler.after_rollback(&data);
                }
            }
            return Err(e);
        }

        *self.inner.state.write() = Arc::new(working);

        // Post-commit hooks may write to this store again
        self.release_writer();

        if !data.is_empty() {
            for handler in &handlers {
                handler.after_commit(&data);
            }
        }

        Ok(TransactionOutcome::Committed)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release_writer();
    }
}
