// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the graph database proxy.
//!
//! Errors are split by where they originate: [`StoreError`] for the
//! persistent store capability, [`ProxyError`] for everything the proxy
//! itself reports to callers.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `AlreadyConnected` | No | `connect()` on a connected proxy |
//! | `NotConnected` | No | `disconnect()` or an inbound event while disconnected |
//! | `Lookup` | No | No entity carries the given external id |
//! | `Transaction` | Yes | A per-event transaction failed and was rolled back |
//! | `UnsupportedOperation` | No | Identity remapping (changing the reserved id attribute) |
//! | `Store` | Depends | Error surfaced by the store capability |
//! | `Config` | No | Configuration invalid |
//!
//! # Propagation
//!
//! Failures stay with the single event that caused them. The inbound
//! [`GraphSink`](crate::event::GraphSink) adapter logs them and moves on to
//! the next event; only the typed apply methods hand them back to callers.

use crate::store::{NodeHandle, RelationshipHandle};
use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for store capability operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which kind of graph element an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Edge,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Edge => write!(f, "edge"),
        }
    }
}

/// Errors reported by the proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// `connect()` was called while a store session is already open.
    #[error("A graph database is already opened")]
    AlreadyConnected,

    /// `disconnect()` (or an inbound event) while no store session is open.
    #[error("No graph database is opened")]
    NotConnected,

    /// No entity matches the external id.
    ///
    /// Surfaced to the caller of the apply path as a failed result and
    /// logged. Never fatal for the stream.
    #[error("{kind} '{key}' not found")]
    Lookup { kind: EntityKind, key: String },

    /// A per-event transaction failed and was rolled back.
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// The operation is recognised but deliberately not implemented.
    ///
    /// Raised for identity remapping: an attribute event that targets the
    /// reserved id attribute.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Error surfaced by the store capability.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    /// Create a lookup failure for an external id.
    pub fn lookup(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::Lookup {
            kind,
            key: key.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AlreadyConnected => false,
            Self::NotConnected => false,
            Self::Lookup { .. } => false,
            Self::Transaction(_) => true,
            Self::UnsupportedOperation(_) => false,
            Self::Store(e) => e.is_retryable(),
            Self::Config(_) => false,
        }
    }
}

/// Errors reported by the persistent store capability.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store session has been shut down.
    #[error("Store is closed")]
    Closed,

    /// The node handle does not refer to a live node.
    #[error("Node {0} not found")]
    NodeNotFound(NodeHandle),

    /// The relationship handle does not refer to a live relationship.
    #[error("Relationship {0} not found")]
    RelationshipNotFound(RelationshipHandle),

    /// A node still has relationships and cannot be deleted on its own.
    #[error("Node {node} still has {relationships} relationship(s)")]
    NodeHasRelationships {
        node: NodeHandle,
        relationships: usize,
    },

    /// A uniqueness or structural constraint would be violated.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The calling thread already holds the store's writer slot, typically
    /// because a commit hook fed an event back into the same store.
    #[error("Write transaction already open on this thread")]
    WriterHeld,

    /// A pre-commit hook refused the transaction.
    #[error("Commit rejected by transaction handler: {0}")]
    HookRejected(String),

    /// Durable write of committed state failed.
    #[error("Persistence error ({path}): {message}")]
    Persistence { path: String, message: String },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Closed => false,
            Self::NodeNotFound(_) => false,
            Self::RelationshipNotFound(_) => false,
            Self::NodeHasRelationships { .. } => false,
            Self::Constraint(_) => false,
            Self::WriterHeld => false,
            Self::HookRejected(_) => true,
            Self::Persistence { .. } => true, // Disk may free up
            Self::Io(_) => true,
            Self::Serialization(_) => false, // Corrupt snapshot
        }
    }
}
