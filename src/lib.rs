// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Graph Database Proxy
//!
//! Keeps a live graph-event stream and a transactional graph store in sync,
//! in both directions, so the store behaves like one more participant in a
//! publish/subscribe network of graph mutations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              GraphProxy                                   │
//! │                                                                           │
//! │  inbound    ┌──────────┐   ┌───────┐   ┌─────────────────┐   ┌─────────┐  │
//! │  event ────►│ SyncMode │──►│ Dedup │──►│ IdentifierCache │──►│  one    │  │
//! │             │  gate    │   │       │   │ (node / edge)   │   │  store  │  │
//! │             └──────────┘   └───────┘   └─────────────────┘   │  txn    │  │
//! │                                ▲                             └────┬────┘  │
//! │                                │ own watermark                    │       │
//! │  outbound   ┌─────────────┐    │        ┌────────────────┐        │       │
//! │  event ◄────│ EventSource │◄───┴────────│ CommitNotifier │◄───────┘       │
//! │             └─────────────┘             │ (commit hook)  │  commit        │
//! │                    ▲                    └────────────────┘                │
//! │                    │ connect()                                            │
//! │             ┌──────┴──────┐             ┌─────────────────┐               │
//! │             │ Full-sync   │             │ SessionRegistry │               │
//! │             │ replay      │             │ (exit cleanup)  │               │
//! │             └─────────────┘             └─────────────────┘               │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Directions
//!
//! 1. **Apply path**: every accepted inbound event becomes exactly one store
//!    transaction
//! 2. **Notify path**: every store commit is translated back into events
//!
//! In bidirectional mode the proxy's own events come back around; they are
//! rejected by the deduplicator because every emission advances the proxy's
//! own watermark.
//!
//! ## Usage
//!
//! ```rust
//! use graphdb_proxy::{BroadcastSink, GraphProxy, ProxyConfig, SessionRegistry, SyncMode};
//! use graphdb_proxy::store::IN_MEMORY_PATH;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(SessionRegistry::new());
//! let proxy = GraphProxy::new(ProxyConfig::default(), Arc::clone(&registry)).unwrap();
//!
//! let sink = BroadcastSink::new(64);
//! let mut events = sink.subscribe();
//! proxy.add_sink(Arc::new(sink));
//!
//! proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
//! proxy.node_added("stream-1", 1, "alice").unwrap();
//!
//! let echoed = events.try_recv().unwrap();
//! assert_eq!(echoed.source_id, "graphdb-proxy");
//!
//! proxy.disconnect().unwrap();
//! ```

pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod metrics;
pub mod mode;
pub mod proxy;
pub mod registry;
pub mod source;
pub mod store;

// Re-exports for convenience
pub use cache::{EdgeCache, IdentifierCache, NodeCache, Resolve, ID_ATTRIBUTE};
pub use config::ProxyConfig;
pub use dedup::Deduplicator;
pub use error::{EntityKind, ProxyError, Result, StoreError, StoreResult};
pub use event::{AttributeTarget, EventKind, GraphEvent, GraphSink};
pub use mode::SyncMode;
pub use proxy::{ApplyOutcome, ConnectionState, GraphProxy, IgnoreReason, ReplayStats};
pub use registry::{close_on_signal, SessionId, SessionRegistry};
pub use source::{BroadcastSink, EventSource};
pub use store::{GraphStore, MemoryConnector, MemoryStore, StoreConnector};
