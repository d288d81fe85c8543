// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Graph database proxy.
//!
//! The proxy ties together:
//! - A store session opened through a [`StoreConnector`]
//! - Per-session identifier caches ([`NodeCache`], [`EdgeCache`])
//! - The shared [`Deduplicator`] and outbound [`EventSource`]
//! - The [`SessionRegistry`] used for cleanup at process exit
//!
//! # Lifecycle
//!
//! 1. `connect(path, mode)` opens the store, builds the caches, registers
//!    the commit hook and the session, then replays the store (if the mode
//!    publishes)
//! 2. Inbound events go through [`apply`](GraphProxy::apply) or one of the
//!    typed methods; store commits come back out through the sinks
//! 3. `disconnect()` undoes all of the above
//!
//! The proxy is itself a [`GraphSink`], so it can be plugged straight into
//! an event source. In that role failures are logged and never propagated.

mod apply;
mod notify;
mod replay;
mod types;

pub use types::{ApplyOutcome, ConnectionState, IgnoreReason, ReplayStats};

use crate::cache::{EdgeCache, IdentifierCache, NodeCache, NodeResolver, RelationshipResolver};
use crate::config::ProxyConfig;
use crate::dedup::Deduplicator;
use crate::error::{ProxyError, Result};
use crate::event::{AttributeTarget, EventKind, GraphEvent, GraphSink};
use crate::metrics;
use crate::mode::SyncMode;
use crate::registry::{SessionId, SessionRegistry};
use crate::source::EventSource;
use crate::store::{GraphStore, HandlerId, MemoryConnector, StoreConnector};
use notify::CommitNotifier;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One open store session and everything scoped to it.
pub(crate) struct Session {
    id: SessionId,
    path: String,
    pub(crate) mode: SyncMode,
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) nodes: Arc<NodeCache>,
    pub(crate) edges: Arc<EdgeCache>,
    handler: HandlerId,
}

/// Bidirectional bridge between a graph event stream and a graph store.
///
/// Generic over the [`StoreConnector`] so embedders can plug in their own
/// store; the default opens [`MemoryStore`](crate::store::MemoryStore)s.
pub struct GraphProxy<C: StoreConnector = MemoryConnector> {
    config: ProxyConfig,
    connector: C,
    registry: Arc<SessionRegistry>,
    clock: Arc<Deduplicator>,
    source: Arc<EventSource>,
    session: Mutex<Option<Arc<Session>>>,
}

impl GraphProxy<MemoryConnector> {
    /// Create a proxy over [`MemoryStore`](crate::store::MemoryStore) sessions.
    pub fn new(config: ProxyConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        Self::with_connector(config, registry, MemoryConnector)
    }
}

impl<C: StoreConnector> GraphProxy<C> {
    /// Create a proxy that opens sessions through `connector`.
    pub fn with_connector(
        config: ProxyConfig,
        registry: Arc<SessionRegistry>,
        connector: C,
    ) -> Result<Self> {
        config.validate()?;
        let clock = Arc::new(Deduplicator::new());
        let source = Arc::new(EventSource::new(config.source_id.clone(), Arc::clone(&clock)));
        Ok(Self {
            config,
            connector,
            registry,
            clock,
            source,
            session: Mutex::new(None),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a store session at `path`.
    ///
    /// When `mode` publishes, the whole store is replayed to the sinks before
    /// this returns. A failed replay is reported, but the session stays open.
    pub fn connect(&self, path: &str, mode: SyncMode) -> Result<ReplayStats> {
        let session = {
            let mut current = self.session.lock();
            if current.is_some() {
                return Err(ProxyError::AlreadyConnected);
            }

            let store = match self.connector.open(path) {
                Ok(store) => store,
                Err(e) => {
                    metrics::record_connect(false);
                    warn!(path, error = %e, "Failed to open graph database");
                    return Err(e.into());
                }
            };

            let nodes = Arc::new(IdentifierCache::new(
                "node",
                self.config.node_capacity()?,
                NodeResolver::new(Arc::clone(&store)),
            ));
            let edges = Arc::new(IdentifierCache::new(
                "edge",
                self.config.edge_capacity()?,
                RelationshipResolver::new(Arc::clone(&store)),
            ));

            let handler = store.register_handler(Arc::new(CommitNotifier::new(
                mode,
                Arc::clone(&nodes),
                Arc::clone(&edges),
                Arc::clone(&self.source),
            )));
            let id = self.registry.register(path, Arc::clone(&store));

            let session = Arc::new(Session {
                id,
                path: path.to_string(),
                mode,
                store,
                nodes,
                edges,
                handler,
            });
            *current = Some(Arc::clone(&session));
            session
        };

        metrics::record_connect(true);
        info!(
            path,
            mode = %mode,
            session = %session.id,
            source_id = %self.source.source_id(),
            "Connected to graph database"
        );

        if !mode.emits_outbound() {
            return Ok(ReplayStats::default());
        }
        replay::full_sync(session.store.as_ref(), &self.source)
    }

    /// Open a store session using the configured default mode.
    pub fn connect_default(&self, path: &str) -> Result<ReplayStats> {
        self.connect(path, self.config.default_mode)
    }

    /// Close the current store session.
    ///
    /// The store is shut down only if the session was still registered; a
    /// session already closed by a registry drain is just forgotten.
    pub fn disconnect(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(ProxyError::NotConnected)?;

        session.store.unregister_handler(session.handler);
        session.nodes.clear();
        session.edges.clear();
        self.clock.clear();

        let result = match self.registry.unregister(session.id) {
            Some(store) => store.shutdown().map_err(ProxyError::from),
            None => {
                debug!(session = %session.id, "Session already closed by registry drain");
                Ok(())
            }
        };

        metrics::record_disconnect();
        info!(path = %session.path, session = %session.id, "Disconnected from graph database");
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn current_session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        match self.current_session() {
            Some(session) => ConnectionState::Connected(session.mode),
            None => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Mode of the current session.
    pub fn mode(&self) -> Option<SyncMode> {
        self.current_session().map(|s| s.mode)
    }

    /// The open store session, if any.
    pub fn store(&self) -> Option<Arc<dyn GraphStore>> {
        self.current_session().map(|s| Arc::clone(&s.store))
    }

    pub fn node_cache(&self) -> Option<Arc<NodeCache>> {
        self.current_session().map(|s| Arc::clone(&s.nodes))
    }

    pub fn edge_cache(&self) -> Option<Arc<EdgeCache>> {
        self.current_session().map(|s| Arc::clone(&s.edges))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    /// Watermarks of every source seen this session.
    pub fn clock(&self) -> &Deduplicator {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Subscribe a sink to outbound events.
    pub fn add_sink(&self, sink: Arc<dyn GraphSink>) {
        self.source.add_sink(sink);
    }

    pub fn remove_sink(&self, sink: &Arc<dyn GraphSink>) -> bool {
        self.source.remove_sink(sink)
    }

    pub fn clear_sinks(&self) {
        self.source.clear_sinks();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Typed inbound events
    // ═══════════════════════════════════════════════════════════════════════

    fn apply_kind(&self, source_id: &str, time_id: u64, kind: EventKind) -> Result<ApplyOutcome> {
        self.apply(&GraphEvent::new(source_id, time_id, kind))
    }

    pub fn node_added(&self, source_id: &str, time_id: u64, node_id: &str) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::NodeAdded {
                node_id: node_id.to_string(),
            },
        )
    }

    pub fn node_removed(&self, source_id: &str, time_id: u64, node_id: &str) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::NodeRemoved {
                node_id: node_id.to_string(),
            },
        )
    }

    pub fn edge_added(
        &self,
        source_id: &str,
        time_id: u64,
        edge_id: &str,
        from_node: &str,
        to_node: &str,
        directed: bool,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::EdgeAdded {
                edge_id: edge_id.to_string(),
                from_node: from_node.to_string(),
                to_node: to_node.to_string(),
                directed,
            },
        )
    }

    pub fn edge_removed(&self, source_id: &str, time_id: u64, edge_id: &str) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::EdgeRemoved {
                edge_id: edge_id.to_string(),
            },
        )
    }

    pub fn graph_cleared(&self, source_id: &str, time_id: u64) -> Result<ApplyOutcome> {
        self.apply_kind(source_id, time_id, EventKind::GraphCleared)
    }

    pub fn step_begins(&self, source_id: &str, time_id: u64, step: f64) -> Result<ApplyOutcome> {
        self.apply_kind(source_id, time_id, EventKind::StepBegins { step })
    }

    pub fn node_attribute_added(
        &self,
        source_id: &str,
        time_id: u64,
        node_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeAdded {
                target: AttributeTarget::Node(node_id.to_string()),
                attribute: attribute.to_string(),
                value,
            },
        )
    }

    pub fn node_attribute_changed(
        &self,
        source_id: &str,
        time_id: u64,
        node_id: &str,
        attribute: &str,
        old_value: Option<Value>,
        new_value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeChanged {
                target: AttributeTarget::Node(node_id.to_string()),
                attribute: attribute.to_string(),
                old_value,
                new_value,
            },
        )
    }

    pub fn node_attribute_removed(
        &self,
        source_id: &str,
        time_id: u64,
        node_id: &str,
        attribute: &str,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeRemoved {
                target: AttributeTarget::Node(node_id.to_string()),
                attribute: attribute.to_string(),
            },
        )
    }

    pub fn edge_attribute_added(
        &self,
        source_id: &str,
        time_id: u64,
        edge_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeAdded {
                target: AttributeTarget::Edge(edge_id.to_string()),
                attribute: attribute.to_string(),
                value,
            },
        )
    }

    pub fn edge_attribute_changed(
        &self,
        source_id: &str,
        time_id: u64,
        edge_id: &str,
        attribute: &str,
        old_value: Option<Value>,
        new_value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeChanged {
                target: AttributeTarget::Edge(edge_id.to_string()),
                attribute: attribute.to_string(),
                old_value,
                new_value,
            },
        )
    }

    pub fn edge_attribute_removed(
        &self,
        source_id: &str,
        time_id: u64,
        edge_id: &str,
        attribute: &str,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeRemoved {
                target: AttributeTarget::Edge(edge_id.to_string()),
                attribute: attribute.to_string(),
            },
        )
    }

    pub fn graph_attribute_added(
        &self,
        source_id: &str,
        time_id: u64,
        attribute: &str,
        value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeAdded {
                target: AttributeTarget::Graph,
                attribute: attribute.to_string(),
                value,
            },
        )
    }

    pub fn graph_attribute_changed(
        &self,
        source_id: &str,
        time_id: u64,
        attribute: &str,
        old_value: Option<Value>,
        new_value: Value,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeChanged {
                target: AttributeTarget::Graph,
                attribute: attribute.to_string(),
                old_value,
                new_value,
            },
        )
    }

    pub fn graph_attribute_removed(
        &self,
        source_id: &str,
        time_id: u64,
        attribute: &str,
    ) -> Result<ApplyOutcome> {
        self.apply_kind(
            source_id,
            time_id,
            EventKind::AttributeRemoved {
                target: AttributeTarget::Graph,
                attribute: attribute.to_string(),
            },
        )
    }
}

impl<C: StoreConnector> GraphSink for GraphProxy<C> {
    /// Feed a stream event into the store. Failures are logged by
    /// [`apply`](GraphProxy::apply) and go no further.
    fn on_event(&self, event: &GraphEvent) {
        match self.apply(event) {
            Ok(outcome) => {
                debug!(
                    source_id = %event.source_id,
                    time_id = event.time_id,
                    event = event.kind.name(),
                    outcome = ?outcome,
                    "Inbound event handled"
                );
            }
            Err(ProxyError::NotConnected) => {
                warn!(
                    source_id = %event.source_id,
                    time_id = event.time_id,
                    "Dropping inbound event, no graph database is opened"
                );
            }
            Err(_) => {}
        }
    }
}

impl<C: StoreConnector> Drop for GraphProxy<C> {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            if let Err(e) = self.disconnect() {
                warn!(error = %e, "Failed to disconnect on drop");
            }
        }
    }
}
