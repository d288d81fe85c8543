// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the graph database proxy.
//!
//! Everything runs in-process against `MemoryStore`; nothing external is
//! required.
//!
//! # Test Organization
//! - `lifecycle_*` - connect/disconnect and the session registry
//! - `apply_*` - inbound events reaching (or not reaching) the store
//! - `notify_*` - store commits coming back out as events
//! - `replay_*` - full-sync on connect
//! - `mesh_*` - proxies wired into each other

mod common;

use common::{
    recorded_proxy, test_proxy, ForwardingSink, LogCapture, RecordingSink, ShutdownLog,
    TrackingConnector,
};
use graphdb_proxy::store::{
    Entity, GraphRead, GraphStore, MemoryStore, RelationshipKind, StoreTransaction,
    TransactionData, TransactionEventHandler, IN_MEMORY_PATH,
};
use graphdb_proxy::{
    close_on_signal, ApplyOutcome, AttributeTarget, BroadcastSink, EntityKind, EventKind,
    GraphProxy, GraphSink, IgnoreReason, ProxyConfig, ProxyError, ReplayStats, SessionRegistry,
    StoreError, StoreResult, SyncMode,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::Level;

fn key(s: &str) -> String {
    s.to_string()
}

fn node_added(id: &str) -> EventKind {
    EventKind::NodeAdded { node_id: key(id) }
}

fn node_removed(id: &str) -> EventKind {
    EventKind::NodeRemoved { node_id: key(id) }
}

/// Run `f` on its own thread and fail the test if it does not finish in time.
fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("operation did not finish within 5s")
}

fn node_property(store: &dyn GraphStore, node_id: &str, attribute: &str) -> Option<Value> {
    let view = store.snapshot().unwrap();
    let handle = view.find_node("id", &json!(node_id))?;
    view.property(Entity::Node(handle), attribute)
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn lifecycle_connect_default_uses_configured_mode() {
    let config = ProxyConfig {
        default_mode: SyncMode::ReadOnly,
        ..ProxyConfig::for_testing("proxy")
    };
    let proxy = GraphProxy::new(config, Arc::new(SessionRegistry::new())).unwrap();
    proxy.connect_default(IN_MEMORY_PATH).unwrap();
    assert_eq!(proxy.mode(), Some(SyncMode::ReadOnly));
}

#[test]
fn lifecycle_reconnect_after_disconnect() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();
    proxy.disconnect().unwrap();

    // Watermarks are dropped with the session
    assert_eq!(proxy.clock().watermark("stream"), None);

    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    assert_eq!(proxy.node_added("stream", 1, "a").unwrap(), ApplyOutcome::Applied);
}

#[test]
fn lifecycle_registry_drains_in_registration_order() {
    let log: ShutdownLog = Arc::default();
    let registry = Arc::new(SessionRegistry::new());

    let first = GraphProxy::with_connector(
        ProxyConfig::for_testing("first"),
        Arc::clone(&registry),
        TrackingConnector::new(Arc::clone(&log)),
    )
    .unwrap();
    let second = GraphProxy::with_connector(
        ProxyConfig::for_testing("second"),
        Arc::clone(&registry),
        TrackingConnector::new(Arc::clone(&log)),
    )
    .unwrap();

    first.connect("db-one", SyncMode::WriteOnly).unwrap();
    second.connect("db-two", SyncMode::WriteOnly).unwrap();
    assert_eq!(registry.len(), 2);

    assert_eq!(registry.close_all(), 2);
    assert_eq!(*log.lock(), vec![key("db-one"), key("db-two")]);

    // Disconnecting afterwards does not close a second time
    first.disconnect().unwrap();
    second.disconnect().unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn lifecycle_disconnect_closes_exactly_once() {
    let log: ShutdownLog = Arc::default();
    let registry = Arc::new(SessionRegistry::new());
    let connector = TrackingConnector::new(Arc::clone(&log));
    let proxy =
        GraphProxy::with_connector(ProxyConfig::for_testing("proxy"), Arc::clone(&registry), connector)
            .unwrap();

    proxy.connect("db", SyncMode::Bidirectional).unwrap();
    proxy.disconnect().unwrap();
    assert_eq!(registry.close_all(), 0);
    assert_eq!(*log.lock(), vec![key("db")]);
}

#[test]
fn lifecycle_apply_after_drain_fails_cleanly() {
    let registry = Arc::new(SessionRegistry::new());
    let proxy = GraphProxy::new(ProxyConfig::for_testing("proxy"), Arc::clone(&registry)).unwrap();
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    registry.close_all();

    let err = proxy.node_added("stream", 1, "a").unwrap_err();
    assert!(matches!(err, ProxyError::Store(StoreError::Closed)));
    proxy.disconnect().unwrap();
}

#[tokio::test]
async fn lifecycle_close_on_signal_waits_for_signal() {
    let registry = Arc::new(SessionRegistry::new());
    registry.register("db", Arc::new(MemoryStore::in_memory()));

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        close_on_signal(Arc::clone(&registry)),
    )
    .await;

    assert!(waited.is_err());
    assert_eq!(registry.len(), 1);
}

// =============================================================================
// Apply path
// =============================================================================

#[test]
fn apply_read_only_never_mutates_store() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::ReadOnly).unwrap();

    let ignored = ApplyOutcome::Ignored(IgnoreReason::ReadOnly);
    assert_eq!(proxy.node_added("stream", 1, "a").unwrap(), ignored);
    assert_eq!(proxy.graph_cleared("stream", 2).unwrap(), ignored);
    // Gate comes before lookup: no error for an unknown id
    assert_eq!(proxy.node_removed("stream", 3, "ghost").unwrap(), ignored);

    let store = proxy.store().unwrap();
    assert_eq!(store.snapshot().unwrap().node_count(), 0);
    // Gate comes before dedup: no watermark
    assert_eq!(proxy.clock().watermark("stream"), None);

    // Store changes are still published
    let mut tx = store.begin().unwrap();
    let n = tx.create_node().unwrap();
    tx.set_property(Entity::Node(n), "id", json!("direct")).unwrap();
    tx.success();
    tx.finish().unwrap();

    assert_eq!(sink.kinds(), vec![node_added("direct")]);
}

#[test]
fn apply_stale_events_are_dropped() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();

    let stale = ApplyOutcome::Ignored(IgnoreReason::Stale);
    assert_eq!(proxy.node_added("s", 5, "a").unwrap(), ApplyOutcome::Applied);
    assert_eq!(proxy.node_added("s", 5, "b").unwrap(), stale);
    assert_eq!(proxy.node_added("s", 4, "c").unwrap(), stale);
    // Other sources have their own clock
    assert_eq!(proxy.node_added("t", 1, "d").unwrap(), ApplyOutcome::Applied);

    let view = proxy.store().unwrap().snapshot().unwrap();
    assert_eq!(view.node_count(), 2);
    assert!(view.find_node("id", &json!("b")).is_none());
}

#[test]
fn apply_unknown_ids_fail_without_touching_store() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    sink.clear();

    let err = proxy.edge_added("s", 2, "e", "a", "ghost", true).unwrap_err();
    match err {
        ProxyError::Lookup { kind, key } => {
            assert_eq!(kind, EntityKind::Node);
            assert_eq!(key, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = proxy.edge_removed("s", 3, "nope").unwrap_err();
    assert!(matches!(err, ProxyError::Lookup { kind: EntityKind::Edge, .. }));

    let err = proxy
        .node_attribute_added("s", 4, "ghost", "x", json!(1))
        .unwrap_err();
    assert!(matches!(err, ProxyError::Lookup { .. }));

    assert_eq!(proxy.store().unwrap().snapshot().unwrap().relationship_count(), 0);
    assert!(sink.is_empty());
}

#[test]
fn apply_sink_adapter_swallows_failures() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();

    let events = [
        graphdb_proxy::GraphEvent::new("s", 1, node_removed("ghost")),
        graphdb_proxy::GraphEvent::new(
            "s",
            2,
            EventKind::AttributeChanged {
                target: AttributeTarget::Node(key("ghost")),
                attribute: key("id"),
                old_value: None,
                new_value: json!("other"),
            },
        ),
        graphdb_proxy::GraphEvent::new("s", 3, node_added("a")),
    ];
    for event in &events {
        proxy.on_event(event);
    }

    // The stream moved on past the failures
    assert_eq!(proxy.store().unwrap().snapshot().unwrap().node_count(), 1);
    assert_eq!(proxy.clock().watermark("s"), Some(3));
}

#[test]
fn apply_attribute_lifecycle() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    let store = proxy.store().unwrap();

    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.edge_added("s", 3, "ab", "a", "b", false).unwrap();

    proxy.node_attribute_added("s", 4, "a", "color", json!("red")).unwrap();
    assert_eq!(node_property(store.as_ref(), "a", "color"), Some(json!("red")));

    proxy
        .node_attribute_changed("s", 5, "a", "color", Some(json!("red")), json!("blue"))
        .unwrap();
    assert_eq!(node_property(store.as_ref(), "a", "color"), Some(json!("blue")));

    proxy.node_attribute_removed("s", 6, "a", "color").unwrap();
    assert_eq!(node_property(store.as_ref(), "a", "color"), None);

    proxy.edge_attribute_added("s", 7, "ab", "weight", json!(1.5)).unwrap();
    proxy
        .edge_attribute_changed("s", 8, "ab", "weight", None, json!(2.5))
        .unwrap();
    let view = store.snapshot().unwrap();
    let rel = view.all_relationships().next().unwrap();
    assert_eq!(rel.kind, RelationshipKind::Undirected);
    assert_eq!(rel.properties["weight"], json!(2.5));
    drop(view);

    proxy.edge_attribute_removed("s", 9, "ab", "weight").unwrap();
    proxy.edge_removed("s", 10, "ab").unwrap();
    assert_eq!(store.snapshot().unwrap().relationship_count(), 0);
}

#[test]
fn apply_duplicate_edge_id_rolls_back() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.edge_added("s", 3, "e", "a", "b", true).unwrap();

    assert_eq!(
        proxy.edge_added("s", 4, "e", "b", "a", true).unwrap(),
        ApplyOutcome::RolledBack
    );
    assert_eq!(proxy.store().unwrap().snapshot().unwrap().relationship_count(), 1);
}

#[test]
fn apply_evicted_ids_are_resolved_again() {
    let config = ProxyConfig {
        node_cache_capacity: 2,
        ..ProxyConfig::for_testing("proxy")
    };
    let proxy = GraphProxy::new(config, Arc::new(SessionRegistry::new())).unwrap();
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    for (t, id) in ["a", "b", "c"].iter().enumerate() {
        proxy.node_added("s", t as u64 + 1, id).unwrap();
    }

    let nodes = proxy.node_cache().unwrap();
    for id in ["a", "b", "c"] {
        nodes.get(&key(id)).unwrap();
    }
    assert!(!nodes.has(&key("a")));
    assert!(nodes.has(&key("b")));
    assert!(nodes.has(&key("c")));

    assert_eq!(
        proxy.node_attribute_added("s", 4, "a", "x", json!(1)).unwrap(),
        ApplyOutcome::Applied
    );
    assert!(nodes.has(&key("a")));
    assert!(!nodes.has(&key("b")));
    assert_eq!(nodes.len(), 2);
}

#[test]
fn apply_concurrent_sources() {
    let proxy = Arc::new(test_proxy("proxy"));
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let proxy = Arc::clone(&proxy);
            std::thread::spawn(move || {
                let source = format!("source-{t}");
                for i in 1..=25u64 {
                    let id = format!("{t}-{i}");
                    assert_eq!(
                        proxy.node_added(&source, i, &id).unwrap(),
                        ApplyOutcome::Applied
                    );
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(proxy.store().unwrap().snapshot().unwrap().node_count(), 100);
    proxy.disconnect().unwrap();
}

#[test]
fn apply_failures_are_logged_for_direct_callers() {
    let proxy = test_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();

    let logs = LogCapture::default();
    tracing::subscriber::with_default(logs.clone(), || {
        assert!(proxy.node_removed("stream", 7, "ghost").is_err());
        assert!(proxy
            .node_attribute_added("stream", 8, "a", "id", json!("b"))
            .is_err());
    });

    let warnings = logs.at_level(Level::WARN);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field("source_id"), Some("stream"));
    assert_eq!(warnings[0].field("time_id"), Some("7"));

    let errors = logs.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field("time_id"), Some("8"));
}

// =============================================================================
// Notify path
// =============================================================================

#[test]
fn notify_write_only_never_emits() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();

    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.edge_added("s", 3, "ab", "a", "b", true).unwrap();
    proxy.node_attribute_added("s", 4, "a", "x", json!(1)).unwrap();
    proxy.node_removed("s", 5, "a").unwrap();
    proxy.graph_cleared("s", 6).unwrap();

    let store = proxy.store().unwrap();
    let mut tx = store.begin().unwrap();
    tx.create_node().unwrap();
    tx.success();
    tx.finish().unwrap();

    assert!(sink.is_empty());
}

#[test]
fn notify_cascade_removes_edges_before_node() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.node_added("s", 3, "c").unwrap();
    proxy.edge_added("s", 4, "ab", "a", "b", true).unwrap();
    proxy.edge_added("s", 5, "ca", "c", "a", false).unwrap();
    proxy.edge_added("s", 6, "bc", "b", "c", true).unwrap();
    proxy.edge_cache().unwrap().get(&key("ab")).unwrap();
    sink.clear();

    assert_eq!(proxy.node_removed("s", 7, "a").unwrap(), ApplyOutcome::Applied);

    let kinds = sink.kinds();
    assert_eq!(kinds.len(), 3);
    let removed_edges: BTreeSet<String> = kinds[..2]
        .iter()
        .map(|k| match k {
            EventKind::EdgeRemoved { edge_id } => edge_id.clone(),
            other => panic!("expected edge removal, got {other:?}"),
        })
        .collect();
    assert_eq!(removed_edges, BTreeSet::from([key("ab"), key("ca")]));
    assert_eq!(kinds[2], node_removed("a"));

    let view = proxy.store().unwrap().snapshot().unwrap();
    assert_eq!(view.node_count(), 2);
    assert_eq!(view.relationship_count(), 1);
    assert!(!proxy.edge_cache().unwrap().has(&key("ab")));
}

#[test]
fn notify_graph_cleared_announces_everything() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.edge_added("s", 3, "ab", "a", "b", true).unwrap();
    sink.clear();

    proxy.graph_cleared("s", 4).unwrap();

    assert_eq!(
        sink.kinds(),
        vec![
            EventKind::EdgeRemoved { edge_id: key("ab") },
            node_removed("a"),
            node_removed("b"),
        ]
    );
    assert_eq!(proxy.store().unwrap().snapshot().unwrap().node_count(), 0);
}

#[test]
fn notify_events_carry_proxy_source_and_increasing_time() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    proxy.node_added("s", 2, "b").unwrap();
    proxy.edge_added("s", 3, "ab", "a", "b", false).unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.source_id == "proxy"));
    assert!(events.windows(2).all(|w| w[0].time_id < w[1].time_id));
    assert_eq!(
        events[2].kind,
        EventKind::EdgeAdded {
            edge_id: key("ab"),
            from_node: key("a"),
            to_node: key("b"),
            directed: false,
        }
    );
}

struct VetoHandler;

impl TransactionEventHandler for VetoHandler {
    fn before_commit(&self, _data: &TransactionData) -> StoreResult<()> {
        Err(StoreError::HookRejected("vetoed".into()))
    }

    fn after_commit(&self, _data: &TransactionData) {}

    fn after_rollback(&self, _data: &TransactionData) {}
}

#[test]
fn notify_revocation_survives_rollback() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();

    let nodes = proxy.node_cache().unwrap();
    nodes.get(&key("a")).unwrap();
    assert!(nodes.has(&key("a")));

    let store = proxy.store().unwrap();
    let veto = store.register_handler(Arc::new(VetoHandler));
    sink.clear();

    assert_eq!(proxy.node_removed("s", 2, "a").unwrap(), ApplyOutcome::RolledBack);
    assert!(!nodes.has(&key("a")));
    assert_eq!(sink.kinds(), vec![node_removed("a")]);
    assert_eq!(store.snapshot().unwrap().node_count(), 1);

    // Self-healing: the next lookup repopulates the entry
    store.unregister_handler(veto);
    nodes.get(&key("a")).unwrap();
    assert!(nodes.has(&key("a")));
}

#[tokio::test]
async fn notify_broadcast_subscribers_see_commits() {
    let proxy = test_proxy("proxy");
    let broadcast = BroadcastSink::new(16);
    let mut rx = broadcast.subscribe();
    proxy.add_sink(Arc::new(broadcast));

    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, node_added("a"));
    assert_eq!(event.source_id, "proxy");
    assert_eq!(event.time_id, 1);
}

#[test]
fn notify_assignments_publish_uniform_set() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("s", 1, "a").unwrap();
    sink.clear();

    proxy.node_attribute_added("s", 2, "a", "x", json!(1)).unwrap();
    proxy
        .node_attribute_changed("s", 3, "a", "x", Some(json!(1)), json!(2))
        .unwrap();
    // Same value again: nothing changes, nothing is published
    assert_eq!(
        proxy.node_attribute_added("s", 4, "a", "x", json!(2)).unwrap(),
        ApplyOutcome::Applied
    );

    let target = AttributeTarget::Node(key("a"));
    assert_eq!(
        sink.kinds(),
        vec![
            EventKind::AttributeChanged {
                target: target.clone(),
                attribute: key("x"),
                old_value: None,
                new_value: json!(1),
            },
            EventKind::AttributeChanged {
                target,
                attribute: key("x"),
                old_value: Some(json!(1)),
                new_value: json!(2),
            },
        ]
    );
}

// =============================================================================
// Full-sync replay
// =============================================================================

#[test]
fn replay_reproduces_applied_nodes_and_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    let path = path.to_str().unwrap();

    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(path, SyncMode::WriteOnly).unwrap();
    proxy.node_added("stream", 1, "alice").unwrap();
    proxy
        .node_attribute_added("stream", 2, "alice", "age", json!(30))
        .unwrap();
    proxy
        .node_attribute_added("stream", 3, "alice", "tags", json!(["a", "b"]))
        .unwrap();
    proxy.node_added("stream", 4, "bob").unwrap();
    proxy.edge_added("stream", 5, "knows", "alice", "bob", true).unwrap();
    proxy
        .edge_attribute_added("stream", 6, "knows", "since", json!(2020))
        .unwrap();
    proxy.disconnect().unwrap();
    assert!(sink.is_empty());

    let stats = proxy.connect(path, SyncMode::ReadOnly).unwrap();
    assert_eq!(
        stats,
        ReplayStats {
            nodes: 2,
            relationships: 1,
            attributes: 3,
        }
    );

    let mut alice = BTreeMap::new();
    for kind in sink.kinds() {
        if let EventKind::AttributeAdded {
            target: AttributeTarget::Node(id),
            attribute,
            value,
        } = kind
        {
            if id == "alice" {
                alice.insert(attribute, value);
            }
        }
    }
    let expected: BTreeMap<String, Value> = [
        (key("age"), json!(30)),
        (key("tags"), json!(["a", "b"])),
    ]
    .into_iter()
    .collect();
    assert_eq!(alice, expected);

    assert!(sink.kinds().contains(&EventKind::EdgeAdded {
        edge_id: key("knows"),
        from_node: key("alice"),
        to_node: key("bob"),
        directed: true,
    }));
}

#[test]
fn replay_skipped_in_write_only_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    let path = path.to_str().unwrap();

    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(path, SyncMode::WriteOnly).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();
    proxy.disconnect().unwrap();

    let stats = proxy.connect(path, SyncMode::WriteOnly).unwrap();
    assert_eq!(stats, ReplayStats::default());
    assert!(sink.is_empty());
}

/// Removes node "x" from a second thread as soon as the replay starts.
struct RemoveDuringReplay {
    proxy: Weak<GraphProxy>,
    events: Mutex<Vec<EventKind>>,
    worker: Mutex<Option<JoinHandle<graphdb_proxy::Result<ApplyOutcome>>>>,
}

impl GraphSink for RemoveDuringReplay {
    fn on_event(&self, event: &graphdb_proxy::GraphEvent) {
        self.events.lock().push(event.kind.clone());

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        if let Some(proxy) = self.proxy.upgrade() {
            *worker = Some(std::thread::spawn(move || {
                proxy.node_removed("remote", 1, "x")
            }));
            drop(worker);
            // Give the worker time to reach the store
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

#[test]
fn replay_commits_during_replay_follow_the_burst() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph");
    let path = path.to_str().unwrap();

    let seed = test_proxy("seed");
    seed.connect(path, SyncMode::WriteOnly).unwrap();
    seed.node_added("s", 1, "x").unwrap();
    seed.node_added("s", 2, "y").unwrap();
    seed.disconnect().unwrap();

    let proxy = Arc::new(test_proxy("proxy"));
    let sink = Arc::new(RemoveDuringReplay {
        proxy: Arc::downgrade(&proxy),
        events: Mutex::new(Vec::new()),
        worker: Mutex::new(None),
    });
    proxy.add_sink(sink.clone());

    let stats = proxy.connect(path, SyncMode::Bidirectional).unwrap();
    assert_eq!(stats.nodes, 2);

    let worker = sink.worker.lock().take().unwrap();
    assert_eq!(worker.join().unwrap().unwrap(), ApplyOutcome::Applied);

    assert_eq!(
        *sink.events.lock(),
        vec![node_added("x"), node_added("y"), node_removed("x")]
    );
    assert_eq!(proxy.store().unwrap().snapshot().unwrap().node_count(), 1);
}

// =============================================================================
// Mesh wiring
// =============================================================================

#[test]
fn mesh_echo_of_own_events_is_rejected() {
    let (proxy, sink) = recorded_proxy("proxy");
    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();

    let echoes = sink.events();
    assert_eq!(echoes.len(), 1);
    for event in &echoes {
        assert_eq!(
            proxy.apply(event).unwrap(),
            ApplyOutcome::Ignored(IgnoreReason::Stale)
        );
    }
    assert_eq!(proxy.store().unwrap().snapshot().unwrap().node_count(), 1);
}

#[test]
fn mesh_loopback_does_not_feed_back() {
    let proxy = Arc::new(test_proxy("proxy"));
    proxy.add_sink(Arc::new(ForwardingSink::new(Arc::downgrade(&proxy))));
    let recorder = Arc::new(RecordingSink::new());
    proxy.add_sink(recorder.clone());

    proxy.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    proxy.node_added("stream", 1, "a").unwrap();
    proxy
        .node_attribute_added("stream", 2, "a", "x", json!(1))
        .unwrap();

    let store = proxy.store().unwrap();
    assert_eq!(store.snapshot().unwrap().node_count(), 1);
    assert_eq!(node_property(store.as_ref(), "a", "x"), Some(json!(1)));
    assert_eq!(recorder.len(), 2);
    assert_eq!(proxy.clock().watermark("proxy"), Some(2));

    proxy.disconnect().unwrap();
}

#[test]
fn mesh_upstream_commits_replicate_downstream() {
    let upstream = test_proxy("upstream");
    let downstream = Arc::new(test_proxy("downstream"));
    upstream.add_sink(Arc::new(ForwardingSink::new(Arc::downgrade(&downstream))));

    downstream.connect(IN_MEMORY_PATH, SyncMode::WriteOnly).unwrap();
    upstream.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();

    upstream.node_added("editor", 1, "a").unwrap();
    upstream.node_added("editor", 2, "b").unwrap();
    upstream.edge_added("editor", 3, "ab", "a", "b", false).unwrap();
    upstream
        .node_attribute_added("editor", 4, "a", "color", json!("red"))
        .unwrap();
    upstream
        .node_attribute_changed("editor", 5, "a", "color", Some(json!("red")), json!("blue"))
        .unwrap();

    let replica = downstream.store().unwrap();
    {
        let view = replica.snapshot().unwrap();
        assert_eq!(view.node_count(), 2);
        let rel = view.all_relationships().next().unwrap();
        assert_eq!(rel.kind, RelationshipKind::Undirected);
        assert_eq!(rel.properties["id"], json!("ab"));
    }
    assert_eq!(node_property(replica.as_ref(), "a", "color"), Some(json!("blue")));

    upstream.node_removed("editor", 6, "a").unwrap();
    let view = replica.snapshot().unwrap();
    assert_eq!(view.node_count(), 1);
    assert_eq!(view.relationship_count(), 0);
}

fn bidirectional_pair() -> (Arc<GraphProxy>, Arc<GraphProxy>) {
    let a = Arc::new(test_proxy("a"));
    let b = Arc::new(test_proxy("b"));
    a.add_sink(Arc::new(ForwardingSink::new(Arc::downgrade(&b))));
    b.add_sink(Arc::new(ForwardingSink::new(Arc::downgrade(&a))));
    a.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    b.connect(IN_MEMORY_PATH, SyncMode::Bidirectional).unwrap();
    (a, b)
}

#[test]
fn mesh_bidirectional_pair_converges() {
    let (a, b) = bidirectional_pair();

    let (pa, pb) = (Arc::clone(&a), Arc::clone(&b));
    within_deadline(move || {
        assert_eq!(pa.node_added("editor", 1, "n1").unwrap(), ApplyOutcome::Applied);
        assert_eq!(pa.node_added("editor", 2, "n2").unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            pa.edge_added("editor", 3, "e", "n1", "n2", true).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            pa.node_attribute_added("editor", 4, "n1", "x", json!(1)).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            pb.node_attribute_changed("other", 1, "n1", "x", Some(json!(1)), json!(2))
                .unwrap(),
            ApplyOutcome::Applied
        );
    });

    for proxy in [&a, &b] {
        let store = proxy.store().unwrap();
        let view = store.snapshot().unwrap();
        assert_eq!(view.node_count(), 2);
        assert_eq!(view.relationship_count(), 1);
        drop(view);
        assert_eq!(node_property(store.as_ref(), "n1", "x"), Some(json!(2)));
    }
}

#[test]
fn mesh_bidirectional_pair_removal_terminates() {
    let (a, b) = bidirectional_pair();

    let pa = Arc::clone(&a);
    within_deadline(move || {
        pa.node_added("editor", 1, "n1").unwrap();
        pa.node_added("editor", 2, "n2").unwrap();
        pa.edge_added("editor", 3, "e", "n1", "n2", false).unwrap();
        assert_eq!(pa.node_removed("editor", 4, "n1").unwrap(), ApplyOutcome::Applied);
    });

    for proxy in [&a, &b] {
        let view = proxy.store().unwrap().snapshot().unwrap();
        assert_eq!(view.node_count(), 1);
        assert_eq!(view.relationship_count(), 0);
        assert!(view.find_node("id", &json!("n1")).is_none());
    }

    // No dead handle was left behind by the echoed removal
    assert_eq!(
        a.node_attribute_added("editor", 5, "n2", "y", json!(true)).unwrap(),
        ApplyOutcome::Applied
    );
    assert!(matches!(
        a.node_attribute_added("editor", 6, "n1", "y", json!(true)),
        Err(ProxyError::Lookup { .. })
    ));
}
