// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-sync replay: the whole store as one burst of events.
//!
//! Runs once per connect (when the mode publishes) so that subscribers
//! start from the store's current contents. Everything is read inside one
//! store transaction that makes no changes. It holds the writer slot, so a
//! concurrent commit waits until the burst is out and its hook events
//! follow the replay instead of interleaving with it.

use super::types::ReplayStats;
use crate::cache::{external_id, ID_ATTRIBUTE};
use crate::error::Result;
use crate::event::{AttributeTarget, EventKind};
use crate::metrics;
use crate::source::EventSource;
use crate::store::{GraphRead, GraphStore, NodeHandle};
use std::time::Instant;
use tracing::info;

/// Replay the last committed state of `store` through `source`.
pub(crate) fn full_sync(store: &dyn GraphStore, source: &EventSource) -> Result<ReplayStats> {
    let start = Instant::now();
    let mut tx = store.begin()?;
    let stats = emit_snapshot(&*tx, source);
    tx.success();
    tx.finish()?;

    let elapsed = start.elapsed();
    metrics::record_replay(stats.nodes, stats.relationships, elapsed);
    info!(
        nodes = stats.nodes,
        relationships = stats.relationships,
        attributes = stats.attributes,
        elapsed_ms = elapsed.as_millis() as u64,
        "Full sync replay complete"
    );
    Ok(stats)
}

/// Emit every node, then every relationship, each followed by its
/// non-reserved attributes.
pub(crate) fn emit_snapshot<V: GraphRead + ?Sized>(view: &V, source: &EventSource) -> ReplayStats {
    let mut stats = ReplayStats::default();

    for node in view.all_nodes() {
        let node_id = external_id(&node.properties, node.handle);
        source.emit(EventKind::NodeAdded {
            node_id: node_id.clone(),
        });
        stats.nodes += 1;

        for (attribute, value) in node.properties {
            if attribute == ID_ATTRIBUTE {
                continue;
            }
            source.emit(EventKind::AttributeAdded {
                target: AttributeTarget::Node(node_id.clone()),
                attribute,
                value,
            });
            stats.attributes += 1;
        }
    }

    for rel in view.all_relationships() {
        let endpoint = |handle: NodeHandle| {
            view.node(handle)
                .map(|n| external_id(&n.properties, n.handle))
                .unwrap_or_else(|| handle.to_string())
        };
        let edge_id = external_id(&rel.properties, rel.handle);
        source.emit(EventKind::EdgeAdded {
            edge_id: edge_id.clone(),
            from_node: endpoint(rel.start),
            to_node: endpoint(rel.end),
            directed: rel.kind.is_directed(),
        });
        stats.relationships += 1;

        for (attribute, value) in rel.properties {
            if attribute == ID_ATTRIBUTE {
                continue;
            }
            source.emit(EventKind::AttributeAdded {
                target: AttributeTarget::Edge(edge_id.clone()),
                attribute,
                value,
            });
            stats.attributes += 1;
        }
    }

    stats
}
