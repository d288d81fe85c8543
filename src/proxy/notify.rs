// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Notify path: store commits → outbound events.
//!
//! [`CommitNotifier`] is registered as the session's commit hook.
//!
//! - **Pre-commit**: deleted relationships, then deleted nodes. Each one is
//!   revoked from its identifier cache (always) and announced as removed
//!   (only when the mode publishes). Nodes still being readable here is what
//!   lets their external id be recovered.
//! - **Post-commit**: created nodes, created relationships, assigned node
//!   properties, assigned relationship properties, removed node properties,
//!   removed relationship properties, in that order. Every assignment is
//!   published as attribute-changed with the previous committed value.
//! - **Rollback**: nothing. Revocations made pre-commit stay revoked; the
//!   next lookup simply repopulates the entry.

use crate::cache::{external_id, EdgeCache, NodeCache, ID_ATTRIBUTE};
use crate::error::StoreResult;
use crate::event::{AttributeTarget, EventKind};
use crate::metrics;
use crate::mode::SyncMode;
use crate::source::EventSource;
use crate::store::{
    NodeHandle, PropertyEntry, RelationshipHandle, TransactionData, TransactionEventHandler,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Commit hook translating store transactions into graph events.
pub(crate) struct CommitNotifier {
    mode: SyncMode,
    nodes: Arc<NodeCache>,
    edges: Arc<EdgeCache>,
    source: Arc<EventSource>,
}

impl CommitNotifier {
    pub(crate) fn new(
        mode: SyncMode,
        nodes: Arc<NodeCache>,
        edges: Arc<EdgeCache>,
        source: Arc<EventSource>,
    ) -> Self {
        Self {
            mode,
            nodes,
            edges,
            source,
        }
    }

    fn node_id(data: &TransactionData, node: NodeHandle) -> String {
        data.node(node)
            .map(|record| external_id(&record.properties, record.handle))
            .unwrap_or_else(|| node.to_string())
    }

    fn edge_id(data: &TransactionData, rel: RelationshipHandle) -> String {
        data.relationship(rel)
            .map(|record| external_id(&record.properties, record.handle))
            .unwrap_or_else(|| rel.to_string())
    }

    /// True when the entry is the reserved id attribute; logs the remap
    /// unless the entity was created in the same transaction.
    fn is_id_entry<H: std::fmt::Display>(entry: &PropertyEntry<H>, created: bool, target: &AttributeTarget) -> bool {
        if entry.key != ID_ATTRIBUTE {
            return false;
        }
        if !created {
            metrics::record_identity_remap();
            error!(
                attribute_target = ?target,
                handle = %entry.entity,
                previous = ?entry.previous_value,
                value = ?entry.value,
                "Identity remapping is not supported, change not published"
            );
        }
        true
    }

    /// One uniform "set" notification; the previous committed value, if
    /// any, rides along and the subscriber reconciles add versus change.
    fn emit_assigned(&self, target: AttributeTarget, entry: &PropertyEntry<impl std::fmt::Display>) {
        let Some(new_value) = entry.value.clone() else {
            return;
        };
        self.source.emit(EventKind::AttributeChanged {
            target,
            attribute: entry.key.clone(),
            old_value: entry.previous_value.clone(),
            new_value,
        });
    }
}

impl TransactionEventHandler for CommitNotifier {
    fn before_commit(&self, data: &TransactionData) -> StoreResult<()> {
        let publish = self.mode.emits_outbound();

        for rel in &data.deleted_relationships {
            let edge_id = external_id(&rel.properties, rel.handle);
            self.edges.revoke_key(&edge_id);
            if publish {
                self.source.emit(EventKind::EdgeRemoved { edge_id });
            }
        }

        for node in &data.deleted_nodes {
            let node_id = external_id(&node.properties, node.handle);
            self.nodes.revoke_key(&node_id);
            if publish {
                self.source.emit(EventKind::NodeRemoved { node_id });
            }
        }

        Ok(())
    }

    fn after_commit(&self, data: &TransactionData) {
        if !self.mode.emits_outbound() {
            return;
        }

        for node in &data.created_nodes {
            self.source.emit(EventKind::NodeAdded {
                node_id: external_id(&node.properties, node.handle),
            });
        }

        for rel in &data.created_relationships {
            self.source.emit(EventKind::EdgeAdded {
                edge_id: external_id(&rel.properties, rel.handle),
                from_node: Self::node_id(data, rel.start),
                to_node: Self::node_id(data, rel.end),
                directed: rel.kind.is_directed(),
            });
        }

        for entry in &data.assigned_node_properties {
            let target = AttributeTarget::Node(Self::node_id(data, entry.entity));
            if Self::is_id_entry(entry, data.is_created_node(entry.entity), &target) {
                continue;
            }
            self.emit_assigned(target, entry);
        }

        for entry in &data.assigned_relationship_properties {
            let target = AttributeTarget::Edge(Self::edge_id(data, entry.entity));
            if Self::is_id_entry(entry, data.is_created_relationship(entry.entity), &target) {
                continue;
            }
            self.emit_assigned(target, entry);
        }

        for entry in &data.removed_node_properties {
            let target = AttributeTarget::Node(Self::node_id(data, entry.entity));
            if Self::is_id_entry(entry, false, &target) {
                continue;
            }
            self.source.emit(EventKind::AttributeRemoved {
                target,
                attribute: entry.key.clone(),
            });
        }

        for entry in &data.removed_relationship_properties {
            let target = AttributeTarget::Edge(Self::edge_id(data, entry.entity));
            if Self::is_id_entry(entry, false, &target) {
                continue;
            }
            self.source.emit(EventKind::AttributeRemoved {
                target,
                attribute: entry.key.clone(),
            });
        }
    }

    fn after_rollback(&self, data: &TransactionData) {
        debug!(
            deleted_nodes = data.deleted_nodes.len(),
            deleted_relationships = data.deleted_relationships.len(),
            "Transaction rolled back after pre-commit notification"
        );
    }
}
