// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Apply path: inbound events → store transactions.
//!
//! # Pipeline
//!
//! ```text
//! event ──► session? ──► mode gate ──► dedup ──► begin ──► resolve ids ──► mutate, finish
//!             │              │            │         │           │                │
//!        NotConnected   Ignored(RO)  Ignored(Stale) WriterHeld Lookup    Applied | RolledBack
//! ```
//!
//! The gate runs before dedup so a read-only session never advances a
//! watermark. Identifiers are resolved through the session caches once the
//! transaction holds the writer slot. Lock order is always writer slot,
//! then cache, the same order the commit hook revokes in.

use super::types::{ApplyOutcome, IgnoreReason};
use super::{GraphProxy, Session};
use crate::cache::ID_ATTRIBUTE;
use crate::error::{ProxyError, Result, StoreError, StoreResult};
use crate::event::{AttributeTarget, EventKind, GraphEvent};
use crate::metrics;
use crate::store::{
    Entity, GraphRead, GraphStore, RelationshipKind, StoreConnector, StoreTransaction,
    TransactionOutcome,
};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, warn};

/// What to do with a property inside the transaction.
enum PropertyOp {
    Set(Value),
    Remove,
}

impl<C: StoreConnector> GraphProxy<C> {
    /// Apply one inbound event to the store.
    ///
    /// Returns the outcome, or an error when the event could not be turned
    /// into a transaction at all (not connected, unknown id, id remapping).
    /// Failures after dedup are logged here with the event's source and time.
    pub fn apply(&self, event: &GraphEvent) -> Result<ApplyOutcome> {
        let name = event.kind.name();
        let session = self.current_session().ok_or(ProxyError::NotConnected)?;

        if !session.mode.accepts_inbound() {
            return Ok(Self::ignored(name, IgnoreReason::ReadOnly));
        }

        if !self.clock.is_new_event(&event.source_id, event.time_id) {
            debug!(
                source_id = %event.source_id,
                time_id = event.time_id,
                event = name,
                "Dropping stale event"
            );
            return Ok(Self::ignored(name, IgnoreReason::Stale));
        }

        let result = self.dispatch(&session, &event.kind);
        if let Err(e) = &result {
            let kind = match e {
                ProxyError::Lookup { .. } => "lookup",
                ProxyError::UnsupportedOperation(_) => "unsupported",
                _ => "other",
            };
            metrics::record_event_failed(name, kind);

            if let ProxyError::UnsupportedOperation(what) = e {
                error!(
                    source_id = %event.source_id,
                    time_id = event.time_id,
                    event = name,
                    "Unsupported operation: {}",
                    what
                );
            } else {
                warn!(
                    source_id = %event.source_id,
                    time_id = event.time_id,
                    event = name,
                    error = %e,
                    "Failed to apply inbound event"
                );
            }
        }
        result
    }

    fn dispatch(&self, session: &Session, kind: &EventKind) -> Result<ApplyOutcome> {
        let name = kind.name();
        let store = session.store.as_ref();
        match kind {
            EventKind::NodeAdded { node_id } => Self::run_in_transaction(
                store,
                name,
                || Ok(Value::String(node_id.clone())),
                |tx, id| {
                    if tx.find_node(ID_ATTRIBUTE, &id).is_some() {
                        return Err(StoreError::Constraint(format!(
                            "node id '{}' already exists",
                            node_id
                        )));
                    }
                    let node = tx.create_node()?;
                    tx.set_property(Entity::Node(node), ID_ATTRIBUTE, id)
                },
            ),

            EventKind::NodeRemoved { node_id } => Self::run_in_transaction(
                store,
                name,
                || session.nodes.get(node_id),
                |tx, node| tx.detach_delete_node(node).map(|_| ()),
            ),

            EventKind::EdgeAdded {
                edge_id,
                from_node,
                to_node,
                directed,
            } => Self::run_in_transaction(
                store,
                name,
                || Ok((session.nodes.get(from_node)?, session.nodes.get(to_node)?)),
                |tx, (start, end)| {
                    let id = Value::String(edge_id.clone());
                    if tx.find_relationship(ID_ATTRIBUTE, &id).is_some() {
                        return Err(StoreError::Constraint(format!(
                            "edge id '{}' already exists",
                            edge_id
                        )));
                    }
                    let kind = RelationshipKind::from_directed(*directed);
                    let rel = tx.create_relationship(start, end, kind)?;
                    tx.set_property(Entity::Relationship(rel), ID_ATTRIBUTE, id)
                },
            ),

            EventKind::EdgeRemoved { edge_id } => Self::run_in_transaction(
                store,
                name,
                || session.edges.get(edge_id),
                |tx, rel| tx.delete_relationship(rel),
            ),

            EventKind::GraphCleared => {
                Self::run_in_transaction(store, name, || Ok(()), |tx, ()| tx.delete_all())
            }

            EventKind::StepBegins { .. } => Ok(Self::ignored(name, IgnoreReason::NoStoreEffect)),

            EventKind::AttributeAdded {
                target,
                attribute,
                value,
            } => self.apply_property(session, name, target, attribute, PropertyOp::Set(value.clone())),

            EventKind::AttributeChanged {
                target,
                attribute,
                new_value,
                ..
            } => self.apply_property(
                session,
                name,
                target,
                attribute,
                PropertyOp::Set(new_value.clone()),
            ),

            EventKind::AttributeRemoved { target, attribute } => {
                self.apply_property(session, name, target, attribute, PropertyOp::Remove)
            }
        }
    }

    fn apply_property(
        &self,
        session: &Session,
        name: &'static str,
        target: &AttributeTarget,
        attribute: &str,
        op: PropertyOp,
    ) -> Result<ApplyOutcome> {
        let (kind, id) = match target {
            AttributeTarget::Graph => {
                return Ok(Self::ignored(name, IgnoreReason::NoStoreEffect));
            }
            AttributeTarget::Node(node_id) => ("node", node_id),
            AttributeTarget::Edge(edge_id) => ("edge", edge_id),
        };
        if attribute == ID_ATTRIBUTE {
            return Err(ProxyError::UnsupportedOperation(format!(
                "remapping the id of {} '{}'",
                kind, id
            )));
        }

        let resolve = || -> Result<Entity> {
            Ok(match target {
                AttributeTarget::Edge(edge_id) => Entity::Relationship(session.edges.get(edge_id)?),
                _ => Entity::Node(session.nodes.get(id)?),
            })
        };
        Self::run_in_transaction(session.store.as_ref(), name, resolve, |tx, entity| match op {
            PropertyOp::Set(value) => tx.set_property(entity, attribute, value),
            PropertyOp::Remove => tx.remove_property(entity, attribute).map(|_| ()),
        })
    }

    /// Run `op` in its own transaction. The transaction is always finished
    /// before this returns; any store failure rolls it back and is logged.
    ///
    /// `resolve` runs after `begin`, so identifiers are looked up against
    /// the state the transaction starts from. A removal that commits just
    /// before cannot leave a dead handle behind in the cache.
    fn run_in_transaction<T, R, F>(
        store: &dyn GraphStore,
        name: &'static str,
        resolve: R,
        op: F,
    ) -> Result<ApplyOutcome>
    where
        R: FnOnce() -> Result<T>,
        F: FnOnce(&mut dyn StoreTransaction, T) -> StoreResult<()>,
    {
        let start = Instant::now();
        let mut tx = store.begin()?;

        let target = match resolve() {
            Ok(target) => target,
            Err(e) => {
                tx.failure();
                tx.finish()?;
                return Err(e);
            }
        };

        let op_result = op(tx.as_mut(), target);
        match &op_result {
            Ok(()) => tx.success(),
            Err(e) => {
                let failure = ProxyError::Transaction(e.to_string());
                warn!(event = name, error = %failure, "Event mutation failed, rolling back");
                tx.failure();
            }
        }

        let outcome = match tx.finish() {
            Ok(TransactionOutcome::Committed) if op_result.is_ok() => ApplyOutcome::Applied,
            Ok(_) => ApplyOutcome::RolledBack,
            Err(e) => {
                let failure = ProxyError::Transaction(e.to_string());
                warn!(event = name, error = %failure, "Commit failed, transaction rolled back");
                ApplyOutcome::RolledBack
            }
        };

        match outcome {
            ApplyOutcome::Applied => metrics::record_event_applied(name, start.elapsed()),
            _ => metrics::record_event_rolled_back(name),
        }
        debug!(event = name, outcome = ?outcome, "Event applied");
        Ok(outcome)
    }

    fn ignored(name: &'static str, reason: IgnoreReason) -> ApplyOutcome {
        metrics::record_event_ignored(name, reason.as_str());
        ApplyOutcome::Ignored(reason)
    }
}
