// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Graph mutation events.
//!
//! Every event carries the id of the source that produced it and that
//! source's logical timestamp. Entities are named by external id only;
//! store handles never appear in an event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which element an attribute event targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AttributeTarget {
    /// The graph itself
    Graph,
    Node(String),
    Edge(String),
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    NodeAdded {
        node_id: String,
    },
    NodeRemoved {
        node_id: String,
    },
    EdgeAdded {
        edge_id: String,
        from_node: String,
        to_node: String,
        directed: bool,
    },
    EdgeRemoved {
        edge_id: String,
    },
    GraphCleared,
    StepBegins {
        step: f64,
    },
    AttributeAdded {
        target: AttributeTarget,
        attribute: String,
        value: Value,
    },
    AttributeChanged {
        target: AttributeTarget,
        attribute: String,
        /// Unknown when the change comes from a store commit that only
        /// reports the new value.
        old_value: Option<Value>,
        new_value: Value,
    },
    AttributeRemoved {
        target: AttributeTarget,
        attribute: String,
    },
}

impl EventKind {
    /// Short name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NodeAdded { .. } => "node_added",
            EventKind::NodeRemoved { .. } => "node_removed",
            EventKind::EdgeAdded { .. } => "edge_added",
            EventKind::EdgeRemoved { .. } => "edge_removed",
            EventKind::GraphCleared => "graph_cleared",
            EventKind::StepBegins { .. } => "step_begins",
            EventKind::AttributeAdded { .. } => "attribute_added",
            EventKind::AttributeChanged { .. } => "attribute_changed",
            EventKind::AttributeRemoved { .. } => "attribute_removed",
        }
    }
}

/// One graph mutation, stamped with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEvent {
    pub source_id: String,
    pub time_id: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl GraphEvent {
    pub fn new(source_id: impl Into<String>, time_id: u64, kind: EventKind) -> Self {
        Self {
            source_id: source_id.into(),
            time_id,
            kind,
        }
    }
}

/// Receives graph events.
///
/// Implementations are called synchronously on the emitting thread and must
/// not block for long. Failures are the sink's own business: there is no
/// way to report them back to the emitter.
pub trait GraphSink: Send + Sync {
    fn on_event(&self, event: &GraphEvent);
}
