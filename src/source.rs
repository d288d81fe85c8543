// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbound event emission.
//!
//! [`EventSource`] stamps events with the proxy's source id and a strictly
//! increasing time id, records that time id in the shared
//! [`Deduplicator`], and hands the event to every registered sink.
//!
//! [`BroadcastSink`] bridges into async code: it forwards events into a
//! `tokio::sync::broadcast` channel that any number of tasks can subscribe to.

use crate::dedup::Deduplicator;
use crate::event::{EventKind, GraphEvent, GraphSink};
use crate::metrics;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Emits events on behalf of one source id.
pub struct EventSource {
    source_id: String,
    clock: Arc<Deduplicator>,
    time: AtomicU64,
    sinks: RwLock<Vec<Arc<dyn GraphSink>>>,
}

impl EventSource {
    pub fn new(source_id: impl Into<String>, clock: Arc<Deduplicator>) -> Self {
        Self {
            source_id: source_id.into(),
            clock,
            time: AtomicU64::new(0),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Time id of the most recent emission (0 before the first).
    pub fn last_time_id(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    pub fn add_sink(&self, sink: Arc<dyn GraphSink>) {
        self.sinks.write().push(sink);
    }

    /// Remove a sink previously added. Returns `false` if it was not registered.
    pub fn remove_sink(&self, sink: &Arc<dyn GraphSink>) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| !Arc::ptr_eq(s, sink));
        sinks.len() != before
    }

    pub fn clear_sinks(&self) {
        self.sinks.write().clear();
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Stamp and deliver one event. Returns the emitted event.
    pub fn emit(&self, kind: EventKind) -> GraphEvent {
        let time_id = self.time.fetch_add(1, Ordering::SeqCst) + 1;
        self.clock.is_new_event(&self.source_id, time_id);

        let event = GraphEvent::new(self.source_id.clone(), time_id, kind);
        trace!(
            source_id = %self.source_id,
            time_id,
            event = event.kind.name(),
            "Emitting event"
        );

        // Deliver outside the lock so a sink can add or remove sinks
        let sinks: Vec<Arc<dyn GraphSink>> = self.sinks.read().clone();
        for sink in &sinks {
            sink.on_event(&event);
        }
        metrics::record_notification_emitted(event.kind.name());

        event
    }
}

/// Forwards events into a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events (see
/// [`broadcast::error::RecvError::Lagged`]); the emitter never blocks.
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<GraphEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl GraphSink for BroadcastSink {
    fn on_event(&self, event: &GraphEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(time_id = event.time_id, "No broadcast subscribers, event dropped");
        }
    }
}
