//! Sink that records every event it receives.

use graphdb_proxy::{EventKind, GraphEvent, GraphProxy, GraphSink};
use parking_lot::Mutex;
use std::sync::Weak;

/// Records events for assertions.
///
/// # Example
/// ```rust,ignore
/// let sink = Arc::new(RecordingSink::new());
/// proxy.add_sink(sink.clone());
/// // ... drive the proxy ...
/// assert_eq!(sink.kinds(), vec![EventKind::GraphCleared]);
/// ```
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GraphEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl GraphSink for RecordingSink {
    fn on_event(&self, event: &GraphEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events into another proxy without keeping it alive.
///
/// Used to wire proxies into each other (or into themselves) without an
/// `Arc` cycle.
pub struct ForwardingSink {
    target: Weak<GraphProxy>,
}

impl ForwardingSink {
    pub fn new(target: Weak<GraphProxy>) -> Self {
        Self { target }
    }
}

impl GraphSink for ForwardingSink {
    fn on_event(&self, event: &GraphEvent) {
        if let Some(proxy) = self.target.upgrade() {
            proxy.on_event(event);
        }
    }
}
