//! Shared test utilities for integration tests.
//!
//! This module provides:
//! - A recording sink capturing every emitted event
//! - A tracking store/connector that logs shutdowns for registry assertions
//! - A capturing `tracing` subscriber for log assertions
//! - Proxy construction helpers

#![allow(dead_code)]

pub mod log_capture;
pub mod recording_sink;
pub mod tracking_store;

pub use log_capture::*;
pub use recording_sink::*;
pub use tracking_store::*;

use graphdb_proxy::{GraphProxy, ProxyConfig, SessionRegistry};
use std::sync::Arc;

/// A proxy over fresh in-memory stores with its own registry.
pub fn test_proxy(source_id: &str) -> GraphProxy {
    GraphProxy::new(
        ProxyConfig::for_testing(source_id),
        Arc::new(SessionRegistry::new()),
    )
    .unwrap()
}

/// A proxy plus a recording sink already subscribed to it.
pub fn recorded_proxy(source_id: &str) -> (GraphProxy, Arc<RecordingSink>) {
    let proxy = test_proxy(source_id);
    let sink = Arc::new(RecordingSink::new());
    proxy.add_sink(sink.clone());
    (proxy, sink)
}
