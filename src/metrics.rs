// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Inbound event handling (applied, ignored, rolled back, failed)
//! - Identifier cache efficiency
//! - Outbound notifications
//! - Full-sync replay
//! - Open store sessions
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `graphdb_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use graphdb_proxy::metrics;
//! use std::time::Duration;
//!
//! metrics::record_event_applied("node_added", Duration::from_micros(250));
//! metrics::record_cache_hit("node");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an inbound event that changed the store.
pub fn record_event_applied(event: &'static str, duration: Duration) {
    counter!("graphdb_events_applied_total", "event" => event).increment(1);
    histogram!("graphdb_event_apply_duration_seconds", "event" => event)
        .record(duration.as_secs_f64());
}

/// Record an inbound event dropped before reaching the store.
pub fn record_event_ignored(event: &'static str, reason: &'static str) {
    counter!("graphdb_events_ignored_total", "event" => event, "reason" => reason).increment(1);
}

/// Record an inbound event whose transaction rolled back.
pub fn record_event_rolled_back(event: &'static str) {
    counter!("graphdb_events_rolled_back_total", "event" => event).increment(1);
}

/// Record an inbound event that failed before its transaction (lookup, unsupported).
pub fn record_event_failed(event: &'static str, kind: &'static str) {
    counter!("graphdb_events_failed_total", "event" => event, "kind" => kind).increment(1);
}

pub fn record_cache_hit(cache: &'static str) {
    counter!("graphdb_cache_hits_total", "cache" => cache).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!("graphdb_cache_misses_total", "cache" => cache).increment(1);
}

pub fn record_cache_eviction(cache: &'static str) {
    counter!("graphdb_cache_evictions_total", "cache" => cache).increment(1);
}

pub fn record_cache_revocation(cache: &'static str) {
    counter!("graphdb_cache_revocations_total", "cache" => cache).increment(1);
}

/// Record an outbound event handed to sinks.
pub fn record_notification_emitted(event: &'static str) {
    counter!("graphdb_notifications_emitted_total", "event" => event).increment(1);
}

/// Record an identity remapping seen in a commit (unsupported, not emitted).
pub fn record_identity_remap() {
    counter!("graphdb_identity_remaps_total").increment(1);
}

/// Record a completed full-sync replay.
pub fn record_replay(nodes: usize, relationships: usize, duration: Duration) {
    counter!("graphdb_replays_total").increment(1);
    histogram!("graphdb_replay_duration_seconds").record(duration.as_secs_f64());
    histogram!("graphdb_replay_nodes").record(nodes as f64);
    histogram!("graphdb_replay_relationships").record(relationships as f64);
}

/// Record a connect attempt.
pub fn record_connect(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("graphdb_connects_total", "status" => status).increment(1);
}

pub fn record_disconnect() {
    counter!("graphdb_disconnects_total").increment(1);
}

/// Set the number of registered store sessions.
pub fn set_open_sessions(count: usize) {
    gauge!("graphdb_open_sessions").set(count as f64);
}
