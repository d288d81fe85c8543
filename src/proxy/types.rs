// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Proxy state and result types.
//!
//! # State Transitions
//!
//! ```text
//!                 connect(path, mode)
//! Disconnected ──────────────────────────→ Connected(mode)
//!      ↑                                        │
//!      └────────────── disconnect() ────────────┘
//! ```
//!
//! `connect` while connected fails with `AlreadyConnected`; `disconnect`
//! while disconnected fails with `NotConnected`.

use crate::mode::SyncMode;

/// Connection state of a [`GraphProxy`](super::GraphProxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No store session is open.
    Disconnected,

    /// A store session is open with the given mode.
    Connected(SyncMode),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected(mode) => write!(f, "Connected({})", mode),
        }
    }
}

/// Why an inbound event did not reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The session is read-only.
    ReadOnly,
    /// The event's time id is not newer than its source's watermark.
    Stale,
    /// Accepted, but the event has no store representation
    /// (graph attributes, step markers).
    NoStoreEffect,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::ReadOnly => "read_only",
            IgnoreReason::Stale => "stale",
            IgnoreReason::NoStoreEffect => "no_store_effect",
        }
    }
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The store transaction committed.
    Applied,
    /// The event never reached the store.
    Ignored(IgnoreReason),
    /// The store transaction rolled back. The failure was logged.
    RolledBack,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Counts from one full-sync replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub nodes: usize,
    pub relationships: usize,
    /// Attribute events emitted (reserved id attribute excluded).
    pub attributes: usize,
}

impl ReplayStats {
    /// Total events emitted.
    pub fn events(&self) -> usize {
        self.nodes + self.relationships + self.attributes
    }
}
