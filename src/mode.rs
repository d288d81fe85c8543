// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronization direction gate.

use serde::{Deserialize, Serialize};

/// Which directions of synchronization are active for a session.
///
/// | Mode | stream → store | store → stream |
/// |------|----------------|----------------|
/// | `ReadOnly` | no | yes |
/// | `WriteOnly` | yes | no |
/// | `Bidirectional` | yes | yes |
///
/// In `Bidirectional` mode the feedback loop is broken by the
/// [`Deduplicator`](crate::dedup::Deduplicator), not by this gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Store changes are published; inbound events never touch the store.
    ReadOnly,
    /// Inbound events are written; commits are not published.
    WriteOnly,
    Bidirectional,
}

impl SyncMode {
    /// Whether inbound events may mutate the store.
    pub fn accepts_inbound(&self) -> bool {
        !matches!(self, SyncMode::ReadOnly)
    }

    /// Whether store commits are published as events.
    pub fn emits_outbound(&self) -> bool {
        !matches!(self, SyncMode::WriteOnly)
    }
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Bidirectional
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::ReadOnly => write!(f, "read_only"),
            SyncMode::WriteOnly => write!(f, "write_only"),
            SyncMode::Bidirectional => write!(f, "bidirectional"),
        }
    }
}
