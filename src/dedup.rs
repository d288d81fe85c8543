// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Logical-clock deduplication.
//!
//! Every event carries `(source_id, time_id)`. The deduplicator remembers the
//! highest `time_id` accepted per source (its watermark) and only lets an
//! event through when it is strictly newer. Duplicates, replays and
//! reordered stragglers are all rejected the same way.
//!
//! The proxy's own outbound emissions advance its own watermark too, which
//! is what stops an echoed event from being applied back to the store.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-source watermark tracker.
#[derive(Debug, Default)]
pub struct Deduplicator {
    watermarks: Mutex<HashMap<String, u64>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `time_id` from `source_id` if it is newer than anything seen.
    ///
    /// Returns `true` and advances the watermark when accepted. Returns
    /// `false` with no side effects otherwise.
    pub fn is_new_event(&self, source_id: &str, time_id: u64) -> bool {
        let mut watermarks = self.watermarks.lock();
        match watermarks.get_mut(source_id) {
            Some(watermark) if time_id <= *watermark => false,
            Some(watermark) => {
                *watermark = time_id;
                true
            }
            None => {
                watermarks.insert(source_id.to_string(), time_id);
                true
            }
        }
    }

    /// Highest accepted time id for a source.
    pub fn watermark(&self, source_id: &str) -> Option<u64> {
        self.watermarks.lock().get(source_id).copied()
    }

    /// Sources seen so far, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.watermarks.lock().keys().cloned().collect();
        sources.sort();
        sources
    }

    /// Forget every watermark.
    pub fn clear(&self) {
        self.watermarks.lock().clear();
    }
}
