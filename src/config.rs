// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the graph database proxy.
//!
//! Configuration is passed to [`GraphProxy::new()`](crate::GraphProxy::new)
//! and can be constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use graphdb_proxy::config::ProxyConfig;
//!
//! let config = ProxyConfig {
//!     source_id: "neo4j-proxy".into(),
//!     node_cache_capacity: 5_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ProxyConfig
//! ├── source_id: String            # Stamped on every outbound event
//! ├── default_mode: SyncMode       # Used by connect_default()
//! ├── node_cache_capacity: usize   # Node id cache bound (per session)
//! └── edge_cache_capacity: usize   # Relationship id cache bound (per session)
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "source_id": "graphdb-proxy",
//!   "default_mode": "bidirectional",
//!   "node_cache_capacity": 1000,
//!   "edge_cache_capacity": 1000
//! }
//! ```

use crate::error::{ProxyError, Result};
use crate::mode::SyncMode;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Top-level proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Source id stamped on every event the proxy emits.
    /// Must differ from the ids of the streams feeding the proxy.
    #[serde(default = "default_source_id")]
    pub source_id: String,

    /// Mode used by [`connect_default`](crate::GraphProxy::connect_default).
    #[serde(default)]
    pub default_mode: SyncMode,

    /// Maximum cached node id → handle mappings.
    #[serde(default = "default_cache_capacity")]
    pub node_cache_capacity: usize,

    /// Maximum cached relationship id → handle mappings.
    #[serde(default = "default_cache_capacity")]
    pub edge_cache_capacity: usize,
}

fn default_source_id() -> String {
    "graphdb-proxy".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            source_id: default_source_id(),
            default_mode: SyncMode::default(),
            node_cache_capacity: default_cache_capacity(),
            edge_cache_capacity: default_cache_capacity(),
        }
    }
}

impl ProxyConfig {
    /// Create a small config for testing.
    pub fn for_testing(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            default_mode: SyncMode::Bidirectional,
            node_cache_capacity: 16,
            edge_cache_capacity: 16,
        }
    }

    /// Parse a JSON document, applying defaults for missing fields.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ProxyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config is usable.
    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(ProxyError::Config("source_id must not be empty".into()));
        }
        self.node_capacity()?;
        self.edge_capacity()?;
        Ok(())
    }

    pub fn node_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.node_cache_capacity)
            .ok_or_else(|| ProxyError::Config("node_cache_capacity must be at least 1".into()))
    }

    pub fn edge_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.edge_cache_capacity)
            .ok_or_else(|| ProxyError::Config("edge_cache_capacity must be at least 1".into()))
    }
}
