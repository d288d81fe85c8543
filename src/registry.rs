// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Registry of open store sessions.
//!
//! Every connected proxy registers its store session here. At process exit
//! [`close_all`](SessionRegistry::close_all) (or [`close_on_signal`]) shuts
//! down whatever is still open, in registration order, best-effort: a
//! failing session is logged and the drain moves on.
//!
//! A session leaves the registry exactly once, either through
//! [`unregister`](SessionRegistry::unregister) on disconnect or through a
//! drain. Whoever removes it closes it, so nothing is closed twice.

use crate::metrics;
use crate::store::GraphStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Registration token for an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Diagnostic view of a registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub path: String,
    pub opened_at: DateTime<Utc>,
}

struct RegisteredSession {
    info: SessionInfo,
    store: Arc<dyn GraphStore>,
}

/// Open sessions across all proxies sharing this registry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<RegisteredSession>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an open session.
    pub fn register(&self, path: &str, store: Arc<dyn GraphStore>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.lock();
        sessions.push(RegisteredSession {
            info: SessionInfo {
                id,
                path: path.to_string(),
                opened_at: Utc::now(),
            },
            store,
        });
        metrics::set_open_sessions(sessions.len());
        id
    }

    /// Stop tracking a session, handing its store back to the caller.
    ///
    /// Returns `None` if the session was already removed (for example by a
    /// drain that closed it).
    pub fn unregister(&self, id: SessionId) -> Option<Arc<dyn GraphStore>> {
        let mut sessions = self.sessions.lock();
        let index = sessions.iter().position(|s| s.info.id == id)?;
        let session = sessions.remove(index);
        metrics::set_open_sessions(sessions.len());
        Some(session.store)
    }

    /// Close every registered session in registration order.
    ///
    /// Returns how many sessions were closed without error.
    pub fn close_all(&self) -> usize {
        let drained: Vec<RegisteredSession> = {
            let mut sessions = self.sessions.lock();
            let drained = std::mem::take(&mut *sessions);
            metrics::set_open_sessions(0);
            drained
        };

        if drained.is_empty() {
            return 0;
        }

        info!(sessions = drained.len(), "Closing open graph database sessions");

        let mut closed = 0;
        for session in drained {
            match session.store.shutdown() {
                Ok(()) => {
                    closed += 1;
                    info!(
                        session = %session.info.id,
                        path = %session.info.path,
                        "Closed graph database session"
                    );
                }
                Err(e) => {
                    warn!(
                        session = %session.info.id,
                        path = %session.info.path,
                        error = %e,
                        "Failed to close graph database session"
                    );
                }
            }
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().iter().any(|s| s.info.id == id)
    }

    /// Registered sessions in registration order.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().iter().map(|s| s.info.clone()).collect()
    }
}

/// Wait for Ctrl-C, then drain the registry.
///
/// ```rust,no_run
/// use graphdb_proxy::registry::{close_on_signal, SessionRegistry};
/// use std::sync::Arc;
///
/// # async fn run() -> std::io::Result<()> {
/// let registry = Arc::new(SessionRegistry::new());
/// tokio::spawn(close_on_signal(Arc::clone(&registry)));
/// # Ok(())
/// # }
/// ```
pub async fn close_on_signal(registry: Arc<SessionRegistry>) -> std::io::Result<usize> {
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    Ok(registry.close_all())
}
