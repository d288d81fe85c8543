//! Store wrapper that records shutdowns.
//!
//! Every store opened through [`TrackingConnector`] appends its path to a
//! shared log when shut down, so tests can assert drain order and that no
//! session is closed twice.

use graphdb_proxy::store::{
    GraphRead, GraphStore, HandlerId, MemoryStore, StoreConnector, StoreTransaction,
    TransactionEventHandler,
};
use graphdb_proxy::StoreResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared shutdown log: one entry per `shutdown()` call, in call order.
pub type ShutdownLog = Arc<Mutex<Vec<String>>>;

/// A [`MemoryStore`] that logs shutdowns.
pub struct TrackingStore {
    label: String,
    inner: MemoryStore,
    log: ShutdownLog,
}

impl GraphStore for TrackingStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.inner.begin()
    }

    fn snapshot(&self) -> StoreResult<Box<dyn GraphRead>> {
        self.inner.snapshot()
    }

    fn register_handler(&self, handler: Arc<dyn TransactionEventHandler>) -> HandlerId {
        self.inner.register_handler(handler)
    }

    fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.unregister_handler(id)
    }

    fn shutdown(&self) -> StoreResult<()> {
        self.log.lock().push(self.label.clone());
        self.inner.shutdown()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

/// Opens [`TrackingStore`]s, keeping each one by path so tests can inspect
/// it after the proxy lets go.
#[derive(Default)]
pub struct TrackingConnector {
    log: ShutdownLog,
    stores: Mutex<HashMap<String, MemoryStore>>,
}

impl TrackingConnector {
    pub fn new(log: ShutdownLog) -> Self {
        Self {
            log,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store for `path`, if it was ever opened.
    pub fn store(&self, path: &str) -> Option<MemoryStore> {
        self.stores.lock().get(path).cloned()
    }
}

impl StoreConnector for TrackingConnector {
    fn open(&self, path: &str) -> StoreResult<Arc<dyn GraphStore>> {
        let inner = MemoryStore::in_memory();
        self.stores.lock().insert(path.to_string(), inner.clone());
        Ok(Arc::new(TrackingStore {
            label: path.to_string(),
            inner,
            log: Arc::clone(&self.log),
        }))
    }
}
