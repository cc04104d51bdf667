//! Registry of cell sinks
//!
//! The rendering layer registers one sink per visible cell and keeps the returned
//! `SinkRegistration` for as long as the cell is mounted. Dropping it unregisters
//! the sink, so no callback can reach a detached cell.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::coord::types::CellKey;

/// Callback surface owned by whatever renders a cell.
///
/// The coordinator only ever writes to a sink.
pub trait CellSink: Send + Sync {
    /// A run touching this cell has started
    fn loading(&self);

    /// Streamed answer for this cell
    fn set_data(&self, answer: &str);

    /// Back to idle, e.g. after a transport failure
    fn loaded(&self);

    /// The run completed without any data for this cell
    fn no_result(&self) {
        self.loaded();
    }
}

struct Registered {
    id: u64,
    sink: Arc<dyn CellSink>,
}

type SinkMap = DashMap<CellKey, Registered>;

/// Typed lookup from cell to sink
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: Arc<SinkMap>,
    next_id: Arc<AtomicU64>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `key`, replacing any previous sink for that cell
    #[must_use = "dropping the registration unregisters the sink"]
    pub fn register(&self, key: CellKey, sink: Arc<dyn CellSink>) -> SinkRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.sinks.insert(key.clone(), Registered { id, sink }).is_some() {
            debug!(cell = %key, "Replaced existing cell sink");
        }
        SinkRegistration {
            key,
            id,
            sinks: Arc::downgrade(&self.sinks),
        }
    }

    /// Sink for `key`, cloned out so no map guard is held during callbacks
    pub fn get(&self, key: &CellKey) -> Option<Arc<dyn CellSink>> {
        self.sinks.get(key).map(|entry| entry.sink.clone())
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.sinks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Keeps a sink registered until dropped
pub struct SinkRegistration {
    key: CellKey,
    id: u64,
    sinks: Weak<SinkMap>,
}

impl SinkRegistration {
    pub fn key(&self) -> &CellKey {
        &self.key
    }

    /// Unregister now (same as dropping)
    pub fn unregister(self) {}
}

impl Drop for SinkRegistration {
    fn drop(&mut self) {
        if let Some(sinks) = self.sinks.upgrade() {
            // A newer registration for the same cell stays in place.
            sinks.remove_if(&self.key, |_, registered| registered.id == self.id);
        }
    }
}
