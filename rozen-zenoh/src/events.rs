//! Per-entity event bookkeeping.
//!
//! Engines record QoS events (lost samples, incompatible peers) here;
//! callers poll the counters or register a callback fired on each update.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Kind of QoS event an entity can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// One or more samples from a known publisher were never received.
    MessageLost,
    /// A discovered peer offers a QoS this endpoint cannot match.
    IncompatibleQos,
}

/// Running counters for one event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStatus {
    /// Total occurrences since the entity was created.
    pub total_count: u64,
    /// Occurrences since the status was last taken.
    pub total_count_change: u64,
}

type EventCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Event state shared by one entity and the graph cache.
#[derive(Default)]
pub struct EventsManager {
    statuses: Mutex<HashMap<EventKind, EventStatus>>,
    callbacks: Mutex<HashMap<EventKind, EventCallback>>,
}

impl EventsManager {
    /// Create an empty manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record `count` new occurrences of `kind`.
    pub fn update(&self, kind: EventKind, count: u64) {
        {
            let mut statuses = self.statuses.lock();
            let status = statuses.entry(kind).or_default();
            status.total_count += count;
            status.total_count_change += count;
        }
        if let Some(callback) = self.callbacks.lock().get(&kind) {
            callback(count);
        }
    }

    /// Read the status for `kind`, resetting its change counter.
    pub fn take_status(&self, kind: EventKind) -> EventStatus {
        let mut statuses = self.statuses.lock();
        let status = statuses.entry(kind).or_default();
        let out = *status;
        status.total_count_change = 0;
        out
    }

    /// Register a callback fired with the occurrence count on each update.
    pub fn set_callback(&self, kind: EventKind, callback: impl Fn(u64) + Send + Sync + 'static) {
        self.callbacks.lock().insert(kind, Box::new(callback));
    }

    /// Remove the callback for `kind`.
    pub fn clear_callback(&self, kind: EventKind) {
        self.callbacks.lock().remove(&kind);
    }
}
