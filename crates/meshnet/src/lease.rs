//! Lease bookkeeping and lease-change notification.

use crate::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Logical liveness timestamps of a proxy. They survive restarts through
/// [`crate::ExternalizedProxy`], so they may predate the proxy object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Lease {
    /// when the proxy was first created
    pub time_created: Timestamp,
    /// when we last sent the peer something
    pub time_updated: Timestamp,
    /// when we last processed something from the peer
    pub time_read: Timestamp,
    /// when the lease runs out, [`Timestamp::NEVER`] if it does not
    pub time_expires: Timestamp,
}

impl Lease {
    /// A lease starting at `now` that never expires.
    pub fn new(now: Timestamp) -> Self {
        Self {
            time_created: now,
            time_updated: now,
            time_read: now,
            time_expires: Timestamp::NEVER,
        }
    }

    /// Has the lease run out as of `now`?
    pub fn is_expired(&self, now: Timestamp) -> bool {
        !self.time_expires.is_never() && self.time_expires < now
    }

    pub(crate) fn touch_updated(&mut self, now: Timestamp) {
        self.time_updated = now;
    }

    pub(crate) fn touch_read(&mut self, now: Timestamp, lease_ms: Option<u64>) {
        self.time_read = now;
        if let Some(ms) = lease_ms {
            self.time_expires = now.saturating_add_millis(ms);
        }
    }
}

/// Fired after a proxy changed state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseUpdatedEvent {
    /// The peer whose proxy changed.
    pub peer: PeerLocation,
}

/// Receives [`LeaseUpdatedEvent`]s.
pub trait LeaseManagementListener: 'static + Send + Sync {
    /// The lease of a proxy was updated.
    fn lease_updated(&self, event: &LeaseUpdatedEvent);
}

impl<F> LeaseManagementListener for F
where
    F: Fn(&LeaseUpdatedEvent) + 'static + Send + Sync,
{
    fn lease_updated(&self, event: &LeaseUpdatedEvent) {
        self(event)
    }
}

/// Handle returned by subscribing, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A single subscription list with explicit unsubscribe.
#[derive(Default)]
pub(crate) struct LeaseListeners {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn LeaseManagementListener>)>>,
}

impl LeaseListeners {
    pub fn subscribe(&self, listener: Arc<dyn LeaseManagementListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut lock = self.listeners.lock();
        let before = lock.len();
        lock.retain(|(i, _)| *i != id);
        lock.len() != before
    }

    pub fn fire(&self, event: &LeaseUpdatedEvent) {
        // listeners may subscribe or unsubscribe from inside the callback
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for l in listeners {
            l.lease_updated(event);
        }
    }
}
