//! The per-peer communication channel.
//!
//! A [`Proxy`] owns the endpoint towards exactly one peer. Outbound intents
//! become messages. Incoming messages run through a fixed sequence of steps
//! that mutates the local store and, when the peer asked for something,
//! builds a response.

use crate::lease::LeaseListeners;
use crate::response_tracker::ResponseTracker;
use crate::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod inbound;
mod outbound;
mod requests;

/// Communication with one peer. Cheap to clone.
///
/// At most one live proxy exists per peer; the [`ProxyManager`] enforces this.
/// The proxy refers back to its manager weakly, so neither the proxy nor its
/// lease listeners keep the manager alive.
#[derive(Clone)]
pub struct Proxy(Arc<ProxyInner>);

struct ProxyInner {
    peer: PeerLocation,
    store: Arc<dyn LocalStore>,
    manager: WeakProxyManager,
    endpoint: DynMessageEndpoint,
    tuning_params: ProxyTuningParams,
    coherence: Mutex<Option<CoherenceSpec>>,
    lease: Mutex<Lease>,
    listeners: LeaseListeners,
    lock_tracker: ResponseTracker,
    home_tracker: ResponseTracker,
    replica_tracker: ResponseTracker,
    dead: AtomicBool,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("peer", &self.0.peer)
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Proxy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        peer: PeerLocation,
        store: Arc<dyn LocalStore>,
        manager: WeakProxyManager,
        endpoint: DynMessageEndpoint,
        tuning_params: ProxyTuningParams,
        coherence: Option<CoherenceSpec>,
        lease: Lease,
    ) -> Self {
        Self(Arc::new(ProxyInner {
            peer,
            store,
            manager,
            endpoint,
            tuning_params,
            coherence: Mutex::new(coherence),
            lease: Mutex::new(lease),
            listeners: LeaseListeners::default(),
            lock_tracker: ResponseTracker::new("lock"),
            home_tracker: ResponseTracker::new("home"),
            replica_tracker: ResponseTracker::new("replica"),
            dead: AtomicBool::new(false),
        }))
    }

    /// The peer on the other end.
    pub fn peer(&self) -> &PeerLocation {
        &self.0.peer
    }

    /// The coherence explicitly requested for this peer, if any.
    pub fn coherence_spec(&self) -> Option<CoherenceSpec> {
        self.0.coherence.lock().clone()
    }

    /// The coherence in effect, falling back to [`CoherenceSpec::default`].
    pub fn coherence(&self) -> CoherenceSpec {
        self.coherence_spec().unwrap_or_default()
    }

    /// Change the refresh policy for this peer.
    pub fn set_coherence(&self, coherence: Option<CoherenceSpec>) {
        *self.0.coherence.lock() = coherence;
        self.fire_lease_updated();
    }

    /// Current lease timestamps.
    pub fn lease(&self) -> Lease {
        *self.0.lease.lock()
    }

    /// Subscribe to lease updates of this proxy.
    pub fn add_lease_listener(&self, listener: impl LeaseManagementListener) -> ListenerId {
        self.0.listeners.subscribe(Arc::new(listener))
    }

    /// Unsubscribe. Returns false if the id was not subscribed.
    pub fn remove_lease_listener(&self, id: ListenerId) -> bool {
        self.0.listeners.unsubscribe(id)
    }

    /// Has this proxy been disposed, or has its endpoint died?
    pub fn is_dead(&self) -> bool {
        self.0.dead.load(Ordering::Acquire) || self.0.endpoint.is_dead()
    }

    /// The persistent part of this proxy.
    pub fn as_externalized(&self) -> ExternalizedProxy {
        ExternalizedProxy {
            peer: self.0.peer.clone(),
            coherence: self.coherence_spec(),
            lease: self.lease(),
        }
    }

    pub(crate) fn start_communicating(&self) {
        self.0.endpoint.start_communicating();
    }

    pub(crate) fn same_as(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn manager(&self) -> Option<ProxyManager> {
        self.0.manager.upgrade()
    }

    fn fire_lease_updated(&self) {
        self.0.listeners.fire(&LeaseUpdatedEvent {
            peer: self.0.peer.clone(),
        });
    }

    /// Put a message on the wire. Empty messages are dropped here, so a
    /// round with nothing to say produces no traffic.
    pub(crate) fn send(&self, mut msg: MeshMessage) -> MeshResult<()> {
        if msg.is_empty() {
            tracing::trace!(peer = %self.0.peer, "not sending empty message");
            return Ok(());
        }
        if self.is_dead() {
            return Err(MeshError::EndpointDead(self.0.peer.clone()));
        }
        // anything that asks for something gets an id, so the peer answers
        if msg.request_id.is_none() && msg.has_requests() {
            msg.request_id = Some(crate::response_tracker::next_msg_id());
        }
        tracing::trace!(
            peer = %self.0.peer,
            request_id = ?msg.request_id,
            response_id = ?msg.response_id,
            changes = %msg.change_count(),
            conveyed = %msg.conveyed_objects.len(),
            cease = %msg.cease_communications,
            "sending message",
        );
        self.0.endpoint.enqueue_message_for_send(msg)?;
        self.0.lease.lock().touch_updated(Timestamp::now());
        Ok(())
    }

    /// Fail everything pending, release the endpoint, tell the listeners.
    /// Idempotent.
    pub(crate) fn dispose(&self) {
        if self.0.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(peer = %self.0.peer, "disposing proxy");
        let peer = self.0.peer.clone();
        for tracker in [
            &self.0.lock_tracker,
            &self.0.home_tracker,
            &self.0.replica_tracker,
        ] {
            tracker.fail_all(|| MeshError::EndpointDead(peer.clone()));
        }
        self.0.endpoint.die();
        self.fire_lease_updated();
    }

    /// The endpoint could not deliver these messages. Requests among them
    /// fail right away instead of waiting for their timeout.
    pub(crate) fn message_sending_failed(&self, msgs: Vec<MeshMessage>) {
        for msg in msgs {
            tracing::warn!(
                peer = %self.0.peer,
                request_id = ?msg.request_id,
                "message could not be delivered",
            );
            if let Some(request_id) = msg.request_id {
                for tracker in [
                    &self.0.lock_tracker,
                    &self.0.home_tracker,
                    &self.0.replica_tracker,
                ] {
                    tracker.respond_err(request_id, MeshError::EndpointDead(self.0.peer.clone()));
                }
            }
        }
    }

    /// The endpoint is gone for good.
    pub(crate) fn disabling_error(&self, undelivered: Vec<MeshMessage>) {
        tracing::warn!(
            peer = %self.0.peer,
            undelivered = %undelivered.len(),
            "endpoint disabled, disposing proxy",
        );
        match self.manager() {
            Some(manager) => manager.remove(&self.0.peer),
            None => self.dispose(),
        }
    }
}
