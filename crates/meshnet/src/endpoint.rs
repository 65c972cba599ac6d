//! The transport endpoint contract a [`crate::Proxy`] talks through.
//!
//! The transport itself is not part of this crate. An endpoint delivers
//! messages to exactly one partner, in order, and reports what it could not
//! deliver. Whatever arrives from the partner is handed to the
//! [`crate::ProxyManager`] with [`crate::ProxyManager::deliver`].

use crate::*;
use std::sync::Arc;

/// Things an endpoint reports back to its proxy.
#[derive(Debug)]
pub enum EndpointEvent {
    /// A message from the partner.
    MessageReceived(MeshMessage),

    /// These messages could not be delivered, the endpoint is still usable.
    SendingFailed(Vec<MeshMessage>),

    /// The endpoint can no longer communicate. Carries undelivered messages.
    Disabled(Vec<MeshMessage>),
}

/// An [`EndpointEvent`] tagged with the endpoint instance that raised it.
pub(crate) type TaggedEvent = (u64, EndpointEvent);

/// Receiving side of every [`EndpointEventSender`] towards one peer.
pub(crate) type EndpointEventReceiver = tokio::sync::mpsc::UnboundedReceiver<TaggedEvent>;

/// Channel on which one endpoint reports [`EndpointEvent`]s.
///
/// All endpoints ever created towards the same peer report into the same
/// inbox. Each sender stamps its events with its own instance number, so
/// events from an endpoint that has since been replaced can be told apart.
#[derive(Clone, Debug)]
pub struct EndpointEventSender {
    instance: u64,
    inbox: tokio::sync::mpsc::UnboundedSender<TaggedEvent>,
}

impl EndpointEventSender {
    pub(crate) fn new(
        instance: u64,
        inbox: tokio::sync::mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        Self { instance, inbox }
    }

    /// The endpoint instance this sender belongs to.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Report an event. Fails once nobody listens for this peer any more.
    pub fn send(&self, event: EndpointEvent) -> MeshResult<()> {
        self.inbox
            .send((self.instance, event))
            .map_err(|_| MeshError::from("endpoint event inbox closed"))
    }
}

/// One side of a message channel towards a single partner.
#[cfg_attr(feature = "test_utils", mockall::automock)]
pub trait MessageEndpoint: 'static + Send + Sync {
    /// The peer on the other end.
    fn partner(&self) -> PeerLocation;

    /// Start talking to the partner. Idempotent.
    fn start_communicating(&self);

    /// Queue a message for delivery. Returns once queued, delivery failures
    /// are reported later as [`EndpointEvent::SendingFailed`].
    fn enqueue_message_for_send(&self, msg: MeshMessage) -> MeshResult<()>;

    /// Release all resources. Nothing is sent afterwards.
    fn die(&self);

    /// Has [`MessageEndpoint::die`] been called, or did the endpoint fail?
    fn is_dead(&self) -> bool;
}

/// Shared handle to an endpoint.
pub type DynMessageEndpoint = Arc<dyn MessageEndpoint>;

/// Creates endpoints on behalf of the [`crate::ProxyManager`].
pub trait EndpointFactory: 'static + Send + Sync {
    /// Create an endpoint from `local` to `partner` reporting on `events`.
    fn create_endpoint(
        &self,
        local: PeerLocation,
        partner: PeerLocation,
        events: EndpointEventSender,
    ) -> MeshResult<DynMessageEndpoint>;
}

impl<F> EndpointFactory for F
where
    F: Fn(PeerLocation, PeerLocation, EndpointEventSender) -> MeshResult<DynMessageEndpoint>
        + 'static
        + Send
        + Sync,
{
    fn create_endpoint(
        &self,
        local: PeerLocation,
        partner: PeerLocation,
        events: EndpointEventSender,
    ) -> MeshResult<DynMessageEndpoint> {
        self(local, partner, events)
    }
}
