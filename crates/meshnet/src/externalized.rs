//! Persistent form of a proxy.

use crate::*;

/// The part of a [`Proxy`] that survives a restart: which peer, how often to
/// refresh, and the lease timestamps.
///
/// Give it back to [`ProxyManager::restore`] to resume talking to the peer.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExternalizedProxy {
    /// The peer on the other end.
    pub peer: PeerLocation,
    /// The refresh policy explicitly requested, if any.
    #[serde(default)]
    pub coherence: Option<CoherenceSpec>,
    /// Lease timestamps as of externalization.
    pub lease: Lease,
}
