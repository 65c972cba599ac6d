#![deny(missing_docs)]
//! Replication protocol for mesh objects shared between peer stores.
//!
//! Every local store owns a [`ProxyManager`], which keeps one [`Proxy`] per
//! peer. A proxy turns local intents (obtain a replica, pull a lock, forward
//! committed changes) into [`MeshMessage`]s, and applies incoming messages to
//! the local store through a fixed sequence of steps, answering requests on
//! the way. The store and the transport are consumed through the
//! [`LocalStore`] and [`MessageEndpoint`] traits.
//!
//! Enable the `test_utils` feature for an in-memory store and transport.

/// Re-exported dependencies.
pub mod dependencies {
    pub use ::futures;
    pub use ::meshnet_types;
    pub use ::tokio;
    pub use ::tracing;
}

pub use meshnet_types::*;

pub mod config;
pub use config::*;

mod timeout;
pub use timeout::*;

pub mod differencer;
pub mod endpoint;
pub mod externalized;
pub mod lease;
pub mod proxy;
pub mod proxy_manager;
pub mod store;
pub mod trace;

mod response_tracker;

pub use differencer::Differencer;
pub use endpoint::*;
pub use externalized::ExternalizedProxy;
pub use lease::{Lease, LeaseManagementListener, LeaseUpdatedEvent, ListenerId};
pub use proxy::Proxy;
pub use proxy_manager::{ProxyManager, WeakProxyManager};
pub use store::*;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
