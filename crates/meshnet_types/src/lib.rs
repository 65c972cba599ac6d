#![deny(missing_docs)]
//! Types subcrate for meshnet.
//!
//! Pure values shared by every peer: addressing ([`PeerLocation`],
//! [`ObjectAccessPath`]), refresh policy ([`CoherenceSpec`]), replica
//! snapshots and changes, and the wire [`MeshMessage`]. Nothing here
//! performs I/O.

/// Re-exported dependencies.
pub mod dependencies {
    pub use ::rmp_serde;
    pub use ::serde;
    pub use ::thiserror;
    pub use ::url2;
}

mod error;
pub use error::*;

pub mod access_path;
pub mod change;
pub mod coherence;
pub mod location;
pub mod message;
pub mod object_id;
pub mod scope;
pub mod snapshot;
pub mod timestamp;

pub use access_path::{ObjectAccessPath, PeerAccessSpec};
pub use change::{Change, ChangeKind, CommitReport, CommittedEvent};
pub use coherence::CoherenceSpec;
pub use location::PeerLocation;
pub use message::MeshMessage;
pub use object_id::ObjectId;
pub use scope::ScopeSpec;
pub use snapshot::{PropertyValue, ReplicaSnapshot};
pub use timestamp::Timestamp;
