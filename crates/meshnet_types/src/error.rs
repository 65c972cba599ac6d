use crate::location::PeerLocation;
use crate::object_id::ObjectId;

/// Error type for the meshnet replication protocol.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MeshError {
    /// A correlated response did not arrive in time.
    #[error("Timed out waiting for a response")]
    TimedOut,

    /// The transport endpoint towards this peer can no longer communicate.
    #[error("Endpoint towards {0} is dead")]
    EndpointDead(PeerLocation),

    /// No replica with this id exists in the local store.
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The local store refused an operation.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// A peer location or access path could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A coherence specification could not be parsed.
    #[error("Invalid coherence specification: {0}")]
    InvalidCoherence(String),

    /// A peer sent something this protocol does not allow.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The local store could not open or commit a transaction.
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Failed to encode a message for the wire.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from the wire.
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),

    /// Other
    #[error("Other: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Meshnet result type.
pub type MeshResult<T> = std::result::Result<T, MeshError>;

impl MeshError {
    /// promote a custom error type to a MeshError
    pub fn other(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(e.into())
    }

    /// construct an invalid address error variant
    pub fn invalid_address(s: impl std::fmt::Display) -> Self {
        Self::InvalidAddress(s.to_string())
    }

    /// Is this the timeout variant?
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

impl From<String> for MeshError {
    fn from(s: String) -> Self {
        #[derive(Debug, thiserror::Error)]
        struct OtherError(String);
        impl std::fmt::Display for OtherError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        MeshError::other(OtherError(s))
    }
}

impl From<&str> for MeshError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
