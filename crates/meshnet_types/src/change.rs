//! Changes to replicated objects, as carried by messages and reported by
//! local-store commits.

use crate::*;
use std::collections::BTreeSet;

/// Names the message batch a [`Change`] travels in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ChangeKind {
    /// entity type blessed
    TypeAddition,
    /// entity type unblessed
    TypeRemoval,
    /// property value set or cleared
    PropertyChange,
    /// relationship to a neighbor created
    NeighborAddition,
    /// relationship to a neighbor removed
    NeighborRemoval,
    /// role type added to a relationship
    RoleAddition,
    /// role type removed from a relationship
    RoleRemoval,
    /// equivalence added
    EquivalentAddition,
    /// equivalence removed
    EquivalentRemoval,
    /// object deleted
    Deletion,
}

/// One change to one object.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum Change {
    /// entity type blessed
    TypeAdded {
        /// subject
        id: ObjectId,
        /// entity type name
        entity_type: String,
        /// when
        time: Timestamp,
    },
    /// entity type unblessed
    TypeRemoved {
        /// subject
        id: ObjectId,
        /// entity type name
        entity_type: String,
        /// when
        time: Timestamp,
    },
    /// property value changed, `None` meaning cleared
    PropertyChanged {
        /// subject
        id: ObjectId,
        /// property type name
        property: String,
        /// value before the change
        old_value: Option<PropertyValue>,
        /// value after the change
        new_value: Option<PropertyValue>,
        /// when
        time: Timestamp,
    },
    /// related to a neighbor
    NeighborAdded {
        /// subject
        id: ObjectId,
        /// the new neighbor
        neighbor: ObjectId,
        /// role types of the new relationship
        role_types: BTreeSet<String>,
        /// when
        time: Timestamp,
    },
    /// unrelated from a neighbor
    NeighborRemoved {
        /// subject
        id: ObjectId,
        /// the former neighbor
        neighbor: ObjectId,
        /// when
        time: Timestamp,
    },
    /// role type added to an existing relationship
    RoleAdded {
        /// subject
        id: ObjectId,
        /// the neighbor on the other end
        neighbor: ObjectId,
        /// role type name
        role_type: String,
        /// when
        time: Timestamp,
    },
    /// role type removed from an existing relationship
    RoleRemoved {
        /// subject
        id: ObjectId,
        /// the neighbor on the other end
        neighbor: ObjectId,
        /// role type name
        role_type: String,
        /// when
        time: Timestamp,
    },
    /// equivalence added
    EquivalentAdded {
        /// subject
        id: ObjectId,
        /// the equivalent object
        equivalent: ObjectId,
        /// when
        time: Timestamp,
    },
    /// equivalence removed
    EquivalentRemoved {
        /// subject
        id: ObjectId,
        /// the formerly equivalent object
        equivalent: ObjectId,
        /// when
        time: Timestamp,
    },
    /// object deleted
    Deleted {
        /// subject
        id: ObjectId,
        /// when
        time: Timestamp,
    },
}

impl Change {
    /// The object this change applies to.
    pub fn subject(&self) -> &ObjectId {
        match self {
            Change::TypeAdded { id, .. }
            | Change::TypeRemoved { id, .. }
            | Change::PropertyChanged { id, .. }
            | Change::NeighborAdded { id, .. }
            | Change::NeighborRemoved { id, .. }
            | Change::RoleAdded { id, .. }
            | Change::RoleRemoved { id, .. }
            | Change::EquivalentAdded { id, .. }
            | Change::EquivalentRemoved { id, .. }
            | Change::Deleted { id, .. } => id,
        }
    }

    /// When the change happened.
    pub fn time(&self) -> Timestamp {
        match self {
            Change::TypeAdded { time, .. }
            | Change::TypeRemoved { time, .. }
            | Change::PropertyChanged { time, .. }
            | Change::NeighborAdded { time, .. }
            | Change::NeighborRemoved { time, .. }
            | Change::RoleAdded { time, .. }
            | Change::RoleRemoved { time, .. }
            | Change::EquivalentAdded { time, .. }
            | Change::EquivalentRemoved { time, .. }
            | Change::Deleted { time, .. } => *time,
        }
    }

    /// The batch this change belongs in.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::TypeAdded { .. } => ChangeKind::TypeAddition,
            Change::TypeRemoved { .. } => ChangeKind::TypeRemoval,
            Change::PropertyChanged { .. } => ChangeKind::PropertyChange,
            Change::NeighborAdded { .. } => ChangeKind::NeighborAddition,
            Change::NeighborRemoved { .. } => ChangeKind::NeighborRemoval,
            Change::RoleAdded { .. } => ChangeKind::RoleAddition,
            Change::RoleRemoved { .. } => ChangeKind::RoleRemoval,
            Change::EquivalentAdded { .. } => ChangeKind::EquivalentAddition,
            Change::EquivalentRemoved { .. } => ChangeKind::EquivalentRemoval,
            Change::Deleted { .. } => ChangeKind::Deletion,
        }
    }
}

/// Something a local-store commit did, with the replication edges the
/// subject had at the time.
#[derive(Clone, Debug, PartialEq)]
pub enum CommittedEvent {
    /// a change was applied
    Changed {
        /// the change
        change: Change,
        /// peers the subject replicated with
        replicated_towards: BTreeSet<PeerLocation>,
    },
    /// a replica was purged from the local store
    Purged {
        /// the purged replica
        id: ObjectId,
        /// peers the replica replicated with
        replicated_towards: BTreeSet<PeerLocation>,
    },
}

/// Result of committing one local-store transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitReport {
    /// The peer whose message caused the transaction, `None` for local work.
    pub origin: Option<PeerLocation>,
    /// What the transaction did, in order.
    pub events: Vec<CommittedEvent>,
}

impl CommitReport {
    /// Nothing happened.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
