//! Serializable replica snapshots.

use crate::*;
use std::collections::{BTreeMap, BTreeSet};

/// Opaque property value. The property type system lives outside this layer.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PropertyValue(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "PropertyValue({:?})", s),
            Err(_) => write!(f, "PropertyValue({} bytes)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// The externalized state of one replica: everything a peer needs to
/// materialize or refresh its own replica of the object.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplicaSnapshot {
    /// identifier, the same on every peer
    pub id: ObjectId,
    /// entity types the object is blessed with
    pub entity_types: BTreeSet<String>,
    /// property values by property type name
    pub properties: BTreeMap<String, PropertyValue>,
    /// neighbors and the role types of the relationship towards each
    pub neighbors: BTreeMap<ObjectId, BTreeSet<String>>,
    /// objects declared equivalent to this one
    pub equivalents: BTreeSet<ObjectId>,
    /// will this replica hand the lock to a peer that asks
    pub give_up_lock: bool,
    /// will this replica hand the home designation to a peer that asks
    pub give_up_home: bool,
    /// every peer this replica replicates with
    pub proxies: BTreeSet<PeerLocation>,
    /// direction of the home replica, `None` if this is the home replica
    pub proxy_towards_home: Option<PeerLocation>,
    /// direction of the lock, `None` if this replica holds the lock
    pub proxy_towards_lock: Option<PeerLocation>,
    /// creation time
    pub time_created: Timestamp,
    /// last update time
    pub time_updated: Timestamp,
    /// last read time
    pub time_read: Timestamp,
    /// expiry time, [`Timestamp::NEVER`] if it never expires
    pub time_expires: Timestamp,
    /// whether the sender claims this is the home replica's state
    pub authoritative: bool,
}

impl ReplicaSnapshot {
    /// A fresh home replica holding its own lock.
    pub fn new_home(id: ObjectId, time: Timestamp) -> Self {
        Self {
            id,
            entity_types: BTreeSet::new(),
            properties: BTreeMap::new(),
            neighbors: BTreeMap::new(),
            equivalents: BTreeSet::new(),
            give_up_lock: true,
            give_up_home: true,
            proxies: BTreeSet::new(),
            proxy_towards_home: None,
            proxy_towards_lock: None,
            time_created: time,
            time_updated: time,
            time_read: time,
            time_expires: Timestamp::NEVER,
            authoritative: true,
        }
    }

    /// Is this the home replica?
    pub fn is_home(&self) -> bool {
        self.proxy_towards_home.is_none()
    }

    /// Does this replica hold the lock?
    pub fn has_lock(&self) -> bool {
        self.proxy_towards_lock.is_none()
    }

    /// Does this replica replicate with `peer`?
    pub fn replicates_towards(&self, peer: &PeerLocation) -> bool {
        self.proxies.contains(peer)
    }

    /// Does the content (types, properties, neighbors, equivalents) match?
    /// Replication bookkeeping and times are ignored.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.entity_types == other.entity_types
            && self.properties == other.properties
            && self.neighbors == other.neighbors
            && self.equivalents == other.equivalents
    }
}
