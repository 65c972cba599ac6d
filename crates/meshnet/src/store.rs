//! What the protocol needs from the local object store.
//!
//! The store itself lives outside this crate. It holds replica state, knows
//! each replica's replication edges and its home and lock directions, and
//! offers transactions whose commit reports what changed.

use crate::*;
use std::collections::BTreeSet;

/// Explicit context for one unit of local-store work: which peer, if any,
/// caused it. Passed to [`LocalStore::begin_transaction`] so that changes are
/// never echoed back to the peer they came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncomingContext {
    /// The peer whose message is being processed, `None` for local work.
    pub peer: Option<PeerLocation>,
}

impl IncomingContext {
    /// Context for work on behalf of a local user.
    pub fn local() -> Self {
        Self { peer: None }
    }

    /// Context for processing a message from `peer`.
    pub fn from_peer(peer: PeerLocation) -> Self {
        Self { peer: Some(peer) }
    }
}

/// Replication bookkeeping of one replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaInfo {
    /// The replica.
    pub id: ObjectId,
    /// Every peer this replica replicates with.
    pub proxies: BTreeSet<PeerLocation>,
    /// Direction of the home replica, `None` if this is home.
    pub proxy_towards_home: Option<PeerLocation>,
    /// Direction of the lock, `None` if this replica holds it.
    pub proxy_towards_lock: Option<PeerLocation>,
    /// Will this replica hand the lock to a peer that asks?
    pub will_give_up_lock: bool,
    /// Will this replica hand the home designation to a peer that asks?
    pub will_give_up_home: bool,
}

impl ReplicaInfo {
    /// Does this replica hold the lock?
    pub fn has_lock(&self) -> bool {
        self.proxy_towards_lock.is_none()
    }

    /// Is this the home replica?
    pub fn is_home(&self) -> bool {
        self.proxy_towards_home.is_none()
    }

    /// Does this replica replicate with `peer`?
    pub fn replicates_towards(&self, peer: &PeerLocation) -> bool {
        self.proxies.contains(peer)
    }
}

impl From<&ReplicaSnapshot> for ReplicaInfo {
    fn from(s: &ReplicaSnapshot) -> Self {
        Self {
            id: s.id.clone(),
            proxies: s.proxies.clone(),
            proxy_towards_home: s.proxy_towards_home.clone(),
            proxy_towards_lock: s.proxy_towards_lock.clone(),
            will_give_up_lock: s.give_up_lock,
            will_give_up_home: s.give_up_home,
        }
    }
}

/// Operations that materialize, remove and refresh replicas.
/// Only available on an open transaction.
pub trait LifecycleManager {
    /// Create a replica of a remote object, replicating with `origin`.
    fn ripple_create(
        &mut self,
        snapshot: &ReplicaSnapshot,
        origin: &PeerLocation,
    ) -> MeshResult<ObjectId>;

    /// Delete a replica because `origin` deleted the object.
    fn ripple_delete(
        &mut self,
        id: &ObjectId,
        origin: &PeerLocation,
        time: Timestamp,
    ) -> MeshResult<()>;

    /// Overwrite a replica's content with a fresh snapshot from `origin`,
    /// creating the replica if it does not exist. Unless the replica is home,
    /// it replicates with `origin` afterwards and its home direction points
    /// there; a lock direction that followed the old home direction follows
    /// along.
    fn resynchronize(
        &mut self,
        snapshot: &ReplicaSnapshot,
        origin: &PeerLocation,
    ) -> MeshResult<ObjectId>;

    /// Drop a replica locally without deleting the object elsewhere.
    fn purge_replica(&mut self, id: &ObjectId) -> MeshResult<()>;

    /// Create a new object whose home is this store.
    fn create(
        &mut self,
        id: ObjectId,
        entity_types: BTreeSet<String>,
        time: Timestamp,
    ) -> MeshResult<ObjectId>;
}

/// An open local-store transaction.
pub trait StoreTransaction: LifecycleManager {
    /// Bookkeeping of a replica as of this transaction, `None` if there is
    /// no such replica.
    fn replica_info(&self, id: &ObjectId) -> Option<ReplicaInfo>;

    /// Apply one change. A failure leaves the transaction usable.
    fn apply_change(&mut self, change: &Change) -> MeshResult<()>;

    /// Make everything applied so far visible and report it.
    fn commit(self: Box<Self>) -> MeshResult<CommitReport>;
}

/// The local object store, as the protocol sees it.
///
/// Methods outside transactions are for replication bookkeeping only. They
/// must not be called while a transaction is open on the same thread.
pub trait LocalStore: 'static + Send + Sync {
    /// Where this store lives.
    fn local_location(&self) -> PeerLocation;

    /// Does this store extend its own replication graph to peers that
    /// replicate from it, even for objects whose home is elsewhere?
    fn points_replicas_to_itself(&self) -> bool;

    /// Bookkeeping of a replica, `None` if there is no such replica.
    fn replica_info(&self, id: &ObjectId) -> Option<ReplicaInfo>;

    /// Export a replica.
    ///
    /// Without `strip_authority` the recipient is meant to replicate with us:
    /// the snapshot leaves out our replication edges and directions. With it,
    /// the recipient must not treat the snapshot as the home replica's state,
    /// and the snapshot keeps our home direction so the recipient can find
    /// the real home.
    fn externalize(&self, id: &ObjectId, strip_authority: bool) -> MeshResult<ReplicaSnapshot>;

    /// The lock arrived from `from`; this replica now holds it.
    fn push_lock(&self, id: &ObjectId, from: &PeerLocation) -> MeshResult<()>;

    /// Hand the lock held here to `to`.
    fn surrender_lock(&self, id: &ObjectId, to: &PeerLocation) -> MeshResult<()>;

    /// Forcibly take the lock back. Returns the previous lock direction.
    fn reclaim_lock(&self, id: &ObjectId) -> MeshResult<Option<PeerLocation>>;

    /// `by` forcibly took the lock; point the lock direction at it.
    /// Returns the previous lock direction.
    fn lock_reclaimed(&self, id: &ObjectId, by: &PeerLocation) -> MeshResult<Option<PeerLocation>>;

    /// The home designation arrived from `from`; this replica is now home.
    fn push_home(&self, id: &ObjectId, from: &PeerLocation) -> MeshResult<()>;

    /// Hand the home designation held here to `to`.
    fn surrender_home(&self, id: &ObjectId, to: &PeerLocation) -> MeshResult<()>;

    /// Add `peer` to the replica's replication edges.
    fn register_replication_towards(&self, id: &ObjectId, peer: &PeerLocation) -> MeshResult<()>;

    /// Remove `peer` from the replica's replication edges.
    fn unregister_replication_towards(
        &self,
        id: &ObjectId,
        peer: &PeerLocation,
    ) -> MeshResult<()>;

    /// Open a transaction for work described by `ctx`.
    fn begin_transaction(&self, ctx: IncomingContext)
        -> MeshResult<Box<dyn StoreTransaction + '_>>;
}
