use crate::*;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Records = BTreeMap<ObjectId, ReplicaSnapshot>;

struct MemStoreInner {
    local: PeerLocation,
    points_to_itself: AtomicBool,
    records: Mutex<Records>,
}

/// A [`LocalStore`] keeping every replica in memory.
///
/// Transactions hold the store lock until they commit or drop; a dropped
/// transaction rolls back.
#[derive(Clone)]
pub struct MemStore(Arc<MemStoreInner>);

impl MemStore {
    /// An empty store at `local` that points replicas to itself.
    pub fn new(local: PeerLocation) -> Self {
        Self(Arc::new(MemStoreInner {
            local,
            points_to_itself: AtomicBool::new(true),
            records: Mutex::new(BTreeMap::new()),
        }))
    }

    /// Change [`LocalStore::points_replicas_to_itself`].
    pub fn set_points_replicas_to_itself(&self, points_to_itself: bool) {
        self.0.points_to_itself.store(points_to_itself, Ordering::Relaxed);
    }

    /// A copy of the replica, if present.
    pub fn get(&self, id: &ObjectId) -> Option<ReplicaSnapshot> {
        self.0.records.lock().get(id).cloned()
    }

    /// Ids of every replica.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.0.records.lock().keys().cloned().collect()
    }

    /// Does the replica exist and hold the lock?
    pub fn holds_lock(&self, id: &ObjectId) -> bool {
        self.get(id).map(|r| r.has_lock()).unwrap_or(false)
    }

    /// Replace or add a replica directly, bypassing transactions.
    pub fn insert(&self, snapshot: ReplicaSnapshot) {
        self.0.records.lock().insert(snapshot.id.clone(), snapshot);
    }

    /// Decide whether the replica hands its lock out on request.
    pub fn set_give_up_lock(&self, id: &ObjectId, give_up: bool) -> MeshResult<()> {
        self.with_record(id, |r| {
            r.give_up_lock = give_up;
            Ok(())
        })
    }

    fn with_record<R>(
        &self,
        id: &ObjectId,
        f: impl FnOnce(&mut ReplicaSnapshot) -> MeshResult<R>,
    ) -> MeshResult<R> {
        let mut lock = self.0.records.lock();
        let record = lock
            .get_mut(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))?;
        f(record)
    }
}

impl LocalStore for MemStore {
    fn local_location(&self) -> PeerLocation {
        self.0.local.clone()
    }

    fn points_replicas_to_itself(&self) -> bool {
        self.0.points_to_itself.load(Ordering::Relaxed)
    }

    fn replica_info(&self, id: &ObjectId) -> Option<ReplicaInfo> {
        self.0.records.lock().get(id).map(ReplicaInfo::from)
    }

    fn externalize(&self, id: &ObjectId, strip_authority: bool) -> MeshResult<ReplicaSnapshot> {
        let mut snapshot = self
            .get(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))?;
        snapshot.authoritative = snapshot.is_home() && !strip_authority;
        if !strip_authority {
            snapshot.proxies.clear();
            snapshot.proxy_towards_home = None;
            snapshot.proxy_towards_lock = None;
        }
        Ok(snapshot)
    }

    fn push_lock(&self, id: &ObjectId, _from: &PeerLocation) -> MeshResult<()> {
        self.with_record(id, |r| {
            r.proxy_towards_lock = None;
            Ok(())
        })
    }

    fn surrender_lock(&self, id: &ObjectId, to: &PeerLocation) -> MeshResult<()> {
        self.with_record(id, |r| {
            if !r.has_lock() {
                return Err(MeshError::NotPermitted(format!("{} does not hold the lock", id)));
            }
            r.proxy_towards_lock = Some(to.clone());
            Ok(())
        })
    }

    fn reclaim_lock(&self, id: &ObjectId) -> MeshResult<Option<PeerLocation>> {
        self.with_record(id, |r| Ok(r.proxy_towards_lock.take()))
    }

    fn lock_reclaimed(&self, id: &ObjectId, by: &PeerLocation) -> MeshResult<Option<PeerLocation>> {
        self.with_record(id, |r| Ok(r.proxy_towards_lock.replace(by.clone())))
    }

    fn push_home(&self, id: &ObjectId, _from: &PeerLocation) -> MeshResult<()> {
        self.with_record(id, |r| {
            r.proxy_towards_home = None;
            r.authoritative = true;
            Ok(())
        })
    }

    fn surrender_home(&self, id: &ObjectId, to: &PeerLocation) -> MeshResult<()> {
        self.with_record(id, |r| {
            if !r.is_home() {
                return Err(MeshError::NotPermitted(format!("{} is not home", id)));
            }
            r.proxy_towards_home = Some(to.clone());
            r.authoritative = false;
            Ok(())
        })
    }

    fn register_replication_towards(&self, id: &ObjectId, peer: &PeerLocation) -> MeshResult<()> {
        self.with_record(id, |r| {
            r.proxies.insert(peer.clone());
            Ok(())
        })
    }

    fn unregister_replication_towards(
        &self,
        id: &ObjectId,
        peer: &PeerLocation,
    ) -> MeshResult<()> {
        self.with_record(id, |r| {
            r.proxies.remove(peer);
            Ok(())
        })
    }

    fn begin_transaction(
        &self,
        ctx: IncomingContext,
    ) -> MeshResult<Box<dyn StoreTransaction + '_>> {
        let guard = self.0.records.lock();
        let backup = guard.clone();
        Ok(Box::new(MemTransaction {
            guard,
            backup: Some(backup),
            origin: ctx.peer,
            events: Vec::new(),
        }))
    }
}

struct MemTransaction<'a> {
    guard: MutexGuard<'a, Records>,
    backup: Option<Records>,
    origin: Option<PeerLocation>,
    events: Vec<CommittedEvent>,
}

impl Drop for MemTransaction<'_> {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            tracing::debug!("rolling back uncommitted transaction");
            *self.guard = backup;
        }
    }
}

impl MemTransaction<'_> {
    fn record_mut(&mut self, id: &ObjectId) -> MeshResult<&mut ReplicaSnapshot> {
        self.guard
            .get_mut(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))
    }

    fn changed(&mut self, change: Change, replicated_towards: BTreeSet<PeerLocation>) {
        self.events.push(CommittedEvent::Changed {
            change,
            replicated_towards,
        });
    }

    fn remove(&mut self, id: &ObjectId) -> MeshResult<ReplicaSnapshot> {
        self.guard
            .remove(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))
    }
}

fn no_neighbor(id: &ObjectId, neighbor: &ObjectId) -> MeshError {
    MeshError::NotPermitted(format!("{} is not a neighbor of {}", neighbor, id))
}

impl LifecycleManager for MemTransaction<'_> {
    fn ripple_create(
        &mut self,
        snapshot: &ReplicaSnapshot,
        origin: &PeerLocation,
    ) -> MeshResult<ObjectId> {
        if self.guard.contains_key(&snapshot.id) {
            return Err(MeshError::NotPermitted(format!("{} already exists", snapshot.id)));
        }
        let mut replica = snapshot.clone();
        replica.proxies = [origin.clone()].into();
        replica.proxy_towards_home = Some(origin.clone());
        replica.proxy_towards_lock = Some(origin.clone());
        replica.authoritative = false;
        replica.give_up_lock = true;
        replica.give_up_home = true;
        self.guard.insert(replica.id.clone(), replica);
        Ok(snapshot.id.clone())
    }

    fn ripple_delete(
        &mut self,
        id: &ObjectId,
        _origin: &PeerLocation,
        time: Timestamp,
    ) -> MeshResult<()> {
        let removed = self.remove(id)?;
        self.changed(
            Change::Deleted {
                id: id.clone(),
                time,
            },
            removed.proxies,
        );
        Ok(())
    }

    fn resynchronize(
        &mut self,
        snapshot: &ReplicaSnapshot,
        origin: &PeerLocation,
    ) -> MeshResult<ObjectId> {
        let current = match self.guard.get(&snapshot.id) {
            Some(current) => current.clone(),
            None => return self.ripple_create(snapshot, origin),
        };
        // other peers replicating through us hear about the difference
        let delta = Differencer::new([current.clone()]).determine_delta(&[snapshot.clone()]);
        let record = self.record_mut(&snapshot.id)?;
        record.entity_types = snapshot.entity_types.clone();
        record.properties = snapshot.properties.clone();
        record.neighbors = snapshot.neighbors.clone();
        record.equivalents = snapshot.equivalents.clone();
        record.time_updated = snapshot.time_updated;
        // home stays home
        if let Some(old_home) = record.proxy_towards_home.take() {
            if record.proxy_towards_lock.as_ref() == Some(&old_home) {
                record.proxy_towards_lock = Some(origin.clone());
            }
            record.proxy_towards_home = Some(origin.clone());
            record.proxies.insert(origin.clone());
        }
        for (_, batch) in delta.change_batches() {
            for change in batch {
                self.changed(change.clone(), current.proxies.clone());
            }
        }
        Ok(snapshot.id.clone())
    }

    fn purge_replica(&mut self, id: &ObjectId) -> MeshResult<()> {
        let removed = self.remove(id)?;
        self.events.push(CommittedEvent::Purged {
            id: id.clone(),
            replicated_towards: removed.proxies,
        });
        Ok(())
    }

    fn create(
        &mut self,
        id: ObjectId,
        entity_types: BTreeSet<String>,
        time: Timestamp,
    ) -> MeshResult<ObjectId> {
        if self.guard.contains_key(&id) {
            return Err(MeshError::NotPermitted(format!("{} already exists", id)));
        }
        let mut replica = ReplicaSnapshot::new_home(id.clone(), time);
        replica.entity_types = entity_types;
        self.guard.insert(id.clone(), replica);
        Ok(id)
    }
}

impl StoreTransaction for MemTransaction<'_> {
    fn replica_info(&self, id: &ObjectId) -> Option<ReplicaInfo> {
        self.guard.get(id).map(ReplicaInfo::from)
    }

    fn apply_change(&mut self, change: &Change) -> MeshResult<()> {
        if let Change::Deleted { id, time } = change {
            let removed = self.remove(id)?;
            self.changed(
                Change::Deleted {
                    id: id.clone(),
                    time: *time,
                },
                removed.proxies,
            );
            return Ok(());
        }
        let record = self.record_mut(change.subject())?;
        match change {
            Change::TypeAdded { entity_type, .. } => {
                record.entity_types.insert(entity_type.clone());
            }
            Change::TypeRemoved { entity_type, .. } => {
                record.entity_types.remove(entity_type);
            }
            Change::PropertyChanged {
                property,
                new_value,
                ..
            } => match new_value {
                Some(v) => {
                    record.properties.insert(property.clone(), v.clone());
                }
                None => {
                    record.properties.remove(property);
                }
            },
            Change::NeighborAdded {
                neighbor,
                role_types,
                ..
            } => {
                record
                    .neighbors
                    .entry(neighbor.clone())
                    .or_default()
                    .extend(role_types.iter().cloned());
            }
            Change::NeighborRemoved { id, neighbor, .. } => {
                if record.neighbors.remove(neighbor).is_none() {
                    return Err(no_neighbor(id, neighbor));
                }
            }
            Change::RoleAdded {
                id,
                neighbor,
                role_type,
                ..
            } => {
                record
                    .neighbors
                    .get_mut(neighbor)
                    .ok_or_else(|| no_neighbor(id, neighbor))?
                    .insert(role_type.clone());
            }
            Change::RoleRemoved {
                id,
                neighbor,
                role_type,
                ..
            } => {
                record
                    .neighbors
                    .get_mut(neighbor)
                    .ok_or_else(|| no_neighbor(id, neighbor))?
                    .remove(role_type);
            }
            Change::EquivalentAdded { equivalent, .. } => {
                record.equivalents.insert(equivalent.clone());
            }
            Change::EquivalentRemoved { equivalent, .. } => {
                record.equivalents.remove(equivalent);
            }
            Change::Deleted { id, .. } => {
                return Err(MeshError::ProtocolViolation(format!(
                    "deletion of {} applied as a content change",
                    id
                )));
            }
        }
        record.time_updated = record.time_updated.max(change.time());
        let replicated_towards = record.proxies.clone();
        self.changed(change.clone(), replicated_towards);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> MeshResult<CommitReport> {
        self.backup = None;
        Ok(CommitReport {
            origin: self.origin.take(),
            events: std::mem::take(&mut self.events),
        })
    }
}
