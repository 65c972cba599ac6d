//! Outgoing intents.

use super::*;
use std::collections::BTreeSet;

impl Proxy {
    /// Ask the peer for first-time replicas of the objects these paths lead
    /// to. Returns the ids of the replicas now present locally; they have been
    /// materialized by the time this returns.
    pub async fn obtain_replica(
        &self,
        paths: Vec<ObjectAccessPath>,
        timeout: ProxyTimeout,
    ) -> MeshResult<Vec<ObjectId>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let (request_id, pending) = self.0.replica_tracker.register();
        tracing::debug!(peer = %self.0.peer, %request_id, paths = %paths.len(), "obtain replica");
        self.send(MeshMessage {
            request_id: Some(request_id),
            requested_first_time_objects: paths,
            ..Default::default()
        })?;
        let response = pending.wait(timeout).await?;
        Ok(response
            .conveyed_objects
            .iter()
            .chain(response.resynchronized_objects.iter())
            .map(|s| s.id.clone())
            .collect())
    }

    /// Ask the peer for the lock on these replicas. Returns the ids whose
    /// lock was handed over; those replicas hold the lock locally by the
    /// time this returns.
    pub async fn try_to_obtain_locks(
        &self,
        ids: Vec<ObjectId>,
        timeout: ProxyTimeout,
    ) -> MeshResult<Vec<ObjectId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (request_id, pending) = self.0.lock_tracker.register();
        tracing::debug!(peer = %self.0.peer, %request_id, ?ids, "requesting locks");
        self.send(MeshMessage {
            request_id: Some(request_id),
            requested_locks: ids,
            ..Default::default()
        })?;
        let response = pending.wait(timeout).await?;
        Ok(response.pushed_locks)
    }

    /// Ask the peer to hand over the home designation of these replicas.
    /// Returns the ids for which this store is now home.
    pub async fn try_to_obtain_home_replicas(
        &self,
        ids: Vec<ObjectId>,
        timeout: ProxyTimeout,
    ) -> MeshResult<Vec<ObjectId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (request_id, pending) = self.0.home_tracker.register();
        tracing::debug!(peer = %self.0.peer, %request_id, ?ids, "requesting home replicas");
        self.send(MeshMessage {
            request_id: Some(request_id),
            requested_home_replicas: ids,
            ..Default::default()
        })?;
        let response = pending.wait(timeout).await?;
        Ok(response.pushed_home_replicas)
    }

    /// Tell the peer we forcibly took the lock on these replicas.
    /// Not acknowledged.
    pub fn force_obtain_locks(&self, ids: Vec<ObjectId>) -> MeshResult<()> {
        tracing::debug!(peer = %self.0.peer, ?ids, "announcing reclaimed locks");
        self.send(MeshMessage {
            reclaimed_locks: ids,
            ..Default::default()
        })
    }

    /// Ask the peer to send fresh snapshots of these replicas.
    /// The snapshots arrive later through the inbound path.
    pub fn resynchronize_dependent_replicas(&self, ids: Vec<ObjectId>) -> MeshResult<()> {
        tracing::debug!(peer = %self.0.peer, ?ids, "requesting resynchronization");
        self.send(MeshMessage {
            requested_resynchronize: ids,
            ..Default::default()
        })
    }

    /// Tell the peer we no longer replicate these objects with it, and drop
    /// our edges towards it.
    pub fn cancel_replicas(&self, ids: Vec<ObjectId>) -> MeshResult<()> {
        let store = &self.0.store;
        let peer = &self.0.peer;
        for id in &ids {
            let edge = store
                .replica_info(id)
                .map(|info| info.replicates_towards(peer))
                .unwrap_or(false);
            if edge {
                if let Err(err) = store.unregister_replication_towards(id, peer) {
                    tracing::debug!(%peer, %id, ?err, "could not drop edge");
                }
            }
        }
        tracing::debug!(%peer, ?ids, "canceling replicas");
        self.send(MeshMessage {
            canceled_objects: ids,
            ..Default::default()
        })
    }

    /// Hand the home designation of these replicas to the peer.
    /// The caller has already surrendered them locally.
    pub fn push_home_replicas(&self, ids: Vec<ObjectId>) -> MeshResult<()> {
        self.send(MeshMessage {
            pushed_home_replicas: ids,
            ..Default::default()
        })
    }

    /// Hand the lock on these replicas to the peer without being asked.
    ///
    /// Only replicas holding the lock here take part. A replica the peer
    /// does not have through us yet travels along in full. Returns the ids
    /// whose lock was handed over.
    pub fn push_locks(&self, ids: Vec<ObjectId>) -> MeshResult<Vec<ObjectId>> {
        let store = &self.0.store;
        let peer = &self.0.peer;
        // a lock surrendered into a dead endpoint is lost
        if self.is_dead() {
            return Err(MeshError::EndpointDead(peer.clone()));
        }
        let mut msg = MeshMessage::new();
        for id in ids {
            let info = match store.replica_info(&id) {
                Some(info) if info.has_lock() => info,
                Some(_) => {
                    tracing::debug!(%peer, %id, "not pushing a lock we do not hold");
                    continue;
                }
                None => {
                    tracing::debug!(%peer, %id, "not pushing the lock of a missing replica");
                    continue;
                }
            };
            if !info.replicates_towards(peer) && !self.convey(&info, &mut msg) {
                continue;
            }
            match store.surrender_lock(&id, peer) {
                Ok(()) => msg.pushed_locks.push(id),
                Err(err) => tracing::warn!(%peer, %id, ?err, "could not surrender lock"),
            }
        }
        let pushed = msg.pushed_locks.clone();
        tracing::debug!(%peer, ?pushed, "pushing locks");
        self.send(msg)?;
        Ok(pushed)
    }

    /// Graceful shutdown: tell the peer, then leave the manager.
    pub fn initiate_cease_communications(&self) {
        tracing::debug!(peer = %self.0.peer, "ceasing communications");
        if let Err(err) = self.send(MeshMessage {
            cease_communications: true,
            ..Default::default()
        }) {
            tracing::debug!(peer = %self.0.peer, ?err, "could not send cease");
        }
        match self.manager() {
            Some(manager) => manager.remove(&self.0.peer),
            None => self.dispose(),
        }
    }

    /// Release the endpoint. When `is_permanent`, the peer is told first
    /// and the proxy leaves the manager.
    pub fn die(&self, is_permanent: bool) {
        if is_permanent {
            self.initiate_cease_communications();
        }
        self.dispose();
    }

    /// Forward what a local-store transaction did to this peer.
    ///
    /// Changes that came from this peer are not echoed back. Only changes to
    /// objects replicating with this peer are sent. A neighbor newly related
    /// to such an object is conveyed in full when the peer has no replica of
    /// it through us yet.
    pub fn transaction_committed(&self, report: &CommitReport) {
        if report.origin.as_ref() == Some(&self.0.peer) || self.is_dead() {
            return;
        }
        let mut msg = MeshMessage::new();
        let mut conveyed = BTreeSet::new();
        for event in &report.events {
            match event {
                CommittedEvent::Changed {
                    change,
                    replicated_towards,
                } => {
                    if !replicated_towards.contains(&self.0.peer) {
                        continue;
                    }
                    if let Change::NeighborAdded { neighbor, .. } = change {
                        if conveyed.insert(neighbor.clone()) {
                            self.convey_if_missing(neighbor, &mut msg);
                        }
                    }
                    msg.push_change(change.clone());
                }
                CommittedEvent::Purged {
                    id,
                    replicated_towards,
                } => {
                    if replicated_towards.contains(&self.0.peer) {
                        msg.canceled_objects.push(id.clone());
                    }
                }
            }
        }
        if let Err(err) = self.send(msg) {
            tracing::warn!(peer = %self.0.peer, ?err, "could not forward committed changes");
        }
    }

    fn convey_if_missing(&self, id: &ObjectId, msg: &mut MeshMessage) {
        if let Some(info) = self.0.store.replica_info(id) {
            if !info.replicates_towards(&self.0.peer) {
                self.convey(&info, msg);
            }
        }
    }

    /// Put the full replica into `msg` and start replicating it with the
    /// peer. Returns false if it could not be exported.
    fn convey(&self, info: &ReplicaInfo, msg: &mut MeshMessage) -> bool {
        let store = &self.0.store;
        let peer = &self.0.peer;
        let id = &info.id;
        let replicate_to_here = store.points_replicas_to_itself() || info.is_home();
        match store.externalize(id, !replicate_to_here) {
            Ok(snapshot) => {
                msg.conveyed_objects.push(snapshot);
                if let Err(err) = store.register_replication_towards(id, peer) {
                    tracing::warn!(%peer, %id, ?err, "could not register edge");
                }
                true
            }
            Err(err) => {
                tracing::debug!(%peer, %id, ?err, "could not convey replica");
                false
            }
        }
    }
}
