//! Answering what the peer asked for.

use super::*;
use std::collections::HashSet;

impl Proxy {
    /// Build the response to a message carrying a request id. Every request
    /// kind is handled independently; one failing item never spoils the rest.
    pub(super) async fn build_response(&self, msg: &MeshMessage) -> MeshMessage {
        let mut response = MeshMessage {
            response_id: msg.request_id,
            ..Default::default()
        };
        let peer = &self.0.peer;

        for id in &msg.canceled_objects {
            if let Err(err) = self.0.store.unregister_replication_towards(id, peer) {
                tracing::debug!(%peer, %id, ?err, "could not cancel replication");
            }
        }

        let mut handled = HashSet::new();
        if !msg.requested_first_time_objects.is_empty() {
            match self.manager() {
                Some(manager) => {
                    let paths = msg.requested_first_time_objects.clone();
                    let timeout = default_obtain_timeout(&self.0.tuning_params);
                    let results = manager.access_locally(paths, timeout).await;
                    for (path, result) in msg.requested_first_time_objects.iter().zip(results) {
                        match result.and_then(|id| self.snapshot_for_requester(&id, true)) {
                            Ok(snapshot) => {
                                handled.insert(snapshot.id.clone());
                                response.conveyed_objects.push(snapshot);
                            }
                            Err(err) => {
                                tracing::warn!(%peer, %path, ?err, "could not serve first-time request");
                            }
                        }
                    }
                }
                None => tracing::warn!(%peer, "proxy manager gone, ignoring first-time requests"),
            }
        }

        for id in &msg.requested_resynchronize {
            // a first-time conveyance already carries the full state
            if handled.contains(id) {
                continue;
            }
            match self.snapshot_for_requester(id, false) {
                Ok(snapshot) => response.resynchronized_objects.push(snapshot),
                Err(err) => tracing::warn!(%peer, %id, ?err, "could not resynchronize for peer"),
            }
        }

        for id in &msg.requested_locks {
            if self.grant_lock(id).await {
                response.pushed_locks.push(id.clone());
            }
        }

        for id in &msg.requested_home_replicas {
            if self.grant_home(id).await {
                response.pushed_home_replicas.push(id.clone());
            }
        }

        response
    }

    /// Export a replica for the peer and record the replication edge when
    /// the requester should replicate through us.
    fn snapshot_for_requester(
        &self,
        id: &ObjectId,
        first_time: bool,
    ) -> MeshResult<ReplicaSnapshot> {
        let store = &self.0.store;
        let peer = &self.0.peer;
        let info = store
            .replica_info(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))?;
        let replicate_to_here = store.points_replicas_to_itself() || info.is_home();
        let snapshot = store.externalize(id, !replicate_to_here)?;
        if replicate_to_here && (first_time || !info.replicates_towards(peer)) {
            store.register_replication_towards(id, peer)?;
        }
        Ok(snapshot)
    }

    /// Hand our lock on `id` to the peer, pulling it here first if it is
    /// elsewhere. Returns whether the lock was handed over.
    async fn grant_lock(&self, id: &ObjectId) -> bool {
        let peer = &self.0.peer;
        let info = match self.0.store.replica_info(id) {
            Some(info) => info,
            None => {
                tracing::warn!(%peer, %id, "lock requested for an object we do not have");
                return false;
            }
        };
        if !info.will_give_up_lock {
            tracing::debug!(%peer, %id, "refusing to give up lock");
            return false;
        }
        if info.proxy_towards_lock.as_ref() == Some(peer) {
            // the requester gets no answer and waits out its timeout
            tracing::warn!(%peer, %id, "lock requested by the peer our lock direction points to, refusing");
            return false;
        }
        let manager = match self.manager() {
            Some(manager) => manager,
            None => return false,
        };
        match manager
            .try_to_obtain_lock(id, self.0.tuning_params.local_lock_wait())
            .await
        {
            Ok(true) => match self.0.store.surrender_lock(id, peer) {
                Ok(()) => {
                    tracing::debug!(%peer, %id, "lock handed over");
                    true
                }
                Err(err) => {
                    tracing::warn!(%peer, %id, ?err, "could not surrender lock");
                    false
                }
            },
            Ok(false) => {
                tracing::debug!(%peer, %id, "lock not available");
                false
            }
            Err(err) => {
                tracing::warn!(%peer, %id, ?err, "could not obtain lock locally");
                false
            }
        }
    }

    /// Hand the home designation of `id` to the peer.
    async fn grant_home(&self, id: &ObjectId) -> bool {
        let peer = &self.0.peer;
        let info = match self.0.store.replica_info(id) {
            Some(info) => info,
            None => {
                tracing::warn!(%peer, %id, "home requested for an object we do not have");
                return false;
            }
        };
        if !info.will_give_up_home || info.proxy_towards_home.as_ref() == Some(peer) {
            tracing::debug!(%peer, %id, "refusing to give up home");
            return false;
        }
        let manager = match self.manager() {
            Some(manager) => manager,
            None => return false,
        };
        match manager
            .try_to_obtain_home_replica(id, self.0.tuning_params.local_lock_wait())
            .await
        {
            Ok(true) => match self.0.store.surrender_home(id, peer) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%peer, %id, ?err, "could not surrender home");
                    false
                }
            },
            Ok(_) => false,
            Err(err) => {
                tracing::warn!(%peer, %id, ?err, "could not obtain home locally");
                false
            }
        }
    }
}
