//! Processing one incoming message.
//!
//! The steps run in a fixed order; later steps rely on the local-store
//! effects of earlier ones. The manager feeds a proxy one message at a time,
//! so no two messages from the same peer ever interleave here.

use super::*;
use std::collections::BTreeMap;

/// Pushed locks and home replicas for objects that did not exist yet when
/// the message arrived.
#[derive(Default)]
struct Deferred {
    locks: Vec<ObjectId>,
    homes: Vec<ObjectId>,
}

/// Messages to send once the incoming changes are committed.
#[derive(Default)]
struct FollowUps {
    /// unsolicited objects the sender should stop replicating to us
    declined: Vec<ObjectId>,
    /// edges to drop, by the home direction replicas used to have
    cancel: BTreeMap<PeerLocation, Vec<ObjectId>>,
    /// fresh snapshots to ask the real home for
    resync: BTreeMap<PeerLocation, Vec<ObjectId>>,
}

/// What to do with one object snapshot the peer sent.
#[derive(Debug, Default, PartialEq, Eq)]
struct SnapshotPlan {
    create: bool,
    resynchronize: bool,
    decline: bool,
    cancel_towards: Option<PeerLocation>,
    resync_from: Option<PeerLocation>,
}

impl SnapshotPlan {
    /// A conveyed object. The outcome depends on three things: whether we
    /// have a replica and where its home direction points, whether the
    /// snapshot names a home beyond the sender, and whether we asked for it.
    fn for_conveyed(
        local: Option<&ReplicaInfo>,
        snapshot: &ReplicaSnapshot,
        sender: &PeerLocation,
        solicited: bool,
    ) -> Self {
        let elsewhere = home_beyond(snapshot, sender);
        let mut plan = Self::default();
        match local.map(|info| info.proxy_towards_home.as_ref()) {
            None if solicited => {
                plan.create = true;
                plan.resync_from = elsewhere;
            }
            None => plan.decline = true,
            // home never moves through a conveyance
            Some(None) => (),
            Some(Some(home)) if home == sender => {
                if elsewhere.is_some() {
                    plan.resynchronize = true;
                    plan.resync_from = elsewhere;
                }
            }
            Some(Some(home)) => {
                // a sender that is not our way home only counts when it is
                // itself on the way home
                if elsewhere.is_none() {
                    plan.resynchronize = true;
                    plan.cancel_towards = Some(home.clone());
                }
            }
        }
        plan
    }

    /// A resynchronized object, sent because we asked. The content is always
    /// refreshed; the replica switches its home direction to the sender
    /// unless the sender points at a home beyond itself.
    fn for_resynchronized(
        local: Option<&ReplicaInfo>,
        snapshot: &ReplicaSnapshot,
        sender: &PeerLocation,
    ) -> Self {
        let elsewhere = home_beyond(snapshot, sender);
        let mut plan = Self::default();
        match (local.map(|info| info.proxy_towards_home.as_ref()), elsewhere) {
            (Some(Some(_)), Some(home)) => plan.resync_from = Some(home),
            (Some(Some(home)), None) => {
                plan.resynchronize = true;
                if home != sender {
                    plan.cancel_towards = Some(home.clone());
                }
            }
            (_, elsewhere) => {
                plan.resynchronize = true;
                plan.resync_from = elsewhere;
            }
        }
        plan
    }
}

/// The home direction a snapshot carries, if it leads past its sender.
fn home_beyond(snapshot: &ReplicaSnapshot, sender: &PeerLocation) -> Option<PeerLocation> {
    snapshot
        .proxy_towards_home
        .as_ref()
        .filter(|home| *home != sender)
        .cloned()
}

impl Proxy {
    pub(crate) async fn on_message_received(&self, msg: MeshMessage) {
        let peer = self.0.peer.clone();
        tracing::trace!(
            %peer,
            request_id = ?msg.request_id,
            response_id = ?msg.response_id,
            changes = %msg.change_count(),
            conveyed = %msg.conveyed_objects.len(),
            cease = %msg.cease_communications,
            "message received",
        );
        if self.0.dead.load(Ordering::Acquire) {
            tracing::debug!(%peer, "dropping message for disposed proxy");
            return;
        }
        let manager = self.manager();

        // everything below happens on behalf of this peer
        let ctx = IncomingContext::from_peer(peer.clone());
        let solicited = msg
            .response_id
            .map(|id| self.awaits_response(id))
            .unwrap_or(false);

        let deferred = self.apply_pushed_on_existing(&msg);

        let mut matched = self.0.lock_tracker.respond(&msg);
        matched |= self.0.home_tracker.respond(&msg);

        let mut follow_ups = FollowUps::default();
        if let Some(report) = self.apply_mutations(ctx, &msg, solicited, &mut follow_ups) {
            if let Some(manager) = &manager {
                manager.transaction_committed(&report);
            }
        }

        self.apply_deferred(deferred);
        self.send_follow_ups(follow_ups, msg.cease_communications);

        if msg.cease_communications {
            tracing::debug!(%peer, "peer ceased communications");
            match manager {
                Some(manager) => manager.remove(&peer),
                None => self.dispose(),
            }
            return;
        }

        if msg.request_id.is_some() {
            let response = self.build_response(&msg).await;
            if let Err(err) = self.send(response) {
                tracing::warn!(%peer, ?err, "could not send response");
            }
        }

        self.0
            .lease
            .lock()
            .touch_read(Timestamp::now(), self.0.tuning_params.lease_duration_ms());

        // replicas are materialized by now, so obtain_replica may return
        matched |= self.0.replica_tracker.respond(&msg);
        if !matched {
            if let Some(response_id) = msg.response_id {
                tracing::trace!(%peer, %response_id, "response to a request nobody waits for");
            }
        }

        self.fire_lease_updated();
    }

    fn awaits_response(&self, request_id: u64) -> bool {
        self.0.lock_tracker.awaits(request_id)
            || self.0.home_tracker.awaits(request_id)
            || self.0.replica_tracker.awaits(request_id)
    }

    fn apply_pushed_on_existing(&self, msg: &MeshMessage) -> Deferred {
        let store = &self.0.store;
        let mut deferred = Deferred::default();
        for id in &msg.pushed_locks {
            if store.replica_info(id).is_some() {
                self.accept_lock(id);
            } else {
                deferred.locks.push(id.clone());
            }
        }
        for id in &msg.pushed_home_replicas {
            if store.replica_info(id).is_some() {
                self.accept_home(id);
            } else {
                deferred.homes.push(id.clone());
            }
        }
        for id in &msg.reclaimed_locks {
            self.lock_reclaimed(id);
        }
        deferred
    }

    fn apply_deferred(&self, deferred: Deferred) {
        let store = &self.0.store;
        for id in deferred.locks {
            if store.replica_info(&id).is_some() {
                self.accept_lock(&id);
            } else {
                tracing::warn!(peer = %self.0.peer, %id, "pushed lock for an object we do not have");
            }
        }
        for id in deferred.homes {
            if store.replica_info(&id).is_some() {
                self.accept_home(&id);
            } else {
                tracing::warn!(peer = %self.0.peer, %id, "pushed home for an object we do not have");
            }
        }
    }

    fn accept_lock(&self, id: &ObjectId) {
        match self.0.store.push_lock(id, &self.0.peer) {
            Ok(()) => tracing::debug!(peer = %self.0.peer, %id, "lock arrived"),
            Err(err) => tracing::warn!(peer = %self.0.peer, %id, ?err, "could not accept lock"),
        }
    }

    fn accept_home(&self, id: &ObjectId) {
        match self.0.store.push_home(id, &self.0.peer) {
            Ok(()) => tracing::debug!(peer = %self.0.peer, %id, "home replica arrived"),
            Err(err) => tracing::warn!(peer = %self.0.peer, %id, ?err, "could not accept home"),
        }
    }

    /// The peer forcibly took the lock. If the lock had moved on past us,
    /// the reclaim travels on towards wherever it went.
    fn lock_reclaimed(&self, id: &ObjectId) {
        let peer = &self.0.peer;
        match self.0.store.lock_reclaimed(id, peer) {
            Ok(Some(previous)) if previous != *peer => {
                tracing::debug!(%peer, %id, %previous, "forwarding lock reclaim");
                let forwarded = self
                    .manager()
                    .ok_or_else(|| MeshError::from("proxy manager gone"))
                    .and_then(|m| m.obtain_for(&previous, None))
                    .and_then(|p| p.force_obtain_locks(vec![id.clone()]));
                if let Err(err) = forwarded {
                    tracing::warn!(%peer, %id, %previous, ?err, "could not forward lock reclaim");
                }
            }
            Ok(_) => tracing::debug!(%peer, %id, "lock reclaimed by peer"),
            Err(err) => tracing::debug!(%peer, %id, ?err, "ignoring lock reclaim"),
        }
    }

    /// Opens at most one transaction, applies every mutating batch in order,
    /// commits. Items that fail are logged and skipped.
    fn apply_mutations(
        &self,
        ctx: IncomingContext,
        msg: &MeshMessage,
        solicited: bool,
        follow_ups: &mut FollowUps,
    ) -> Option<CommitReport> {
        if !msg.has_mutations() {
            return None;
        }
        let peer = &self.0.peer;
        let mut tx = match self.0.store.begin_transaction(ctx) {
            Ok(tx) => tx,
            Err(err) => {
                tracing::error!(%peer, ?err, "could not open transaction, dropping changes");
                return None;
            }
        };

        for snapshot in &msg.conveyed_objects {
            // an object handed over together with its lock or home is meant for us
            let solicited = solicited
                || msg.pushed_locks.contains(&snapshot.id)
                || msg.pushed_home_replicas.contains(&snapshot.id);
            let local = tx.replica_info(&snapshot.id);
            let plan = SnapshotPlan::for_conveyed(local.as_ref(), snapshot, peer, solicited);
            self.carry_out(&mut *tx, snapshot, plan, follow_ups);
        }
        for snapshot in &msg.resynchronized_objects {
            let local = tx.replica_info(&snapshot.id);
            let plan = SnapshotPlan::for_resynchronized(local.as_ref(), snapshot, peer);
            self.carry_out(&mut *tx, snapshot, plan, follow_ups);
        }

        for (kind, batch) in msg.change_batches() {
            for change in batch {
                if change.kind() != kind {
                    tracing::error!(%peer, %kind, found = %change.kind(), "protocol violation: change in wrong batch");
                    continue;
                }
                if let Err(err) = tx.apply_change(change) {
                    tracing::warn!(%peer, %kind, id = %change.subject(), ?err, "could not apply change, skipping");
                }
            }
        }

        for change in &msg.deletions {
            match change {
                Change::Deleted { id, time } => {
                    if let Err(err) = tx.ripple_delete(id, peer, *time) {
                        tracing::warn!(%peer, %id, ?err, "could not delete replica, skipping");
                    }
                }
                other => {
                    tracing::error!(%peer, found = %other.kind(), "protocol violation: change in deletions");
                }
            }
        }

        match tx.commit() {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::error!(%peer, ?err, "could not commit incoming changes");
                None
            }
        }
    }

    fn carry_out(
        &self,
        tx: &mut dyn StoreTransaction,
        snapshot: &ReplicaSnapshot,
        plan: SnapshotPlan,
        follow_ups: &mut FollowUps,
    ) {
        let peer = &self.0.peer;
        let id = &snapshot.id;
        tracing::trace!(%peer, %id, ?plan, "incoming snapshot");
        let r = if plan.create {
            tx.ripple_create(snapshot, peer).map(|_| ())
        } else if plan.resynchronize {
            tx.resynchronize(snapshot, peer).map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = r {
            tracing::warn!(%peer, %id, ?err, "could not materialize incoming snapshot");
            return;
        }
        if plan.decline {
            follow_ups.declined.push(id.clone());
        }
        if let Some(home) = plan.cancel_towards {
            follow_ups.cancel.entry(home).or_default().push(id.clone());
        }
        if let Some(home) = plan.resync_from {
            follow_ups.resync.entry(home).or_default().push(id.clone());
        }
    }

    fn send_follow_ups(&self, follow_ups: FollowUps, ceasing: bool) {
        let peer = &self.0.peer;
        let FollowUps {
            declined,
            cancel,
            resync,
        } = follow_ups;
        if !declined.is_empty() && !ceasing {
            tracing::debug!(%peer, ?declined, "declining unsolicited objects");
            if let Err(err) = self.cancel_replicas(declined) {
                tracing::warn!(%peer, ?err, "could not decline objects");
            }
        }
        if cancel.is_empty() && resync.is_empty() {
            return;
        }
        let manager = match self.manager() {
            Some(manager) => manager,
            None => return,
        };
        for (home, ids) in cancel {
            tracing::debug!(%peer, %home, ?ids, "dropping replication with former home direction");
            if let Err(err) = manager
                .obtain_for(&home, None)
                .and_then(|p| p.cancel_replicas(ids))
            {
                tracing::warn!(%peer, %home, ?err, "could not cancel former home direction");
            }
        }
        for (home, ids) in resync {
            tracing::debug!(%peer, %home, ?ids, "asking the real home for fresh state");
            if let Err(err) = manager
                .obtain_for(&home, None)
                .and_then(|p| p.resynchronize_dependent_replicas(ids))
            {
                tracing::warn!(%peer, %home, ?err, "could not ask home to resynchronize");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn loc(s: &str) -> PeerLocation {
        PeerLocation::create(s).unwrap()
    }

    fn snapshot(home: Option<&str>) -> ReplicaSnapshot {
        let mut s = ReplicaSnapshot::new_home(ObjectId::from("x"), Timestamp(1));
        s.proxy_towards_home = home.map(loc);
        s
    }

    /// `None`: no replica, `Some(None)`: home replica, `Some(Some(p))`: home
    /// lies towards `p`.
    fn info(home: Option<Option<&str>>) -> Option<ReplicaInfo> {
        home.map(|home| {
            let mut s = snapshot(home);
            s.proxies = home.map(loc).into_iter().collect();
            ReplicaInfo::from(&s)
        })
    }

    fn plan() -> SnapshotPlan {
        SnapshotPlan::default()
    }

    #[test_case(None, None, true => SnapshotPlan { create: true, ..plan() } ; "missing asked sender is home")]
    #[test_case(None, Some("mem://c"), true => SnapshotPlan { create: true, resync_from: Some(loc("mem://c")), ..plan() } ; "missing asked home beyond")]
    #[test_case(None, None, false => SnapshotPlan { decline: true, ..plan() } ; "missing unasked")]
    #[test_case(None, Some("mem://c"), false => SnapshotPlan { decline: true, ..plan() } ; "missing unasked home beyond")]
    #[test_case(Some(Some("mem://b")), None, true => plan() ; "ours from home")]
    #[test_case(Some(Some("mem://b")), None, false => plan() ; "ours from home unasked")]
    #[test_case(Some(Some("mem://b")), Some("mem://c"), false => SnapshotPlan { resynchronize: true, resync_from: Some(loc("mem://c")), ..plan() } ; "ours home moved beyond")]
    #[test_case(Some(Some("mem://c")), None, false => SnapshotPlan { resynchronize: true, cancel_towards: Some(loc("mem://c")), ..plan() } ; "switch to sender")]
    #[test_case(Some(Some("mem://c")), Some("mem://d"), true => plan() ; "foreign sender foreign home")]
    #[test_case(Some(None), None, true => plan() ; "we are home")]
    fn conveyed(local: Option<Option<&str>>, home: Option<&str>, solicited: bool) -> SnapshotPlan {
        let local = info(local);
        SnapshotPlan::for_conveyed(local.as_ref(), &snapshot(home), &loc("mem://b"), solicited)
    }

    #[test_case(Some(Some("mem://b")), None => SnapshotPlan { resynchronize: true, ..plan() } ; "refresh")]
    #[test_case(Some(Some("mem://c")), None => SnapshotPlan { resynchronize: true, cancel_towards: Some(loc("mem://c")), ..plan() } ; "home answered directly")]
    #[test_case(Some(Some("mem://b")), Some("mem://c") => SnapshotPlan { resync_from: Some(loc("mem://c")), ..plan() } ; "sender points beyond")]
    #[test_case(None, None => SnapshotPlan { resynchronize: true, ..plan() } ; "missing")]
    fn resynchronized(local: Option<Option<&str>>, home: Option<&str>) -> SnapshotPlan {
        let local = info(local);
        SnapshotPlan::for_resynchronized(local.as_ref(), &snapshot(home), &loc("mem://b"))
    }
}
