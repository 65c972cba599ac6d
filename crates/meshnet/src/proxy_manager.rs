//! Owns every [`Proxy`] of one local store.
//!
//! The manager keeps at most one proxy per peer. Each peer also gets an inbox
//! and a dispatch task; every endpoint towards that peer reports into the
//! same inbox, so messages from one peer are processed strictly one at a time
//! while different peers proceed concurrently. The inbox belongs to the
//! peer, not to the proxy object: a proxy recreated after its endpoint died,
//! or restored from an [`ExternalizedProxy`], keeps receiving on it.
//!
//! Every endpoint gets its own instance number. Messages from the peer are
//! handed to whichever proxy is current, but failure reports of a replaced
//! endpoint are dropped so they cannot take down its successor.

use crate::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct ProxyEntry {
    proxy: Proxy,
    inbox: tokio::sync::mpsc::UnboundedSender<TaggedEvent>,
    generation: u64,
    instance: u64,
}

struct ManagerInner {
    local: PeerLocation,
    store: Arc<dyn LocalStore>,
    factory: Arc<dyn EndpointFactory>,
    tuning_params: ProxyTuningParams,
    proxies: Mutex<HashMap<PeerLocation, ProxyEntry>>,
    generation: AtomicU64,
}

/// Registry and dispatcher of the proxies of one local store.
/// Cheap to clone.
#[derive(Clone)]
pub struct ProxyManager(Arc<ManagerInner>);

/// A reference to a [`ProxyManager`] that does not keep it alive.
#[derive(Clone)]
pub struct WeakProxyManager(Weak<ManagerInner>);

impl WeakProxyManager {
    /// The manager, if it still exists.
    pub fn upgrade(&self) -> Option<ProxyManager> {
        self.0.upgrade().map(ProxyManager)
    }
}

impl std::fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyManager")
            .field("local", &self.0.local)
            .field("proxies", &self.0.proxies.lock().len())
            .finish()
    }
}

impl ProxyManager {
    /// A manager for `store`, creating endpoints with `factory`.
    pub fn new(
        store: Arc<dyn LocalStore>,
        factory: Arc<dyn EndpointFactory>,
        tuning_params: ProxyTuningParams,
    ) -> Self {
        let local = store.local_location();
        tracing::debug!(%local, "new proxy manager");
        Self(Arc::new(ManagerInner {
            local,
            store,
            factory,
            tuning_params,
            proxies: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(1),
        }))
    }

    /// A weak reference to this manager.
    pub fn downgrade(&self) -> WeakProxyManager {
        WeakProxyManager(Arc::downgrade(&self.0))
    }

    /// Where the managed store lives.
    pub fn local_location(&self) -> &PeerLocation {
        &self.0.local
    }

    /// The managed store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.0.store
    }

    /// The tuning params every proxy of this manager uses.
    pub fn tuning_params(&self) -> &ProxyTuningParams {
        &self.0.tuning_params
    }

    /// The live proxy towards `peer`, creating it if needed. A given
    /// `coherence` replaces the one of an existing proxy.
    ///
    /// Must be called from within a tokio runtime.
    pub fn obtain_for(
        &self,
        peer: &PeerLocation,
        coherence: Option<CoherenceSpec>,
    ) -> MeshResult<Proxy> {
        let proxy = self.obtain_inner(peer, coherence.clone(), None)?;
        if coherence.is_some() && proxy.coherence_spec() != coherence {
            proxy.set_coherence(coherence);
        }
        Ok(proxy)
    }

    /// Bring a proxy back from its persisted form. The lease timestamps are
    /// kept. If a live proxy towards the peer exists it is returned as is.
    pub fn restore(&self, externalized: ExternalizedProxy) -> MeshResult<Proxy> {
        let ExternalizedProxy {
            peer,
            coherence,
            lease,
        } = externalized;
        self.obtain_inner(&peer, coherence, Some(lease))
    }

    fn obtain_inner(
        &self,
        peer: &PeerLocation,
        coherence: Option<CoherenceSpec>,
        lease: Option<Lease>,
    ) -> MeshResult<Proxy> {
        if *peer == self.0.local {
            return Err(MeshError::NotPermitted(format!(
                "no proxy towards the local store {}",
                peer
            )));
        }
        let mut replaced = None;
        let proxy = {
            let mut lock = self.0.proxies.lock();
            match lock.get_mut(peer) {
                Some(entry) if !entry.proxy.is_dead() => return Ok(entry.proxy.clone()),
                Some(entry) => {
                    // keep the inbox and its dispatch task, replace the proxy
                    let instance = self.0.generation.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%peer, %instance, "recreating dead proxy");
                    let old = entry.proxy.as_externalized();
                    let proxy = self.new_proxy(
                        peer,
                        EndpointEventSender::new(instance, entry.inbox.clone()),
                        coherence.or(old.coherence),
                        lease.unwrap_or(old.lease),
                    )?;
                    replaced = Some(std::mem::replace(&mut entry.proxy, proxy.clone()));
                    entry.instance = instance;
                    proxy
                }
                None => {
                    let rt = tokio::runtime::Handle::try_current().map_err(MeshError::other)?;
                    let (inbox, events) = tokio::sync::mpsc::unbounded_channel();
                    let generation = self.0.generation.fetch_add(1, Ordering::Relaxed);
                    let proxy = self.new_proxy(
                        peer,
                        EndpointEventSender::new(generation, inbox.clone()),
                        coherence,
                        lease.unwrap_or_else(|| Lease::new(Timestamp::now())),
                    )?;
                    lock.insert(
                        peer.clone(),
                        ProxyEntry {
                            proxy: proxy.clone(),
                            inbox,
                            generation,
                            instance: generation,
                        },
                    );
                    tracing::debug!(%peer, %generation, "new proxy");
                    rt.spawn(dispatch_loop(self.downgrade(), peer.clone(), generation, events));
                    proxy
                }
            }
        };
        // an endpoint that merely reports dead still has callers waiting
        if let Some(old) = replaced {
            old.dispose();
        }
        proxy.start_communicating();
        Ok(proxy)
    }

    fn new_proxy(
        &self,
        peer: &PeerLocation,
        inbox: EndpointEventSender,
        coherence: Option<CoherenceSpec>,
        lease: Lease,
    ) -> MeshResult<Proxy> {
        let endpoint = self
            .0
            .factory
            .create_endpoint(self.0.local.clone(), peer.clone(), inbox)?;
        Ok(Proxy::new(
            peer.clone(),
            self.0.store.clone(),
            self.downgrade(),
            endpoint,
            self.0.tuning_params.clone(),
            coherence,
            lease,
        ))
    }

    /// The proxy towards `peer`, if one is registered.
    pub fn get(&self, peer: &PeerLocation) -> Option<Proxy> {
        self.0.proxies.lock().get(peer).map(|e| e.proxy.clone())
    }

    /// Every registered proxy.
    pub fn proxies(&self) -> Vec<Proxy> {
        self.0
            .proxies
            .lock()
            .values()
            .map(|e| e.proxy.clone())
            .collect()
    }

    /// The registered proxy and its endpoint instance, as long as the entry
    /// still belongs to the dispatch task of `generation`.
    fn current(&self, peer: &PeerLocation, generation: u64) -> Option<(Proxy, u64)> {
        match self.0.proxies.lock().get(peer) {
            Some(e) if e.generation == generation => Some((e.proxy.clone(), e.instance)),
            _ => None,
        }
    }

    /// Drop the proxy towards `peer` and kill its endpoint. The dispatch task
    /// ends once the remaining queued events are drained.
    pub fn remove(&self, peer: &PeerLocation) {
        let entry = self.0.proxies.lock().remove(peer);
        if let Some(entry) = entry {
            tracing::debug!(%peer, generation = %entry.generation, "removing proxy");
            entry.proxy.dispose();
        }
    }

    /// Hand a message from `from` to the proxy towards it. An unknown peer
    /// gets a proxy on the spot.
    pub fn deliver(&self, from: &PeerLocation, msg: MeshMessage) -> MeshResult<()> {
        let inbox = |lock: &HashMap<PeerLocation, ProxyEntry>| {
            lock.get(from)
                .filter(|e| !e.proxy.is_dead())
                .map(|e| EndpointEventSender::new(e.instance, e.inbox.clone()))
        };
        let existing = inbox(&*self.0.proxies.lock());
        let inbox = match existing {
            Some(inbox) => inbox,
            None => {
                tracing::debug!(local = %self.0.local, %from, "incoming proxy registration");
                self.obtain_inner(from, None, None)?;
                let registered = inbox(&*self.0.proxies.lock());
                registered.ok_or_else(|| MeshError::EndpointDead(from.clone()))?
            }
        };
        inbox
            .send(EndpointEvent::MessageReceived(msg))
            .map_err(|_| MeshError::EndpointDead(from.clone()))
    }

    /// Forward what a committed transaction did to every live proxy.
    pub fn transaction_committed(&self, report: &CommitReport) {
        if report.is_empty() {
            return;
        }
        for proxy in self.proxies() {
            proxy.transaction_committed(report);
        }
    }

    /// Run `f` in a local transaction, commit, and propagate what changed.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut dyn StoreTransaction) -> MeshResult<R>,
    ) -> MeshResult<R> {
        let mut tx = self.0.store.begin_transaction(IncomingContext::local())?;
        let r = f(&mut *tx)?;
        let report = tx.commit()?;
        self.transaction_committed(&report);
        Ok(r)
    }

    /// Resolve access paths to local replicas, obtaining first-time replicas
    /// from the first non-local hop where needed. Paths are resolved
    /// concurrently; one result per path, in order.
    pub async fn access_locally(
        &self,
        paths: Vec<ObjectAccessPath>,
        timeout: ProxyTimeout,
    ) -> Vec<MeshResult<ObjectId>> {
        futures::future::join_all(paths.into_iter().map(|path| self.access_one(path, timeout))).await
    }

    async fn access_one(
        &self,
        mut path: ObjectAccessPath,
        timeout: ProxyTimeout,
    ) -> MeshResult<ObjectId> {
        let id = path.effective_object_id();
        if self.0.store.replica_info(&id).is_some() {
            return Ok(id);
        }
        while path.first_hop().location == self.0.local {
            path = match path.forward() {
                Some(rest) => rest,
                None => return Err(MeshError::ObjectNotFound(id)),
            };
        }
        let hop = path.first_hop().clone();
        tracing::debug!(local = %self.0.local, %path, "obtaining first-time replica");
        let proxy = self.obtain_for(&hop.location, hop.coherence)?;
        let obtained = proxy.obtain_replica(vec![path], timeout).await?;
        if obtained.contains(&id) && self.0.store.replica_info(&id).is_some() {
            Ok(id)
        } else {
            Err(MeshError::ObjectNotFound(id))
        }
    }

    /// Make the local replica of `id` hold the lock, asking the peer in the
    /// lock's direction if it is elsewhere. Waits at most `wait`; running out
    /// of time is reported as `Ok(false)`.
    pub async fn try_to_obtain_lock(
        &self,
        id: &ObjectId,
        wait: std::time::Duration,
    ) -> MeshResult<bool> {
        let info = self
            .0
            .store
            .replica_info(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))?;
        let direction = match info.proxy_towards_lock {
            None => return Ok(true),
            Some(direction) => direction,
        };
        let proxy = self.obtain_for(&direction, None)?;
        match proxy
            .try_to_obtain_locks(vec![id.clone()], ProxyTimeout::new(wait))
            .await
        {
            Ok(_) => (),
            Err(err) if err.is_timeout() => {
                tracing::debug!(%id, %direction, "timed out pulling the lock");
            }
            Err(err) => return Err(err),
        }
        Ok(self
            .0
            .store
            .replica_info(id)
            .map(|i| i.has_lock())
            .unwrap_or(false))
    }

    /// Make the local replica of `id` the home replica, asking the peer in
    /// the home direction if it is elsewhere.
    pub async fn try_to_obtain_home_replica(
        &self,
        id: &ObjectId,
        wait: std::time::Duration,
    ) -> MeshResult<bool> {
        let info = self
            .0
            .store
            .replica_info(id)
            .ok_or_else(|| MeshError::ObjectNotFound(id.clone()))?;
        let direction = match info.proxy_towards_home {
            None => return Ok(true),
            Some(direction) => direction,
        };
        let proxy = self.obtain_for(&direction, None)?;
        match proxy
            .try_to_obtain_home_replicas(vec![id.clone()], ProxyTimeout::new(wait))
            .await
        {
            Ok(_) => (),
            Err(err) if err.is_timeout() => {
                tracing::debug!(%id, %direction, "timed out pulling the home replica");
            }
            Err(err) => return Err(err),
        }
        Ok(self
            .0
            .store
            .replica_info(id)
            .map(|i| i.is_home())
            .unwrap_or(false))
    }

    /// Take the lock on `id` without asking, e.g. when its holder is gone.
    /// The former lock direction is told so it can follow suit.
    pub fn force_obtain_lock(&self, id: &ObjectId) -> MeshResult<()> {
        let previous = self.0.store.reclaim_lock(id)?;
        tracing::debug!(%id, ?previous, "lock reclaimed");
        if let Some(previous) = previous {
            self.obtain_for(&previous, None)?
                .force_obtain_locks(vec![id.clone()])?;
        }
        Ok(())
    }

    /// The persistent form of the proxy towards `peer`.
    pub fn externalize(&self, peer: &PeerLocation) -> Option<ExternalizedProxy> {
        self.get(peer).map(|p| p.as_externalized())
    }

    /// Remove every proxy whose lease has run out as of `now`.
    /// Returns the peers removed.
    pub fn dispose_expired(&self, now: Timestamp) -> Vec<PeerLocation> {
        let expired: Vec<PeerLocation> = self
            .0
            .proxies
            .lock()
            .iter()
            .filter(|(_, e)| e.proxy.lease().is_expired(now))
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            tracing::info!(%peer, "lease expired");
            self.remove(peer);
        }
        expired
    }
}

async fn dispatch_loop(
    manager: WeakProxyManager,
    peer: PeerLocation,
    generation: u64,
    mut events: EndpointEventReceiver,
) {
    while let Some((instance, event)) = events.recv().await {
        let (proxy, current) = match manager.upgrade().and_then(|m| m.current(&peer, generation)) {
            Some(found) => found,
            None => break,
        };
        match event {
            EndpointEvent::MessageReceived(msg) => proxy.on_message_received(msg).await,
            // the proxy this concerned was disposed when it was replaced
            _ if instance != current => {
                tracing::debug!(%peer, %instance, %current, "dropping event of replaced endpoint");
            }
            EndpointEvent::SendingFailed(msgs) => proxy.message_sending_failed(msgs),
            EndpointEvent::Disabled(msgs) => proxy.disabling_error(msgs),
        }
    }
    tracing::debug!(%peer, %generation, "dispatch loop ended");
}
