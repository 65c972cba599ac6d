use super::MemStore;
use crate::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct SwitchboardState {
    nodes: HashMap<PeerLocation, WeakProxyManager>,
    offline: HashSet<PeerLocation>,
    sent: usize,
}

/// In-memory transport connecting the proxy managers of several local
/// stores. Messages go through the wire encoding on their way and are
/// delivered in order per sender/receiver pair.
#[derive(Clone, Default)]
pub struct MemSwitchboard(Arc<Mutex<SwitchboardState>>);

impl MemSwitchboard {
    /// An empty switchboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages for `manager`'s location to it.
    pub fn add_node(&self, manager: &ProxyManager) {
        self.0
            .lock()
            .nodes
            .insert(manager.local_location().clone(), manager.downgrade());
    }

    /// A fresh store at `location` with a manager on this switchboard.
    pub fn spawn_node(
        &self,
        location: &str,
        tuning_params: ProxyTuningParams,
    ) -> MeshResult<(ProxyManager, MemStore)> {
        let store = MemStore::new(PeerLocation::create(location)?);
        let manager = ProxyManager::new(
            Arc::new(store.clone()),
            Arc::new(self.clone()),
            tuning_params,
        );
        self.add_node(&manager);
        Ok((manager, store))
    }

    /// Take a node off the board, or put it back. Messages to or from an
    /// offline node are reported as undeliverable.
    pub fn set_offline(&self, location: &PeerLocation, offline: bool) {
        let mut lock = self.0.lock();
        if offline {
            lock.offline.insert(location.clone());
        } else {
            lock.offline.remove(location);
        }
    }

    /// Number of messages delivered so far.
    pub fn sent_count(&self) -> usize {
        self.0.lock().sent
    }

    fn route(&self, from: &PeerLocation, to: &PeerLocation) -> Option<ProxyManager> {
        let mut lock = self.0.lock();
        if lock.offline.contains(from) || lock.offline.contains(to) {
            return None;
        }
        let manager = lock.nodes.get(to).and_then(|m| m.upgrade())?;
        lock.sent += 1;
        Some(manager)
    }
}

impl EndpointFactory for MemSwitchboard {
    fn create_endpoint(
        &self,
        local: PeerLocation,
        partner: PeerLocation,
        events: EndpointEventSender,
    ) -> MeshResult<DynMessageEndpoint> {
        Ok(Arc::new(MemEndpoint {
            local,
            partner,
            switchboard: self.clone(),
            events: Mutex::new(Some(events)),
            dead: AtomicBool::new(false),
        }))
    }
}

struct MemEndpoint {
    local: PeerLocation,
    partner: PeerLocation,
    switchboard: MemSwitchboard,
    events: Mutex<Option<EndpointEventSender>>,
    dead: AtomicBool,
}

impl MemEndpoint {
    fn report_failed(&self, msg: MeshMessage) {
        if let Some(events) = &*self.events.lock() {
            let _ = events.send(EndpointEvent::SendingFailed(vec![msg]));
        }
    }
}

impl MessageEndpoint for MemEndpoint {
    fn partner(&self) -> PeerLocation {
        self.partner.clone()
    }

    fn start_communicating(&self) {}

    fn enqueue_message_for_send(&self, msg: MeshMessage) -> MeshResult<()> {
        if self.is_dead() {
            return Err(MeshError::EndpointDead(self.partner.clone()));
        }
        let wire = msg.encode()?;
        let manager = match self.switchboard.route(&self.local, &self.partner) {
            Some(manager) => manager,
            None => {
                tracing::debug!(from = %self.local, to = %self.partner, "partner unreachable");
                self.report_failed(msg);
                return Ok(());
            }
        };
        let decoded = MeshMessage::decode(&wire)?;
        if let Err(err) = manager.deliver(&self.local, decoded) {
            tracing::debug!(from = %self.local, to = %self.partner, ?err, "delivery failed");
            self.report_failed(msg);
        }
        Ok(())
    }

    fn die(&self) {
        self.dead.store(true, Ordering::Release);
        self.events.lock().take();
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }
}
