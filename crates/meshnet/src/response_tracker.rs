//! Correlates outgoing requests with incoming responses.

use crate::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static MSG_ID: AtomicU64 = AtomicU64::new(1);

/// Request ids are unique across every tracker in the process, so a response
/// can only ever match one pending request.
pub(crate) fn next_msg_id() -> u64 {
    MSG_ID.fetch_add(1, Ordering::Relaxed)
}

type RSend = tokio::sync::oneshot::Sender<MeshResult<MeshMessage>>;
type RRecv = tokio::sync::oneshot::Receiver<MeshResult<MeshMessage>>;

struct RMapItem {
    sender: RSend,
    start: tokio::time::Instant,
}

type ShareRMap = Arc<Mutex<HashMap<u64, RMapItem>>>;

/// Pending requests of one kind, keyed by request id.
#[derive(Clone)]
pub(crate) struct ResponseTracker {
    dbg_name: &'static str,
    map: ShareRMap,
}

impl ResponseTracker {
    pub fn new(dbg_name: &'static str) -> Self {
        Self {
            dbg_name,
            map: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve a request id. The returned handle resolves when a response
    /// with that id is fed to [`ResponseTracker::respond`].
    pub fn register(&self) -> (u64, PendingResponse) {
        let msg_id = next_msg_id();
        let (sender, receiver) = tokio::sync::oneshot::channel();
        self.map.lock().insert(
            msg_id,
            RMapItem {
                sender,
                start: tokio::time::Instant::now(),
            },
        );
        let pending = PendingResponse {
            receiver,
            _cleanup: RMapDropCleanup(self.map.clone(), msg_id, self.dbg_name),
        };
        (msg_id, pending)
    }

    /// Resolve the pending request this message answers, if it is ours.
    pub fn respond(&self, msg: &MeshMessage) -> bool {
        let msg_id = match msg.response_id {
            Some(id) => id,
            None => return false,
        };
        let item = self.map.lock().remove(&msg_id);
        match item {
            Some(RMapItem { sender, start }) => {
                let elapsed_s = start.elapsed().as_secs_f64();
                tracing::trace!(dbg_name = %self.dbg_name, %msg_id, %elapsed_s, "req success");
                // if the recv side is dropped, we no longer need to respond
                // so it's ok to ignore errors here.
                let _ = sender.send(Ok(msg.clone()));
                true
            }
            None => false,
        }
    }

    /// Is a request with this id still waiting for its response?
    pub fn awaits(&self, msg_id: u64) -> bool {
        self.map.lock().contains_key(&msg_id)
    }

    /// Fail one pending request.
    pub fn respond_err(&self, msg_id: u64, err: MeshError) {
        let item = self.map.lock().remove(&msg_id);
        if let Some(RMapItem { sender, start }) = item {
            let elapsed_s = start.elapsed().as_secs_f64();
            tracing::trace!(dbg_name = %self.dbg_name, %msg_id, %elapsed_s, ?err, "req err");
            let _ = sender.send(Err(err));
        }
    }

    /// Fail every pending request.
    pub fn fail_all(&self, mk_err: impl Fn() -> MeshError) {
        let items: Vec<(u64, RMapItem)> = self.map.lock().drain().collect();
        for (msg_id, RMapItem { sender, .. }) in items {
            let err = mk_err();
            tracing::debug!(dbg_name = %self.dbg_name, %msg_id, ?err, "req failed");
            let _ = sender.send(Err(err));
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.map.lock().len()
    }
}

/// Cleanup our map when the request future completes
/// either by receiving the response or timing out.
struct RMapDropCleanup(ShareRMap, u64, &'static str);

impl Drop for RMapDropCleanup {
    fn drop(&mut self) {
        if let Some(RMapItem { start, .. }) = self.0.lock().remove(&self.1) {
            let elapsed_s = start.elapsed().as_secs_f64();
            tracing::debug!(dbg_name = %self.2, msg_id = %self.1, %elapsed_s, "req dropped");
        }
    }
}

/// The waiting side of a registered request.
pub(crate) struct PendingResponse {
    receiver: RRecv,
    _cleanup: RMapDropCleanup,
}

impl PendingResponse {
    /// Wait for the response, or fail with [`MeshError::TimedOut`].
    pub async fn wait(self, timeout: ProxyTimeout) -> MeshResult<MeshMessage> {
        let PendingResponse { receiver, _cleanup } = self;
        let r = timeout
            .mix(async move {
                match receiver.await {
                    Ok(r) => r,
                    Err(_) => Err("response tracker dropped".into()),
                }
            })
            .await;
        drop(_cleanup);
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_to(id: u64) -> MeshMessage {
        MeshMessage {
            response_id: Some(id),
            pushed_locks: vec![ObjectId::from("x")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn matched_response_resolves() {
        let t = ResponseTracker::new("test");
        let (id, pending) = t.register();
        assert!(t.awaits(id));
        assert!(t.respond(&response_to(id)));
        assert!(!t.awaits(id));
        let msg = pending.wait(ProxyTimeout::from_millis(100)).await.unwrap();
        assert_eq!(Some(id), msg.response_id);
        assert_eq!(0, t.pending_count());
    }

    #[tokio::test]
    async fn unmatched_response_is_reported() {
        let t = ResponseTracker::new("test");
        let (id, _pending) = t.register();
        assert!(!t.respond(&response_to(id + 1000)));
        assert!(!t.respond(&MeshMessage::default()));
        assert_eq!(1, t.pending_count());
    }

    #[tokio::test]
    async fn timeout_cleans_up() {
        let t = ResponseTracker::new("test");
        let (id, pending) = t.register();
        let r = pending.wait(ProxyTimeout::from_millis(5)).await;
        assert!(r.unwrap_err().is_timeout());
        assert_eq!(0, t.pending_count());
        // a late response finds nothing
        assert!(!t.respond(&response_to(id)));
    }

    #[tokio::test]
    async fn fail_all_fails_every_pending() {
        let t = ResponseTracker::new("test");
        let (_, a) = t.register();
        let (_, b) = t.register();
        let peer = PeerLocation::create("mem://gone").unwrap();
        t.fail_all(|| MeshError::EndpointDead(peer.clone()));
        for p in [a, b] {
            let err = p.wait(ProxyTimeout::from_millis(100)).await.unwrap_err();
            assert!(matches!(err, MeshError::EndpointDead(_)));
        }
    }
}
