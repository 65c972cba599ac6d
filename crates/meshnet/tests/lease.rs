mod common;

use common::*;
use meshnet::test_utils::*;
use meshnet::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn leasing_tuning(lease_ms: u64) -> ProxyTuningParams {
    let mut t = tuning_params_struct::ProxyTuningParams::default();
    t.proxy_lease_ms = lease_ms;
    Arc::new(t)
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_extend_the_lease_and_expired_proxies_go() {
    meshnet::trace::test_run().unwrap();
    let sb = MemSwitchboard::new();
    let (a, _) = sb.spawn_node("mem://a", leasing_tuning(60_000)).unwrap();
    let (b, _) = sb.spawn_node("mem://b", leasing_tuning(60_000)).unwrap();
    create_doc(&b, "doc");

    let proxy = a.obtain_for(&loc("mem://b"), None).unwrap();
    assert!(proxy.lease().time_expires.is_never());

    let path = ObjectAccessPath::to_object(loc("mem://b"), id("doc"));
    proxy.obtain_replica(vec![path], timeout()).await.unwrap();
    let lease = proxy.lease();
    assert!(!lease.time_expires.is_never());
    assert!(lease.time_read >= lease.time_created);

    assert!(a.dispose_expired(Timestamp::now()).is_empty());
    let later = Timestamp(lease.time_expires.as_millis() + 1);
    assert_eq!(vec![loc("mem://b")], a.dispose_expired(later));
    assert!(a.get(&loc("mem://b")).is_none());
    assert!(proxy.is_dead());
}

#[tokio::test(flavor = "multi_thread")]
async fn externalized_proxy_restores_lease_and_coherence() {
    let (_sb, nodes) = mesh(&["mem://a", "mem://b"]);
    let (a, _) = &nodes[0];
    let (b, _) = &nodes[1];
    create_doc(b, "doc");

    let coherence = CoherenceSpec::Periodic { period: 1000 };
    let proxy = a
        .obtain_for(&loc("mem://b"), Some(coherence.clone()))
        .unwrap();
    let path = ObjectAccessPath::to_object(loc("mem://b"), id("doc"));
    proxy.obtain_replica(vec![path], timeout()).await.unwrap();

    let ext = a.externalize(&loc("mem://b")).unwrap();
    assert_eq!(Some(coherence.clone()), ext.coherence);
    a.remove(&loc("mem://b"));
    assert!(a.get(&loc("mem://b")).is_none());

    let restored = a.restore(ext.clone()).unwrap();
    assert!(!restored.is_dead());
    assert_eq!(ext.lease, restored.lease());
    assert_eq!(coherence, restored.coherence());

    // still talks to the peer
    let granted = restored
        .try_to_obtain_locks(vec![id("doc")], timeout())
        .await
        .unwrap();
    assert_eq!(vec![id("doc")], granted);
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_hear_updates_until_unsubscribed() {
    let (_sb, nodes) = mesh(&["mem://a", "mem://b"]);
    let (a, _) = &nodes[0];
    let proxy = a.obtain_for(&loc("mem://b"), None).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let listener = proxy.add_lease_listener(move |evt: &LeaseUpdatedEvent| {
        assert_eq!(PeerLocation::create("mem://b").unwrap(), evt.peer);
        c.fetch_add(1, Ordering::SeqCst);
    });
    proxy.set_coherence(Some(CoherenceSpec::OneTime));
    assert_eq!(1, count.load(Ordering::SeqCst));

    assert!(proxy.remove_lease_listener(listener));
    proxy.set_coherence(None);
    assert_eq!(1, count.load(Ordering::SeqCst));
    assert_eq!(CoherenceSpec::default(), proxy.coherence());
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_endpoint_is_replaced_on_next_obtain() {
    let (sb, nodes) = mesh(&["mem://a", "mem://b"]);
    let (a, _) = &nodes[0];
    let (b, _) = &nodes[1];
    create_doc(b, "doc");

    let first = a.obtain_for(&loc("mem://b"), None).unwrap();
    first.die(false);
    assert!(first.is_dead());
    assert!(first
        .try_to_obtain_locks(vec![id("doc")], timeout())
        .await
        .is_err());

    let second = a.obtain_for(&loc("mem://b"), None).unwrap();
    assert!(!second.is_dead());
    assert_eq!(first.lease().time_created, second.lease().time_created);
    let before = sb.sent_count();
    let granted = second
        .try_to_obtain_locks(vec![id("doc")], timeout())
        .await
        .unwrap();
    assert_eq!(vec![id("doc")], granted);
    assert!(sb.sent_count() > before);
}

#[tokio::test(flavor = "multi_thread")]
async fn replaced_endpoint_cannot_disable_its_successor() {
    meshnet::trace::test_run().unwrap();
    // one flag per endpoint created, so the test can fail a transport
    let flags: Arc<Mutex<Vec<Arc<AtomicBool>>>> = Arc::new(Mutex::new(Vec::new()));
    let flags2 = flags.clone();
    let factory = move |_local: PeerLocation,
                        partner: PeerLocation,
                        events: EndpointEventSender|
          -> MeshResult<DynMessageEndpoint> {
        let dead = Arc::new(AtomicBool::new(false));
        flags2.lock().push(dead.clone());
        let mut ep = MockMessageEndpoint::new();
        ep.expect_partner().return_const(partner);
        ep.expect_start_communicating().return_const(());
        let d = dead.clone();
        ep.expect_is_dead().returning(move || d.load(Ordering::SeqCst));
        // a dying transport reports itself disabled
        ep.expect_die().returning(move || {
            dead.store(true, Ordering::SeqCst);
            let _ = events.send(EndpointEvent::Disabled(vec![]));
        });
        ep.expect_enqueue_message_for_send().returning(|_| Ok(()));
        Ok(Arc::new(ep))
    };
    let store = MemStore::new(loc("mem://a"));
    let manager = ProxyManager::new(Arc::new(store), Arc::new(factory), tuning());
    let b = loc("mem://b");

    let first = manager.obtain_for(&b, None).unwrap();
    let waiting = {
        let first = first.clone();
        tokio::spawn(async move {
            first
                .try_to_obtain_locks(vec![id("doc")], ProxyTimeout::from_millis(60_000))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // the transport fails underneath the proxy
    flags.lock()[0].store(true, Ordering::SeqCst);
    assert!(first.is_dead());

    let second = manager.obtain_for(&b, None).unwrap();
    assert!(!second.is_dead());

    // the old proxy's callers hear about it right away
    let err = tokio::time::timeout(std::time::Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches::matches!(err, MeshError::EndpointDead(_)));

    // the Disabled report of the old endpoint has been dispatched by now
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!second.is_dead());
    assert!(!manager.get(&b).unwrap().is_dead());
    assert_eq!(2, flags.lock().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_death_ceases_on_both_sides() {
    let (_sb, nodes) = mesh(&["mem://a", "mem://b"]);
    let (a, _) = &nodes[0];
    let (b, _) = &nodes[1];
    create_doc(b, "doc");
    let path = ObjectAccessPath::to_object(loc("mem://b"), id("doc"));
    a.access_locally(vec![path], timeout()).await[0]
        .as_ref()
        .unwrap();
    assert!(b.get(&loc("mem://a")).is_some());

    let proxy = a.get(&loc("mem://b")).unwrap();
    proxy.die(true);
    assert!(proxy.is_dead());
    assert!(a.get(&loc("mem://b")).is_none());
    assert!(wait_until(2000, || b.get(&loc("mem://a")).is_none()).await);
}
