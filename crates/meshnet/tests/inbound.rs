mod common;

use common::*;
use meshnet::test_utils::*;
use meshnet::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Sent = Arc<Mutex<Vec<MeshMessage>>>;

/// A manager whose endpoints record what would have been sent.
fn recording_node(local: &str) -> (ProxyManager, MemStore, Sent) {
    meshnet::trace::test_run().unwrap();
    let store = MemStore::new(loc(local));
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sent2 = sent.clone();
    let factory = move |_local: PeerLocation,
                        partner: PeerLocation,
                        _events: EndpointEventSender|
          -> MeshResult<DynMessageEndpoint> {
        let sent = sent2.clone();
        let mut ep = MockMessageEndpoint::new();
        ep.expect_partner().return_const(partner);
        ep.expect_start_communicating().return_const(());
        ep.expect_is_dead().return_const(false);
        ep.expect_die().return_const(());
        ep.expect_enqueue_message_for_send()
            .returning(move |msg| {
                sent.lock().push(msg);
                Ok(())
            });
        Ok(Arc::new(ep))
    };
    let manager = ProxyManager::new(Arc::new(store.clone()), Arc::new(factory), tuning());
    (manager, store, sent)
}

/// Deliver `msg` from `from` and wait until the proxy has fully processed it.
async fn deliver_and_settle(manager: &ProxyManager, from: &PeerLocation, msg: MeshMessage) {
    let proxy = manager.obtain_for(from, None).unwrap();
    let reads = Arc::new(AtomicUsize::new(0));
    let r = reads.clone();
    let listener = proxy.add_lease_listener(move |_: &LeaseUpdatedEvent| {
        r.fetch_add(1, Ordering::SeqCst);
    });
    manager.deliver(from, msg).unwrap();
    assert!(wait_until(2000, || reads.load(Ordering::SeqCst) > 0).await);
    proxy.remove_lease_listener(listener);
}

fn home_doc(store: &MemStore, name: &str) {
    store.insert(ReplicaSnapshot::new_home(id(name), Timestamp(1)));
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_to_say_sends_nothing() {
    let (manager, _store, sent) = recording_node("mem://a");
    let b = loc("mem://b");
    deliver_and_settle(
        &manager,
        &b,
        MeshMessage {
            request_id: Some(7),
            requested_locks: vec![id("missing")],
            ..Default::default()
        },
    )
    .await;
    assert!(sent.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn response_carries_request_id() {
    let (manager, store, sent) = recording_node("mem://a");
    let b = loc("mem://b");
    home_doc(&store, "doc");
    deliver_and_settle(
        &manager,
        &b,
        MeshMessage {
            request_id: Some(7),
            requested_locks: vec![id("doc")],
            ..Default::default()
        },
    )
    .await;
    let sent = sent.lock();
    assert_eq!(1, sent.len());
    assert_eq!(Some(7), sent[0].response_id);
    assert_eq!(vec![id("doc")], sent[0].pushed_locks);
    assert!(!store.holds_lock(&id("doc")));
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_request_from_lock_direction_is_refused() {
    let (manager, store, sent) = recording_node("mem://a");
    let b = loc("mem://b");
    let mut doc = ReplicaSnapshot::new_home(id("doc"), Timestamp(1));
    doc.proxy_towards_home = Some(b.clone());
    doc.proxy_towards_lock = Some(b.clone());
    doc.authoritative = false;
    store.insert(doc);
    deliver_and_settle(
        &manager,
        &b,
        MeshMessage {
            request_id: Some(7),
            requested_locks: vec![id("doc")],
            ..Default::default()
        },
    )
    .await;
    // no grant and no loop back to b
    assert!(sent.lock().is_empty());
    assert_eq!(
        Some(b),
        store.get(&id("doc")).unwrap().proxy_towards_lock
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn first_time_wins_over_resync() {
    let (manager, store, sent) = recording_node("mem://a");
    let b = loc("mem://b");
    home_doc(&store, "doc");
    deliver_and_settle(
        &manager,
        &b,
        MeshMessage {
            request_id: Some(9),
            requested_first_time_objects: vec![ObjectAccessPath::to_object(
                loc("mem://a"),
                id("doc"),
            )],
            requested_resynchronize: vec![id("doc")],
            ..Default::default()
        },
    )
    .await;
    let sent = sent.lock();
    assert_eq!(1, sent.len());
    assert_eq!(1, sent[0].conveyed_objects.len());
    assert!(sent[0].conveyed_objects[0].authoritative);
    assert!(sent[0].resynchronized_objects.is_empty());
    assert!(store.get(&id("doc")).unwrap().replicates_towards(&b));
}

#[tokio::test(flavor = "multi_thread")]
async fn pushed_lock_for_conveyed_object_is_applied_after_creation() {
    let (manager, store, _sent) = recording_node("mem://a");
    let b = loc("mem://b");
    deliver_and_settle(
        &manager,
        &b,
        MeshMessage {
            conveyed_objects: vec![ReplicaSnapshot::new_home(id("doc"), Timestamp(1))],
            pushed_locks: vec![id("doc")],
            ..Default::default()
        },
    )
    .await;
    let doc = store.get(&id("doc")).unwrap();
    assert!(doc.has_lock());
    assert_eq!(Some(b), doc.proxy_towards_home);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_items_do_not_spoil_the_rest() {
    let (manager, store, _sent) = recording_node("mem://a");
    let b = loc("mem://b");
    home_doc(&store, "doc");
    let mut msg = MeshMessage::new();
    msg.type_additions = vec![
        Change::TypeAdded {
            id: id("missing"),
            entity_type: "Lost".into(),
            time: Timestamp(2),
        },
        // wrong batch, skipped
        Change::PropertyChanged {
            id: id("doc"),
            property: "smuggled".into(),
            old_value: None,
            new_value: Some("x".into()),
            time: Timestamp(2),
        },
        Change::TypeAdded {
            id: id("doc"),
            entity_type: "Kept".into(),
            time: Timestamp(2),
        },
    ];
    msg.role_additions = vec![Change::RoleAdded {
        id: id("doc"),
        neighbor: id("stranger"),
        role_type: "r".into(),
        time: Timestamp(2),
    }];
    msg.push_change(Change::PropertyChanged {
        id: id("doc"),
        property: "title".into(),
        old_value: None,
        new_value: Some("ok".into()),
        time: Timestamp(2),
    });
    deliver_and_settle(&manager, &b, msg).await;

    let doc = store.get(&id("doc")).unwrap();
    assert!(doc.entity_types.contains("Kept"));
    assert_eq!(Some(&PropertyValue::from("ok")), doc.properties.get("title"));
    assert!(!doc.properties.contains_key("smuggled"));
    assert!(store.get(&id("missing")).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cease_removes_proxy_without_response() {
    let (manager, store, sent) = recording_node("mem://a");
    let b = loc("mem://b");
    home_doc(&store, "doc");
    let proxy = manager.obtain_for(&b, None).unwrap();
    manager
        .deliver(
            &b,
            MeshMessage {
                request_id: Some(3),
                requested_locks: vec![id("doc")],
                cease_communications: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert!(wait_until(2000, || manager.get(&b).is_none()).await);
    assert!(proxy.is_dead());
    assert!(sent.lock().is_empty());
    assert!(store.holds_lock(&id("doc")));
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_cease_over_the_switchboard() {
    let (_sb, nodes) = mesh(&["mem://a", "mem://b"]);
    let (a, _) = &nodes[0];
    let (b, _) = &nodes[1];
    create_doc(b, "doc");
    let path = ObjectAccessPath::to_object(loc("mem://b"), id("doc"));
    a.access_locally(vec![path], timeout()).await[0]
        .as_ref()
        .unwrap();
    assert!(b.get(&loc("mem://a")).is_some());

    a.get(&loc("mem://b"))
        .unwrap()
        .initiate_cease_communications();
    assert!(a.get(&loc("mem://b")).is_none());
    assert!(wait_until(2000, || b.get(&loc("mem://a")).is_none()).await);
}
