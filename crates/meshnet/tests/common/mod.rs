#![allow(dead_code)]

use meshnet::test_utils::*;
use meshnet::*;
use std::sync::Arc;

pub fn loc(s: &str) -> PeerLocation {
    PeerLocation::create(s).unwrap()
}

pub fn id(s: &str) -> ObjectId {
    ObjectId::from(s)
}

pub fn tuning() -> ProxyTuningParams {
    let mut t = tuning_params_struct::ProxyTuningParams::default();
    t.local_lock_wait_ms = 1000;
    t.default_obtain_timeout_ms = 2000;
    Arc::new(t)
}

pub fn timeout() -> ProxyTimeout {
    ProxyTimeout::from_millis(2000)
}

/// A switchboard with one node per location.
pub fn mesh(locations: &[&str]) -> (MemSwitchboard, Vec<(ProxyManager, MemStore)>) {
    meshnet::trace::test_run().unwrap();
    let sb = MemSwitchboard::new();
    let nodes = locations
        .iter()
        .map(|l| sb.spawn_node(l, tuning()).unwrap())
        .collect();
    (sb, nodes)
}

/// Create a home object with one entity type and one property.
pub fn create_doc(manager: &ProxyManager, name: &str) {
    manager
        .transact(|tx| {
            let doc = tx.create(id(name), ["Doc".to_string()].into(), Timestamp(10))?;
            tx.apply_change(&Change::PropertyChanged {
                id: doc.clone(),
                property: "title".into(),
                old_value: None,
                new_value: Some("draft".into()),
                time: Timestamp(11),
            })?;
            Ok(doc)
        })
        .unwrap();
}
