//! Computes the message that turns one set of replicas into another.
//!
//! Feed the result to a peer and its inbound path brings its replicas from
//! the baseline state to the comparison state.

use crate::*;
use std::collections::{BTreeMap, BTreeSet};

/// Diffs object snapshots against a fixed baseline.
#[derive(Clone, Debug, Default)]
pub struct Differencer {
    baseline: BTreeMap<ObjectId, ReplicaSnapshot>,
}

impl Differencer {
    /// Differencer against `baseline`.
    pub fn new(baseline: impl IntoIterator<Item = ReplicaSnapshot>) -> Self {
        Self {
            baseline: baseline.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    /// The delta from the baseline to `comparison`.
    ///
    /// Objects only in the baseline are deleted, objects only in the
    /// comparison are conveyed in full, everything else becomes individual
    /// changes stamped with the comparison object's update time.
    pub fn determine_delta(&self, comparison: &[ReplicaSnapshot]) -> MeshMessage {
        let mut msg = MeshMessage::new();
        let compared: BTreeSet<&ObjectId> = comparison.iter().map(|s| &s.id).collect();

        for (id, old) in &self.baseline {
            if !compared.contains(id) {
                msg.push_change(Change::Deleted {
                    id: id.clone(),
                    time: old.time_updated.max(Timestamp::now()),
                });
            }
        }

        for new in comparison {
            match self.baseline.get(&new.id) {
                Some(old) => diff_object(old, new, &mut msg),
                None => msg.conveyed_objects.push(new.clone()),
            }
        }

        tracing::trace!(changes = %msg.change_count(), conveyed = %msg.conveyed_objects.len(), "delta");
        msg
    }
}

fn diff_object(old: &ReplicaSnapshot, new: &ReplicaSnapshot, msg: &mut MeshMessage) {
    let id = &new.id;
    let time = new.time_updated;

    for t in new.entity_types.difference(&old.entity_types) {
        msg.push_change(Change::TypeAdded {
            id: id.clone(),
            entity_type: t.clone(),
            time,
        });
    }
    for t in old.entity_types.difference(&new.entity_types) {
        msg.push_change(Change::TypeRemoved {
            id: id.clone(),
            entity_type: t.clone(),
            time,
        });
    }

    let keys: BTreeSet<&String> = old.properties.keys().chain(new.properties.keys()).collect();
    for key in keys {
        let before = old.properties.get(key);
        let after = new.properties.get(key);
        if before != after {
            msg.push_change(Change::PropertyChanged {
                id: id.clone(),
                property: key.clone(),
                old_value: before.cloned(),
                new_value: after.cloned(),
                time,
            });
        }
    }

    for (neighbor, old_roles) in &old.neighbors {
        match new.neighbors.get(neighbor) {
            None => msg.push_change(Change::NeighborRemoved {
                id: id.clone(),
                neighbor: neighbor.clone(),
                time,
            }),
            Some(new_roles) => {
                for role in old_roles.difference(new_roles) {
                    msg.push_change(Change::RoleRemoved {
                        id: id.clone(),
                        neighbor: neighbor.clone(),
                        role_type: role.clone(),
                        time,
                    });
                }
                for role in new_roles.difference(old_roles) {
                    msg.push_change(Change::RoleAdded {
                        id: id.clone(),
                        neighbor: neighbor.clone(),
                        role_type: role.clone(),
                        time,
                    });
                }
            }
        }
    }
    for (neighbor, roles) in &new.neighbors {
        if !old.neighbors.contains_key(neighbor) {
            msg.push_change(Change::NeighborAdded {
                id: id.clone(),
                neighbor: neighbor.clone(),
                role_types: roles.clone(),
                time,
            });
        }
    }

    for e in old.equivalents.difference(&new.equivalents) {
        msg.push_change(Change::EquivalentRemoved {
            id: id.clone(),
            equivalent: e.clone(),
            time,
        });
    }
    for e in new.equivalents.difference(&old.equivalents) {
        msg.push_change(Change::EquivalentAdded {
            id: id.clone(),
            equivalent: e.clone(),
            time,
        });
    }
}
