//! The wire message exchanged between two peers in one round.

use crate::*;

/// Everything one peer tells another in one round.
///
/// Every batch is independently optional. A message in which no batch is
/// populated and the cease flag is unset is empty, and empty messages are
/// never put on the wire.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MeshMessage {
    /// Set when the sender expects a correlated response.
    pub request_id: Option<u64>,
    /// Set when this answers a request with this id.
    pub response_id: Option<u64>,

    /// Full snapshots for first-time transfer.
    pub conveyed_objects: Vec<ReplicaSnapshot>,
    /// Full snapshots answering a resynchronization request.
    pub resynchronized_objects: Vec<ReplicaSnapshot>,

    /// [`Change::TypeAdded`] only.
    pub type_additions: Vec<Change>,
    /// [`Change::TypeRemoved`] only.
    pub type_removals: Vec<Change>,
    /// [`Change::PropertyChanged`] only.
    pub property_changes: Vec<Change>,
    /// [`Change::NeighborAdded`] only.
    pub neighbor_additions: Vec<Change>,
    /// [`Change::NeighborRemoved`] only.
    pub neighbor_removals: Vec<Change>,
    /// [`Change::RoleAdded`] only.
    pub role_additions: Vec<Change>,
    /// [`Change::RoleRemoved`] only.
    pub role_removals: Vec<Change>,
    /// [`Change::EquivalentAdded`] only.
    pub equivalent_additions: Vec<Change>,
    /// [`Change::EquivalentRemoved`] only.
    pub equivalent_removals: Vec<Change>,
    /// [`Change::Deleted`] only.
    pub deletions: Vec<Change>,

    /// The sender no longer replicates these objects with the recipient.
    pub canceled_objects: Vec<ObjectId>,
    /// The sender asks for the lock on these objects.
    pub requested_locks: Vec<ObjectId>,
    /// The sender hands the lock on these objects to the recipient.
    pub pushed_locks: Vec<ObjectId>,
    /// The sender forcibly took the lock on these objects.
    pub reclaimed_locks: Vec<ObjectId>,
    /// The sender asks to become home of these objects.
    pub requested_home_replicas: Vec<ObjectId>,
    /// The sender hands the home designation of these objects to the recipient.
    pub pushed_home_replicas: Vec<ObjectId>,
    /// The sender wants replicas of these objects for the first time.
    pub requested_first_time_objects: Vec<ObjectAccessPath>,
    /// The sender wants fresh snapshots of these objects.
    pub requested_resynchronize: Vec<ObjectId>,

    /// The sender is shutting this channel down.
    pub cease_communications: bool,
}

impl MeshMessage {
    /// An empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no batch is populated and cease is unset. Correlation ids
    /// alone do not make a message worth sending.
    pub fn is_empty(&self) -> bool {
        !self.cease_communications
            && !self.has_mutations()
            && !self.has_requests()
            && self.pushed_locks.is_empty()
            && self.reclaimed_locks.is_empty()
            && self.pushed_home_replicas.is_empty()
    }

    /// Does applying this message require a local-store transaction?
    pub fn has_mutations(&self) -> bool {
        !self.conveyed_objects.is_empty()
            || !self.resynchronized_objects.is_empty()
            || !self.deletions.is_empty()
            || self.change_batches().iter().any(|(_, b)| !b.is_empty())
    }

    /// Does this message ask the recipient for anything?
    pub fn has_requests(&self) -> bool {
        !self.canceled_objects.is_empty()
            || !self.requested_locks.is_empty()
            || !self.requested_home_replicas.is_empty()
            || !self.requested_first_time_objects.is_empty()
            || !self.requested_resynchronize.is_empty()
    }

    /// The non-deletion change batches in the order they must be applied.
    pub fn change_batches(&self) -> [(ChangeKind, &[Change]); 9] {
        [
            (ChangeKind::TypeAddition, self.type_additions.as_slice()),
            (ChangeKind::TypeRemoval, self.type_removals.as_slice()),
            (ChangeKind::NeighborAddition, self.neighbor_additions.as_slice()),
            (ChangeKind::NeighborRemoval, self.neighbor_removals.as_slice()),
            (ChangeKind::RoleAddition, self.role_additions.as_slice()),
            (ChangeKind::RoleRemoval, self.role_removals.as_slice()),
            (ChangeKind::EquivalentAddition, self.equivalent_additions.as_slice()),
            (ChangeKind::EquivalentRemoval, self.equivalent_removals.as_slice()),
            (ChangeKind::PropertyChange, self.property_changes.as_slice()),
        ]
    }

    fn batch_mut(&mut self, kind: ChangeKind) -> &mut Vec<Change> {
        match kind {
            ChangeKind::TypeAddition => &mut self.type_additions,
            ChangeKind::TypeRemoval => &mut self.type_removals,
            ChangeKind::PropertyChange => &mut self.property_changes,
            ChangeKind::NeighborAddition => &mut self.neighbor_additions,
            ChangeKind::NeighborRemoval => &mut self.neighbor_removals,
            ChangeKind::RoleAddition => &mut self.role_additions,
            ChangeKind::RoleRemoval => &mut self.role_removals,
            ChangeKind::EquivalentAddition => &mut self.equivalent_additions,
            ChangeKind::EquivalentRemoval => &mut self.equivalent_removals,
            ChangeKind::Deletion => &mut self.deletions,
        }
    }

    /// Append a change to the batch matching its kind.
    pub fn push_change(&mut self, change: Change) {
        self.batch_mut(change.kind()).push(change);
    }

    /// Number of changes across all change batches, deletions included.
    pub fn change_count(&self) -> usize {
        self.change_batches()
            .iter()
            .map(|(_, b)| b.len())
            .sum::<usize>()
            + self.deletions.len()
    }

    /// Encode for the wire.
    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from the wire.
    pub fn decode(data: &[u8]) -> MeshResult<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> ObjectId {
        ObjectId::from(s)
    }

    #[test]
    fn ids_alone_are_empty() {
        let mut msg = MeshMessage::new();
        assert!(msg.is_empty());
        msg.request_id = Some(3);
        msg.response_id = Some(2);
        assert!(msg.is_empty());
        msg.cease_communications = true;
        assert!(!msg.is_empty());
    }

    fn snapshot() -> ReplicaSnapshot {
        ReplicaSnapshot::new_home(id("a"), Timestamp(1))
    }

    fn path() -> ObjectAccessPath {
        ObjectAccessPath::to_object(PeerLocation::create("mem://p").unwrap(), id("a"))
    }

    #[test]
    fn every_batch_counts() {
        let fillers: [fn(&mut MeshMessage); 12] = [
            |m| m.conveyed_objects.push(snapshot()),
            |m| m.resynchronized_objects.push(snapshot()),
            |m| {
                m.push_change(Change::Deleted {
                    id: id("a"),
                    time: Timestamp(1),
                })
            },
            |m| {
                m.push_change(Change::TypeAdded {
                    id: id("a"),
                    entity_type: "T".into(),
                    time: Timestamp(1),
                })
            },
            |m| m.canceled_objects.push(id("a")),
            |m| m.requested_locks.push(id("a")),
            |m| m.pushed_locks.push(id("a")),
            |m| m.reclaimed_locks.push(id("a")),
            |m| m.requested_home_replicas.push(id("a")),
            |m| m.pushed_home_replicas.push(id("a")),
            |m| m.requested_first_time_objects.push(path()),
            |m| m.requested_resynchronize.push(id("a")),
        ];
        for fill in fillers {
            let mut msg = MeshMessage::new();
            fill(&mut msg);
            assert!(!msg.is_empty(), "{:?}", msg);
        }
    }

    #[test]
    fn push_change_routes_by_kind() {
        let mut msg = MeshMessage::new();
        msg.push_change(Change::RoleAdded {
            id: id("a"),
            neighbor: id("b"),
            role_type: "R".into(),
            time: Timestamp(5),
        });
        msg.push_change(Change::Deleted {
            id: id("c"),
            time: Timestamp(6),
        });
        assert_eq!(1, msg.role_additions.len());
        assert_eq!(1, msg.deletions.len());
        assert_eq!(2, msg.change_count());
        assert!(msg.has_mutations());
        assert!(!msg.has_requests());
    }

    #[test]
    fn wire_codec() {
        let mut msg = MeshMessage::new();
        msg.request_id = Some(42);
        msg.conveyed_objects
            .push(ReplicaSnapshot::new_home(id("x"), Timestamp(10)));
        msg.push_change(Change::PropertyChanged {
            id: id("x"),
            property: "name".into(),
            old_value: None,
            new_value: Some("hello".into()),
            time: Timestamp(11),
        });
        msg.requested_first_time_objects
            .push("mem://a!mem://b#x".parse().unwrap());
        let data = msg.encode().unwrap();
        assert_eq!(msg, MeshMessage::decode(&data).unwrap());
        assert!(MeshMessage::decode(&[0xc1]).is_err());
    }
}
