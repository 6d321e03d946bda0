//! Reachability: which objects get serialized, and their dense numbering.
//!
//! The serialized set is exactly the objects present in any view's index,
//! plus every sofa descriptor, plus everything transitively referenced
//! from those. Sequence numbers are assigned in ascending identity order
//! (never discovery order) so the diff codec's "previous object of the
//! same type" is identical on both sides of the wire.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::store::{FsData, FsId, Slot, Store};
use crate::types::TypeMapper;

/// Bijection between stable identities and dense sequence numbers ≥ 1.
/// Sequence 0 is reserved for null and for objects a type filter excluded.
#[derive(Debug, Default)]
pub struct SeqMap {
    to_seq: FxHashMap<FsId, u32>,
    to_id: Vec<Option<FsId>>, // [0] = None
}

impl SeqMap {
    pub(crate) fn new() -> SeqMap {
        SeqMap {
            to_seq: FxHashMap::default(),
            to_id: vec![None],
        }
    }

    /// Assigns the next sequence number to `id`, or 0 when excluded.
    pub(crate) fn add(&mut self, id: FsId, included: bool) -> u32 {
        if included {
            let seq = self.to_id.len() as u32;
            self.to_id.push(Some(id));
            self.to_seq.insert(id, seq);
            seq
        } else {
            self.to_seq.insert(id, 0);
            0
        }
    }

    /// The sequence number of an identity, if it was mapped this session.
    pub fn seq_of(&self, id: FsId) -> Option<u32> {
        self.to_seq.get(&id).copied()
    }

    /// The identity holding a sequence number.
    pub fn id_of(&self, seq: u32) -> Option<FsId> {
        self.to_id.get(seq as usize).copied().flatten()
    }

    /// Highest assigned sequence number.
    pub fn max_seq(&self) -> u32 {
        self.to_id.len() as u32 - 1
    }

    /// The sequence-indexed identity table ([0] = None).
    pub(crate) fn id_slots(&self) -> &[Option<FsId>] {
        &self.to_id
    }

    pub(crate) fn clone_from_map(other: &SeqMap) -> SeqMap {
        SeqMap {
            to_seq: other.to_seq.clone(),
            to_id: other.to_id.clone(),
        }
    }

    /// Rebuilds a map from a sequence-indexed identity table.
    pub(crate) fn from_slots(to_id: Vec<Option<FsId>>) -> SeqMap {
        let to_seq = to_id
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| id.map(|id| (id, seq as u32)))
            .collect();
        SeqMap { to_seq, to_id }
    }
}

/// Snapshot of one session's reachability and numbering.
///
/// Capture it from a serialization (or deserialization) and replay it to
/// serialize the same unmodified graph to several targets without
/// re-walking, or as the baseline a later delta operation resolves
/// pre-mark sequence numbers against.
#[derive(Debug, Clone)]
pub struct ReuseInfo {
    pub(crate) found: Arc<Vec<FsId>>,
    pub(crate) map: Arc<SeqMap>,
}

impl ReuseInfo {
    /// Number of objects in the snapshot.
    pub fn len(&self) -> usize {
        self.found.len()
    }

    /// Returns true if the snapshot holds no objects.
    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

/// Computes the serialized set: indexed + sofas + transitively referenced,
/// each object visited once, returned ascending by identity.
pub(crate) fn find_reachable(store: &Store) -> Vec<FsId> {
    let mut found: FxHashSet<FsId> = FxHashSet::default();
    let mut worklist: Vec<FsId> = Vec::new();

    for view in 0..store.view_count() {
        let sofa = store.view_sofa(view);
        if found.insert(sofa) {
            worklist.push(sofa);
        }
        for id in store.indexed_fss(view) {
            if found.insert(id) {
                worklist.push(id);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        match &store.fs(id).data {
            FsData::Record(slots) => {
                for slot in slots {
                    if let Slot::Ref(Some(r)) = slot {
                        if found.insert(*r) {
                            worklist.push(*r);
                        }
                    }
                }
            }
            FsData::Refs(elems) => {
                for r in elems.iter().flatten() {
                    if found.insert(*r) {
                        worklist.push(*r);
                    }
                }
            }
            _ => {}
        }
    }

    let mut ids: Vec<FsId> = found.into_iter().collect();
    ids.sort_unstable();
    ids
}

/// Builds the numbering for a full serialization: ascending identity
/// order, excluded types pinned to sequence 0.
pub(crate) fn build_seq_map(
    store: &Store,
    found: &[FsId],
    mapper: Option<&TypeMapper>,
) -> SeqMap {
    let mut map = SeqMap::new();
    for &id in found {
        let included = match mapper {
            Some(m) => m.map_src_to_tgt(store.type_of(id)) != 0,
            None => true,
        };
        map.add(id, included);
    }
    map
}

/// Extends a baseline numbering for a delta serialization: pre-mark
/// objects keep their baseline numbers, new objects continue the sequence
/// in ascending identity order. Old objects the baseline never saw stay
/// unnumbered (references to them encode as null).
pub(crate) fn extend_seq_map(
    baseline: &SeqMap,
    found: &[FsId],
    mark_next_id: u32,
) -> SeqMap {
    let mut map = SeqMap::clone_from_map(baseline);
    for &id in found {
        if map.seq_of(id).is_some() {
            continue;
        }
        if id.get() >= mark_next_id {
            let seq = map.to_id.len() as u32;
            map.to_id.push(Some(id));
            map.to_seq.insert(id, seq);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::{Range, TYPE_TOP, TypeSystemBuilder};

    fn linked_store() -> (Store, Vec<FsId>) {
        let mut b = TypeSystemBuilder::new();
        let node = b.add_type("Node", TYPE_TOP).unwrap();
        b.add_feature(node, "next", Range::Ref).unwrap();
        let ts = b.commit().unwrap();
        let mut store = Store::new(&ts);
        let view = store.create_view("_InitialView");
        let a = store.create_fs(node);
        let c = store.create_fs(node);
        let unreachable = store.create_fs(node);
        // a -> c, only a indexed; c reachable through a
        store.set_ref_value(a, 0, Some(c));
        store.index_fs(view, a);
        (store, vec![a, c, unreachable])
    }

    #[test]
    fn test_walk_follows_refs_and_skips_unreachable() {
        let (store, ids) = linked_store();
        let found = find_reachable(&store);
        let sofa = store.view_sofa(0);
        assert!(found.contains(&sofa));
        assert!(found.contains(&ids[0]));
        assert!(found.contains(&ids[1]));
        assert!(!found.contains(&ids[2]));
    }

    #[test]
    fn test_walk_survives_cycles() {
        let (mut store, ids) = linked_store();
        store.set_ref_value(ids[1], 0, Some(ids[0])); // c -> a closes a cycle
        let found = find_reachable(&store);
        assert!(found.contains(&ids[0]) && found.contains(&ids[1]));
    }

    #[test]
    fn test_seq_assignment_is_identity_ordered() {
        let (store, _) = linked_store();
        let found = find_reachable(&store);
        let map = build_seq_map(&store, &found, None);
        // ascending ids get ascending seqs, starting at 1
        let seqs: Vec<u32> = found.iter().map(|&id| map.seq_of(id).unwrap()).collect();
        assert_eq!(seqs, (1..=found.len() as u32).collect::<Vec<_>>());
        assert_eq!(map.id_of(0), None);
    }

    #[test]
    fn test_extend_keeps_baseline_numbers() {
        let (mut store, _) = linked_store();
        let found = find_reachable(&store);
        let baseline = build_seq_map(&store, &found, None);
        let cutoff = store.next_fs_id();

        let node = store.type_system().code_of("Node").unwrap();
        let fresh = store.create_fs(node);
        store.index_fs(0, fresh);

        let found2 = find_reachable(&store);
        let map = extend_seq_map(&baseline, &found2, cutoff);
        for &id in found.iter() {
            assert_eq!(map.seq_of(id), baseline.seq_of(id));
        }
        assert_eq!(map.seq_of(fresh), Some(baseline.max_seq() + 1));
    }
}
