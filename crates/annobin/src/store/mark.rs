//! Marks and the modification journal behind delta serialization.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::store::FsId;

/// A delta cutoff: objects existing at mark time are "old"; later
/// mutations to them are journaled. Carries enough identity to reject
/// foreign or stale use.
#[derive(Debug, Clone)]
pub struct Marker {
    pub(crate) store: Uuid,
    pub(crate) generation: u64,
    pub(crate) next_fs_id: u32,
    /// Per view at mark time: (sofa, indexed set).
    pub(crate) view_snapshot: Vec<(FsId, BTreeSet<FsId>)>,
}

impl Marker {
    /// The identity cutoff: ids below this existed when the mark was made.
    pub fn next_fs_id(&self) -> u32 {
        self.next_fs_id
    }
}

/// Journaled modifications of one pre-mark object. Repeated writes to the
/// same slot collapse (last value wins; values are read back from the
/// store at serialization time).
#[derive(Debug, Clone, Default)]
pub(crate) struct ModRecord {
    pub(crate) fields: BTreeSet<u16>,
    pub(crate) elements: BTreeSet<u32>,
}

#[derive(Debug)]
pub(crate) struct Journal {
    next_fs_id: u32,
    mods: FxHashMap<FsId, ModRecord>,
}

impl Journal {
    pub(crate) fn new(next_fs_id: u32) -> Journal {
        Journal {
            next_fs_id,
            mods: FxHashMap::default(),
        }
    }

    pub(crate) fn record_field(&mut self, id: FsId, feat: u16) {
        if id.0 < self.next_fs_id {
            self.mods.entry(id).or_default().fields.insert(feat);
        }
    }

    pub(crate) fn record_element(&mut self, id: FsId, idx: u32) {
        if id.0 < self.next_fs_id {
            self.mods.entry(id).or_default().elements.insert(idx);
        }
    }

    pub(crate) fn mods(&self) -> &FxHashMap<FsId, ModRecord> {
        &self.mods
    }
}
