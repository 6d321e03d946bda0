//! The in-memory annotation store the codec serializes: typed feature
//! structures with stable dense identities, per-view indexes, and the
//! mark/journal machinery behind delta serialization.
//!
//! The store is deliberately no larger than what the codec consumes:
//! create/get/set by feature index, arrays (inline or auxiliary-backed),
//! view indexes with sort comparators, and modification journaling.

mod index;
mod mark;

pub use index::{IndexDef, SortOrder};
pub use mark::Marker;

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::error::EncodeError;
use crate::store::index::View;
use crate::store::mark::{Journal, ModRecord};
use crate::types::{Range, SOFA_ID, SOFA_STRING, TYPE_SOFA, TypeCode, TypeSystem};

/// Stable identity of one feature structure. Assigned densely from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsId(pub(crate) u32);

impl FsId {
    /// The numeric identity.
    pub fn get(self) -> u32 {
        self.0
    }
}

/// One scalar field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Boolean(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Option<String>),
    Ref(Option<FsId>),
}

impl Slot {
    fn default_for(range: Range) -> Slot {
        match range {
            Range::Boolean => Slot::Boolean(false),
            Range::Byte => Slot::Byte(0),
            Range::Short => Slot::Short(0),
            Range::Int => Slot::Int(0),
            Range::Long => Slot::Long(0),
            Range::Float => Slot::Float(0.0),
            Range::Double => Slot::Double(0.0),
            Range::String => Slot::Str(None),
            Range::Ref => Slot::Ref(None),
        }
    }
}

/// Payload of one feature structure.
#[derive(Debug, Clone, PartialEq)]
pub enum FsData {
    Record(Vec<Slot>),
    Booleans(Vec<bool>),
    Bytes(Vec<u8>),
    Shorts(Vec<i16>),
    Ints(Vec<i32>),
    Longs(Vec<i64>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
    Strings(Vec<Option<String>>),
    Refs(Vec<Option<FsId>>),
}

impl FsData {
    pub(crate) fn empty_array(element: Range, len: usize) -> FsData {
        match element {
            Range::Boolean => FsData::Booleans(vec![false; len]),
            Range::Byte => FsData::Bytes(vec![0; len]),
            Range::Short => FsData::Shorts(vec![0; len]),
            Range::Int => FsData::Ints(vec![0; len]),
            Range::Long => FsData::Longs(vec![0; len]),
            Range::Float => FsData::Floats(vec![0.0; len]),
            Range::Double => FsData::Doubles(vec![0.0; len]),
            Range::String => FsData::Strings(vec![None; len]),
            Range::Ref => FsData::Refs(vec![None; len]),
        }
    }

    /// Element count for arrays, feature count for records.
    pub fn len(&self) -> usize {
        match self {
            FsData::Record(s) => s.len(),
            FsData::Booleans(v) => v.len(),
            FsData::Bytes(v) => v.len(),
            FsData::Shorts(v) => v.len(),
            FsData::Ints(v) => v.len(),
            FsData::Longs(v) => v.len(),
            FsData::Floats(v) => v.len(),
            FsData::Doubles(v) => v.len(),
            FsData::Strings(v) => v.len(),
            FsData::Refs(v) => v.len(),
        }
    }

    /// Returns true if there are no elements or features.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Fs {
    pub(crate) type_code: TypeCode,
    pub(crate) data: FsData,
}

/// The mutable object-graph store.
#[derive(Debug)]
pub struct Store {
    ts: Arc<TypeSystem>,
    uid: Uuid,
    generation: u64,
    fss: Vec<Option<Fs>>, // index = FsId, slot 0 unused
    pub(crate) views: Vec<View>,
    index_defs: Vec<IndexDef>,
    pub(crate) journal: Option<Journal>,
}

impl Store {
    /// Creates an empty store over a committed type system.
    pub fn new(ts: &Arc<TypeSystem>) -> Store {
        Store {
            ts: Arc::clone(ts),
            uid: Uuid::new_v4(),
            generation: 0,
            fss: vec![None],
            views: Vec::new(),
            index_defs: Vec::new(),
            journal: None,
        }
    }

    /// The store's type system.
    pub fn type_system(&self) -> &Arc<TypeSystem> {
        &self.ts
    }

    /// Drops all feature structures and views. Outstanding markers become
    /// stale. Index definitions survive.
    pub fn reset(&mut self) {
        self.fss = vec![None];
        self.views.clear();
        self.journal = None;
        self.generation += 1;
    }

    /// Number of live feature structures.
    pub fn len(&self) -> usize {
        self.fss.iter().filter(|f| f.is_some()).count()
    }

    /// Returns true if the store holds no feature structures.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn next_fs_id(&self) -> u32 {
        self.fss.len() as u32
    }

    /// All live ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = FsId> + '_ {
        self.fss
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| FsId(i as u32))
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Creates a record feature structure with default-valued features.
    ///
    /// Panics if `type_code` names an array type or the sofa type (sofas
    /// are created through [`create_view`]).
    ///
    /// [`create_view`]: Store::create_view
    pub fn create_fs(&mut self, type_code: TypeCode) -> FsId {
        assert!(
            self.ts.type_info(type_code).array.is_none(),
            "arrays are created with create_array"
        );
        assert!(type_code != TYPE_SOFA, "sofas are created with create_view");
        let slots = self
            .ts
            .features(type_code)
            .iter()
            .map(|f| Slot::default_for(f.range))
            .collect();
        self.adopt(type_code, FsData::Record(slots))
    }

    /// Creates a zero-filled array of `len` elements.
    pub fn create_array(&mut self, element: Range, len: usize) -> FsId {
        let type_code = self.ts.array_type(element);
        self.adopt(type_code, FsData::empty_array(element, len))
    }

    /// Installs a fully-formed feature structure (decoder path: values are
    /// buffered first, then the object is constructed complete).
    pub(crate) fn adopt(&mut self, type_code: TypeCode, data: FsData) -> FsId {
        let id = FsId(self.fss.len() as u32);
        self.fss.push(Some(Fs { type_code, data }));
        id
    }

    /// The type of a feature structure.
    pub fn type_of(&self, id: FsId) -> TypeCode {
        self.fs(id).type_code
    }

    /// Element count of an array feature structure.
    pub fn array_len(&self, id: FsId) -> usize {
        self.fs(id).data.len()
    }

    pub(crate) fn fs(&self, id: FsId) -> &Fs {
        self.fss[id.0 as usize].as_ref().expect("no such feature structure")
    }

    fn fs_mut(&mut self, id: FsId) -> &mut Fs {
        self.fss[id.0 as usize].as_mut().expect("no such feature structure")
    }

    // =========================================================================
    // SCALAR FEATURES
    // =========================================================================

    fn slot(&self, id: FsId, feat: u16) -> &Slot {
        match &self.fs(id).data {
            FsData::Record(slots) => &slots[feat as usize],
            _ => panic!("feature access on an array"),
        }
    }

    fn slot_mut(&mut self, id: FsId, feat: u16) -> &mut Slot {
        match &mut self.fs_mut(id).data {
            FsData::Record(slots) => &mut slots[feat as usize],
            _ => panic!("feature access on an array"),
        }
    }

    pub fn boolean_value(&self, id: FsId, feat: u16) -> bool {
        match self.slot(id, feat) {
            Slot::Boolean(v) => *v,
            _ => panic!("feature is not Boolean"),
        }
    }

    pub fn byte_value(&self, id: FsId, feat: u16) -> u8 {
        match self.slot(id, feat) {
            Slot::Byte(v) => *v,
            _ => panic!("feature is not Byte"),
        }
    }

    pub fn short_value(&self, id: FsId, feat: u16) -> i16 {
        match self.slot(id, feat) {
            Slot::Short(v) => *v,
            _ => panic!("feature is not Short"),
        }
    }

    pub fn int_value(&self, id: FsId, feat: u16) -> i32 {
        match self.slot(id, feat) {
            Slot::Int(v) => *v,
            _ => panic!("feature is not Int"),
        }
    }

    pub fn long_value(&self, id: FsId, feat: u16) -> i64 {
        match self.slot(id, feat) {
            Slot::Long(v) => *v,
            _ => panic!("feature is not Long"),
        }
    }

    pub fn float_value(&self, id: FsId, feat: u16) -> f32 {
        match self.slot(id, feat) {
            Slot::Float(v) => *v,
            _ => panic!("feature is not Float"),
        }
    }

    pub fn double_value(&self, id: FsId, feat: u16) -> f64 {
        match self.slot(id, feat) {
            Slot::Double(v) => *v,
            _ => panic!("feature is not Double"),
        }
    }

    pub fn string_value(&self, id: FsId, feat: u16) -> Option<&str> {
        match self.slot(id, feat) {
            Slot::Str(v) => v.as_deref(),
            _ => panic!("feature is not String"),
        }
    }

    pub fn ref_value(&self, id: FsId, feat: u16) -> Option<FsId> {
        match self.slot(id, feat) {
            Slot::Ref(v) => *v,
            _ => panic!("feature is not Ref"),
        }
    }

    pub fn set_boolean_value(&mut self, id: FsId, feat: u16, v: bool) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Boolean(s) => *s = v,
            _ => panic!("feature is not Boolean"),
        }
    }

    pub fn set_byte_value(&mut self, id: FsId, feat: u16, v: u8) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Byte(s) => *s = v,
            _ => panic!("feature is not Byte"),
        }
    }

    pub fn set_short_value(&mut self, id: FsId, feat: u16, v: i16) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Short(s) => *s = v,
            _ => panic!("feature is not Short"),
        }
    }

    pub fn set_int_value(&mut self, id: FsId, feat: u16, v: i32) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Int(s) => *s = v,
            _ => panic!("feature is not Int"),
        }
    }

    pub fn set_long_value(&mut self, id: FsId, feat: u16, v: i64) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Long(s) => *s = v,
            _ => panic!("feature is not Long"),
        }
    }

    pub fn set_float_value(&mut self, id: FsId, feat: u16, v: f32) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Float(s) => *s = v,
            _ => panic!("feature is not Float"),
        }
    }

    pub fn set_double_value(&mut self, id: FsId, feat: u16, v: f64) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Double(s) => *s = v,
            _ => panic!("feature is not Double"),
        }
    }

    pub fn set_string_value(&mut self, id: FsId, feat: u16, v: Option<&str>) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Str(s) => *s = v.map(str::to_string),
            _ => panic!("feature is not String"),
        }
    }

    pub fn set_ref_value(&mut self, id: FsId, feat: u16, v: Option<FsId>) {
        self.journal_field(id, feat);
        match self.slot_mut(id, feat) {
            Slot::Ref(s) => *s = v,
            _ => panic!("feature is not Ref"),
        }
    }

    /// Unjournaled ref store, used by the decoder's fixup pass.
    pub(crate) fn set_ref_raw(&mut self, id: FsId, feat: u16, v: Option<FsId>) {
        match self.slot_mut(id, feat) {
            Slot::Ref(s) => *s = v,
            _ => panic!("feature is not Ref"),
        }
    }

    // =========================================================================
    // ARRAYS
    // =========================================================================

    pub fn boolean_array(&self, id: FsId) -> &[bool] {
        match &self.fs(id).data {
            FsData::Booleans(v) => v,
            _ => panic!("not a BooleanArray"),
        }
    }

    pub fn byte_array(&self, id: FsId) -> &[u8] {
        match &self.fs(id).data {
            FsData::Bytes(v) => v,
            _ => panic!("not a ByteArray"),
        }
    }

    pub fn short_array(&self, id: FsId) -> &[i16] {
        match &self.fs(id).data {
            FsData::Shorts(v) => v,
            _ => panic!("not a ShortArray"),
        }
    }

    pub fn int_array(&self, id: FsId) -> &[i32] {
        match &self.fs(id).data {
            FsData::Ints(v) => v,
            _ => panic!("not an IntArray"),
        }
    }

    pub fn long_array(&self, id: FsId) -> &[i64] {
        match &self.fs(id).data {
            FsData::Longs(v) => v,
            _ => panic!("not a LongArray"),
        }
    }

    pub fn float_array(&self, id: FsId) -> &[f32] {
        match &self.fs(id).data {
            FsData::Floats(v) => v,
            _ => panic!("not a FloatArray"),
        }
    }

    pub fn double_array(&self, id: FsId) -> &[f64] {
        match &self.fs(id).data {
            FsData::Doubles(v) => v,
            _ => panic!("not a DoubleArray"),
        }
    }

    pub fn string_array(&self, id: FsId) -> &[Option<String>] {
        match &self.fs(id).data {
            FsData::Strings(v) => v,
            _ => panic!("not a StringArray"),
        }
    }

    pub fn ref_array(&self, id: FsId) -> &[Option<FsId>] {
        match &self.fs(id).data {
            FsData::Refs(v) => v,
            _ => panic!("not an FSArray"),
        }
    }

    pub fn set_boolean_array_value(&mut self, id: FsId, idx: usize, v: bool) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Booleans(a) => a[idx] = v,
            _ => panic!("not a BooleanArray"),
        }
    }

    pub fn set_byte_array_value(&mut self, id: FsId, idx: usize, v: u8) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Bytes(a) => a[idx] = v,
            _ => panic!("not a ByteArray"),
        }
    }

    pub fn set_short_array_value(&mut self, id: FsId, idx: usize, v: i16) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Shorts(a) => a[idx] = v,
            _ => panic!("not a ShortArray"),
        }
    }

    pub fn set_int_array_value(&mut self, id: FsId, idx: usize, v: i32) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Ints(a) => a[idx] = v,
            _ => panic!("not an IntArray"),
        }
    }

    pub fn set_long_array_value(&mut self, id: FsId, idx: usize, v: i64) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Longs(a) => a[idx] = v,
            _ => panic!("not a LongArray"),
        }
    }

    pub fn set_float_array_value(&mut self, id: FsId, idx: usize, v: f32) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Floats(a) => a[idx] = v,
            _ => panic!("not a FloatArray"),
        }
    }

    pub fn set_double_array_value(&mut self, id: FsId, idx: usize, v: f64) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Doubles(a) => a[idx] = v,
            _ => panic!("not a DoubleArray"),
        }
    }

    pub fn set_string_array_value(&mut self, id: FsId, idx: usize, v: Option<&str>) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Strings(a) => a[idx] = v.map(str::to_string),
            _ => panic!("not a StringArray"),
        }
    }

    pub fn set_ref_array_value(&mut self, id: FsId, idx: usize, v: Option<FsId>) {
        self.journal_element(id, idx);
        match &mut self.fs_mut(id).data {
            FsData::Refs(a) => a[idx] = v,
            _ => panic!("not an FSArray"),
        }
    }

    /// Unjournaled ref-array store, used by the decoder's fixup pass.
    pub(crate) fn set_ref_array_raw(&mut self, id: FsId, idx: usize, v: Option<FsId>) {
        match &mut self.fs_mut(id).data {
            FsData::Refs(a) => a[idx] = v,
            _ => panic!("not an FSArray"),
        }
    }

    // =========================================================================
    // VIEWS & INDEXES (see index.rs)
    // =========================================================================

    /// Registers a sorted index over `type_code` and its subtypes.
    /// Returns the index's position for [`sorted_fss`].
    ///
    /// [`sorted_fss`]: Store::sorted_fss
    pub fn add_index(&mut self, def: IndexDef) -> usize {
        let idx = self.index_defs.len();
        self.index_defs.push(def);
        for v in 0..self.views.len() {
            self.views[v].sorted.push(BTreeSet::new());
            let members: Vec<FsId> = self.views[v].indexed.iter().copied().collect();
            for id in members {
                let entry = self.sort_entry(idx, id);
                self.views[v].sorted[idx].extend(entry);
            }
        }
        idx
    }

    /// Creates a view and its sofa descriptor. View numbering is creation
    /// order; the sofa's identity fields are fixed here.
    pub fn create_view(&mut self, name: &str) -> usize {
        let sofa_num = self.views.len() as i32 + 1;
        let data = FsData::Record(vec![
            Slot::Int(sofa_num),
            Slot::Str(Some(name.to_string())),
            Slot::Str(Some("text".to_string())),
            Slot::Str(None),
        ]);
        let sofa = self.adopt(TYPE_SOFA, data);
        self.attach_view(sofa)
    }

    /// Installs a view for an already-materialized sofa (decoder path).
    pub(crate) fn attach_view(&mut self, sofa: FsId) -> usize {
        debug_assert_eq!(self.type_of(sofa), TYPE_SOFA);
        let v = self.views.len();
        self.views.push(View {
            sofa,
            indexed: BTreeSet::new(),
            sorted: vec![BTreeSet::new(); self.index_defs.len()],
        });
        v
    }

    /// Number of views.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// The sofa descriptor of a view.
    pub fn view_sofa(&self, view: usize) -> FsId {
        self.views[view].sofa
    }

    /// The name (sofa id) of a view.
    pub fn view_name(&self, view: usize) -> &str {
        self.string_value(self.views[view].sofa, SOFA_ID)
            .expect("sofa without a name")
    }

    /// Finds the view of a sofa descriptor.
    pub fn view_of_sofa(&self, sofa: FsId) -> Option<usize> {
        self.views.iter().position(|v| v.sofa == sofa)
    }

    /// Sets the document text of a view.
    pub fn set_document_text(&mut self, view: usize, text: &str) {
        let sofa = self.views[view].sofa;
        self.set_string_value(sofa, SOFA_STRING, Some(text));
    }

    /// The document text of a view.
    pub fn document_text(&self, view: usize) -> Option<&str> {
        self.string_value(self.views[view].sofa, SOFA_STRING)
    }

    /// Adds a feature structure to a view's indexes.
    pub fn index_fs(&mut self, view: usize, id: FsId) {
        if !self.views[view].indexed.insert(id) {
            return;
        }
        for idx in 0..self.index_defs.len() {
            if let Some(entry) = self.sort_entry(idx, id) {
                self.views[view].sorted[idx].insert(entry);
            }
        }
    }

    /// Removes a feature structure from a view's indexes.
    pub fn unindex_fs(&mut self, view: usize, id: FsId) {
        if !self.views[view].indexed.remove(&id) {
            return;
        }
        for idx in 0..self.index_defs.len() {
            if let Some(entry) = self.sort_entry(idx, id) {
                self.views[view].sorted[idx].remove(&entry);
            }
        }
    }

    /// Whether a feature structure is in a view's indexes.
    pub fn is_indexed(&self, view: usize, id: FsId) -> bool {
        self.views[view].indexed.contains(&id)
    }

    /// All indexed feature structures of a view, ascending by identity.
    pub fn indexed_fss(&self, view: usize) -> impl Iterator<Item = FsId> + '_ {
        self.views[view].indexed.iter().copied()
    }

    /// Indexed feature structures of a view in the order of sorted index
    /// `index` (ties broken by identity).
    pub fn sorted_fss(&self, view: usize, index: usize) -> Vec<FsId> {
        self.views[view].sorted[index].iter().map(|(_, id)| *id).collect()
    }

    fn sort_entry(&self, index: usize, id: FsId) -> Option<(Box<[u64]>, FsId)> {
        let def = &self.index_defs[index];
        if !self.ts.is_subtype(self.type_of(id), def.type_code) {
            return None;
        }
        Some((index::sort_key(self, def, id), id))
    }

    /// Runs a mutation on an indexed object under index protection:
    /// the object leaves every sorted index before the mutation and is
    /// re-entered afterwards, since a modified feature may be a sort key.
    pub(crate) fn protected_update(&mut self, id: FsId, f: impl FnOnce(&mut Store)) {
        let in_views: Vec<usize> = (0..self.views.len())
            .filter(|&v| self.views[v].indexed.contains(&id))
            .collect();
        for &v in &in_views {
            for idx in 0..self.index_defs.len() {
                if let Some(entry) = self.sort_entry(idx, id) {
                    self.views[v].sorted[idx].remove(&entry);
                }
            }
        }
        f(self);
        for &v in &in_views {
            for idx in 0..self.index_defs.len() {
                if let Some(entry) = self.sort_entry(idx, id) {
                    self.views[v].sorted[idx].insert(entry);
                }
            }
        }
    }

    // =========================================================================
    // MARKS & JOURNAL (see mark.rs)
    // =========================================================================

    /// Creates a mark: mutations to pre-existing objects are journaled from
    /// here on, enabling delta serialization. A new mark replaces the
    /// previous one.
    pub fn mark(&mut self) -> Marker {
        let next = self.next_fs_id();
        self.journal = Some(Journal::new(next));
        Marker {
            store: self.uid,
            generation: self.generation,
            next_fs_id: next,
            view_snapshot: self
                .views
                .iter()
                .map(|v| (v.sofa, v.indexed.clone()))
                .collect(),
        }
    }

    /// Checks a marker against this store instance.
    pub(crate) fn check_marker(&self, marker: &Marker) -> Result<(), EncodeError> {
        if marker.store != self.uid {
            return Err(EncodeError::ForeignMark);
        }
        if marker.generation != self.generation {
            return Err(EncodeError::StaleMark);
        }
        Ok(())
    }

    pub(crate) fn mods(&self) -> Option<&FxHashMap<FsId, ModRecord>> {
        self.journal.as_ref().map(|j| j.mods())
    }

    fn journal_field(&mut self, id: FsId, feat: u16) {
        if let Some(j) = &mut self.journal {
            j.record_field(id, feat);
        }
    }

    fn journal_element(&mut self, id: FsId, idx: usize) {
        if let Some(j) = &mut self.journal {
            j.record_element(id, idx as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Range, TYPE_TOP, TypeCode, TypeSystemBuilder};

    fn token_store() -> (Store, TypeCode) {
        let mut b = TypeSystemBuilder::new();
        let tok = b.add_type("Token", TYPE_TOP).unwrap();
        b.add_feature(tok, "begin", Range::Int).unwrap();
        b.add_feature(tok, "end", Range::Int).unwrap();
        b.add_feature(tok, "text", Range::String).unwrap();
        let ts = b.commit().unwrap();
        (Store::new(&ts), tok)
    }

    #[test]
    fn test_create_and_access() {
        let (mut store, tok) = token_store();
        let id = store.create_fs(tok);
        assert_eq!(store.int_value(id, 0), 0);
        store.set_int_value(id, 0, 5);
        store.set_int_value(id, 1, 10);
        store.set_string_value(id, 2, Some("hello"));
        assert_eq!(store.int_value(id, 0), 5);
        assert_eq!(store.string_value(id, 2), Some("hello"));
    }

    #[test]
    fn test_ids_are_dense_and_ascending() {
        let (mut store, tok) = token_store();
        let a = store.create_fs(tok);
        let b = store.create_fs(tok);
        assert_eq!(a.get() + 1, b.get());
    }

    #[test]
    fn test_arrays() {
        let (mut store, _) = token_store();
        let arr = store.create_array(Range::Int, 3);
        store.set_int_array_value(arr, 1, 42);
        assert_eq!(store.int_array(arr), &[0, 42, 0]);
        let longs = store.create_array(Range::Long, 1);
        store.set_long_array_value(longs, 0, 0x0123_4567_89AB_CDEF);
        assert_eq!(store.long_array(longs)[0], 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_sorted_index_order() {
        let (mut store, tok) = token_store();
        let view = store.create_view("_InitialView");
        let idx = store.add_index(IndexDef {
            name: "annotations".into(),
            type_code: tok,
            keys: vec![(0, SortOrder::Ascending), (1, SortOrder::Descending)],
        });
        let mk = |store: &mut Store, b: i32, e: i32| {
            let id = store.create_fs(tok);
            store.set_int_value(id, 0, b);
            store.set_int_value(id, 1, e);
            store.index_fs(view, id);
            id
        };
        let long_one = mk(&mut store, 0, 9);
        let short_one = mk(&mut store, 0, 3);
        let later = mk(&mut store, 4, 5);
        assert_eq!(store.sorted_fss(view, idx), vec![long_one, short_one, later]);
        assert!(store.is_indexed(view, later));
        store.unindex_fs(view, later);
        assert!(!store.is_indexed(view, later));
        assert_eq!(store.sorted_fss(view, idx), vec![long_one, short_one]);
    }

    #[test]
    fn test_journal_records_premark_mods_only() {
        let (mut store, tok) = token_store();
        let old = store.create_fs(tok);
        let _marker = store.mark();
        let new = store.create_fs(tok);
        store.set_int_value(old, 1, 7);
        store.set_int_value(new, 1, 8);
        let mods = store.mods().unwrap();
        assert!(mods.contains_key(&old));
        assert!(!mods.contains_key(&new));
        assert!(mods[&old].fields.contains(&1));
    }

    #[test]
    fn test_marker_staleness() {
        let (mut store, _) = token_store();
        let marker = store.mark();
        assert!(store.check_marker(&marker).is_ok());
        store.reset();
        assert!(matches!(
            store.check_marker(&marker),
            Err(EncodeError::StaleMark)
        ));
    }
}
