//! Serialization sessions: full and delta.
//!
//! A session is strictly sequential: reachability and numbering first (so
//! reference diffing sees final sequence numbers), then string
//! optimization (so every string is classified before any is emitted),
//! then the object walk in ascending identity order, the index section,
//! the delta modification section, and finally compression and framing.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::codec::primitives::{Writer, encode_int_sign};
use crate::codec::reach::{self, ReuseInfo, SeqMap};
use crate::codec::slots::SlotKind;
use crate::codec::streams::StreamSet;
use crate::codec::strings::StringOptimizer;
use crate::codec::value;
use crate::error::EncodeError;
use crate::limits::{FLAG_DELTA, FLAG_EMBEDDED_SCHEMA, FORMAT_VERSION, MAGIC};
use crate::store::{FsData, FsId, Marker, Slot, Store};
use crate::types::{Range, TypeCode, TypeMapper, TypeSystem};

/// Options for serialization.
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
    /// Serialize through this schema instead of the store's own: objects
    /// and features without a name counterpart in it are filtered out.
    pub target: Option<Arc<TypeSystem>>,
    /// Embed a self-describing dump of the wire schema.
    pub embed_schema: bool,
    /// zstd level for the sub-stream blocks (0 = zstd default).
    pub level: i32,
    /// Replay a previous session's reachability instead of re-walking.
    /// The graph must be unmodified since that session.
    pub reuse: Option<ReuseInfo>,
}

impl SerializeOptions {
    /// Default options: the store's own schema, no embedding, level 3.
    pub fn new() -> Self {
        Self {
            level: 3,
            ..Self::default()
        }
    }
}

/// Result of a serialization: the blob plus the session snapshot that a
/// later delta operation (or a re-serialization to another target) can
/// replay.
#[derive(Debug)]
pub struct SerializeOutput {
    pub bytes: Vec<u8>,
    pub reuse: ReuseInfo,
}

/// Serializes the reachable graph of `store`.
pub fn serialize(store: &Store, options: &SerializeOptions) -> Result<SerializeOutput, EncodeError> {
    Session::full(store, options)?.run()
}

/// Serializes only what changed since `marker`: objects created after it,
/// index changes, and journaled mutations of pre-mark objects.
///
/// `baseline` must be the [`ReuseInfo`] captured when the graph was last
/// fully serialized (or deserialized): pre-mark sequence numbers are
/// resolved against it on both sides of the wire.
pub fn serialize_delta(
    store: &Store,
    marker: &Marker,
    baseline: &ReuseInfo,
    options: &SerializeOptions,
) -> Result<SerializeOutput, EncodeError> {
    Session::delta(store, marker, baseline, options)?.run()
}

/// Like [`serialize`], printing stage timings to stderr.
pub fn serialize_profiled(
    store: &Store,
    options: &SerializeOptions,
) -> Result<SerializeOutput, EncodeError> {
    use std::time::Instant;
    let t0 = Instant::now();
    let session = Session::full(store, options)?;
    let t1 = Instant::now();
    let out = session.run()?;
    let t2 = Instant::now();
    eprintln!("=== Serialize Profile ===");
    eprintln!("  reachability + numbering: {:?}", t1.duration_since(t0));
    eprintln!("  emit + compress: {:?}", t2.duration_since(t1));
    eprintln!("  TOTAL: {:?} for {} bytes", t2.duration_since(t0), out.bytes.len());
    Ok(out)
}

/// Per-(target type, feature) predecessor cache, arena-sized from the wire
/// schema at session start. One extra slot per type holds the previous
/// same-type array's first element.
pub(crate) struct PrevCache {
    slots: Vec<Box<[i64]>>,
    array_first: Box<[i64]>,
}

impl PrevCache {
    pub(crate) fn new(ts: &TypeSystem) -> PrevCache {
        let slots = (0..ts.num_codes())
            .map(|c| vec![0i64; ts.features(c as TypeCode).len()].into_boxed_slice())
            .collect();
        PrevCache {
            slots,
            array_first: vec![0i64; ts.num_codes()].into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn get(&self, t: TypeCode, feat: u16) -> i64 {
        self.slots[t as usize][feat as usize]
    }

    #[inline]
    pub(crate) fn set(&mut self, t: TypeCode, feat: u16, v: i64) {
        self.slots[t as usize][feat as usize] = v;
    }

    #[inline]
    pub(crate) fn array_first(&self, t: TypeCode) -> i64 {
        self.array_first[t as usize]
    }

    #[inline]
    pub(crate) fn set_array_first(&mut self, t: TypeCode, v: i64) {
        self.array_first[t as usize] = v;
    }
}

/// Running predecessors of the delta modification section.
#[derive(Debug, Default)]
pub(crate) struct ModPrevs {
    pub(crate) int: i32,
    pub(crate) short: i32,
    pub(crate) heap_ref: i32,
    pub(crate) long: i64,
}

struct DeltaCtx<'a> {
    marker: &'a Marker,
    /// Currently reachable set (mods of unreachable objects are dropped).
    found_set: FxHashSet<FsId>,
}

struct Session<'a> {
    store: &'a Store,
    src: &'a Arc<TypeSystem>,
    tgt: Arc<TypeSystem>,
    mapper: Option<Arc<TypeMapper>>,
    options: &'a SerializeOptions,
    found: Vec<FsId>,
    seq: SeqMap,
    streams: StreamSet,
    os: StringOptimizer<'a>,
    prev: PrevCache,
    delta: Option<DeltaCtx<'a>>,
}

impl<'a> Session<'a> {
    fn full(store: &'a Store, options: &'a SerializeOptions) -> Result<Session<'a>, EncodeError> {
        let src = store.type_system();
        let (tgt, mapper) = match &options.target {
            Some(t) if t.uid() != src.uid() => (Arc::clone(t), Some(src.mapper_to(t)?)),
            _ => (Arc::clone(src), None),
        };
        let found = match &options.reuse {
            Some(r) => r.found.as_ref().clone(),
            None => reach::find_reachable(store),
        };
        let seq = reach::build_seq_map(store, &found, mapper.as_deref());
        let prev = PrevCache::new(&tgt);
        Ok(Session {
            store,
            src,
            tgt,
            mapper,
            options,
            found,
            seq,
            streams: StreamSet::new(),
            os: StringOptimizer::new(),
            prev,
            delta: None,
        })
    }

    fn delta(
        store: &'a Store,
        marker: &'a Marker,
        baseline: &'a ReuseInfo,
        options: &'a SerializeOptions,
    ) -> Result<Session<'a>, EncodeError> {
        store.check_marker(marker)?;
        if let Some(t) = &options.target {
            if t.uid() != store.type_system().uid() {
                return Err(EncodeError::DeltaWithTarget);
            }
        }
        let src = store.type_system();
        let found = reach::find_reachable(store);
        let found_set: FxHashSet<FsId> = found.iter().copied().collect();
        let seq = reach::extend_seq_map(&baseline.map, &found, marker.next_fs_id);
        let prev = PrevCache::new(src);
        Ok(Session {
            store,
            src,
            tgt: Arc::clone(src),
            mapper: None,
            options,
            found,
            seq,
            streams: StreamSet::new(),
            os: StringOptimizer::new(),
            prev,
            delta: Some(DeltaCtx { marker, found_set }),
        })
    }

    fn is_delta(&self) -> bool {
        self.delta.is_some()
    }

    /// Ids whose values are emitted this session (for delta: new ones only).
    fn emitted_ids(&self) -> impl Iterator<Item = FsId> + '_ {
        let cutoff = self.delta.as_ref().map_or(0, |d| d.marker.next_fs_id);
        self.found.iter().copied().filter(move |id| id.get() >= cutoff)
    }

    fn run(mut self) -> Result<SerializeOutput, EncodeError> {
        // Strings first: every value to be emitted is submitted, then the
        // optimizer lays out the shared blobs.
        self.collect_strings();
        self.os.optimize()?;

        let mut header = Writer::with_capacity(256);
        header.write_bytes(MAGIC);
        header.write_byte(FORMAT_VERSION);
        let mut flags = 0u8;
        if self.is_delta() {
            flags |= FLAG_DELTA;
        }
        if self.options.embed_schema {
            flags |= FLAG_EMBEDDED_SCHEMA;
        }
        header.write_byte(flags);
        if self.options.embed_schema {
            write_schema(&mut header, &self.tgt);
        }

        self.write_string_blobs();
        self.write_objects()?;
        self.write_index_section();
        if self.is_delta() {
            self.write_modifications()?;
        }

        self.streams.finish_into(&mut header, self.options.level)?;

        let reuse = ReuseInfo {
            found: Arc::new(self.found),
            map: Arc::new(self.seq),
        };
        Ok(SerializeOutput {
            bytes: header.into_bytes(),
            reuse,
        })
    }

    // =========================================================================
    // STRING PRE-PASS
    // =========================================================================

    fn collect_strings(&mut self) {
        let emitted: Vec<FsId> = self.emitted_ids().collect();
        for id in emitted {
            if !self.included(id) {
                continue;
            }
            self.collect_strings_of(id, None);
        }
        // Delta: strings written into pre-mark objects since the mark.
        let from_mods: Vec<(FsId, Vec<u16>, Vec<u32>)> = match (&self.delta, self.store.mods()) {
            (Some(delta), Some(mods)) => mods
                .iter()
                .filter(|(id, _)| delta.found_set.contains(id))
                .map(|(&id, record)| {
                    (
                        id,
                        record.fields.iter().copied().collect(),
                        record.elements.iter().copied().collect(),
                    )
                })
                .collect(),
            _ => Vec::new(),
        };
        for (id, fields, elements) in from_mods {
            self.collect_strings_of(id, Some((&fields, &elements)));
        }
    }

    /// Submits the string values of one object; `only` restricts to
    /// journaled slots (delta modification pre-pass).
    fn collect_strings_of(&mut self, id: FsId, only: Option<(&[u16], &[u32])>) {
        let store: &'a Store = self.store;
        match &store.fs(id).data {
            FsData::Record(slots) => {
                let feats: Vec<u16> = match only {
                    Some((fields, _)) => fields.to_vec(),
                    // only features surviving the target mapping
                    None => match &self.mapper {
                        Some(m) => m
                            .tgt_feats_in_src(store.type_of(id))
                            .iter()
                            .flatten()
                            .copied()
                            .collect(),
                        None => (0..slots.len() as u16).collect(),
                    },
                };
                for f in feats {
                    if let Slot::Str(Some(s)) = &slots[f as usize] {
                        self.os.add(s);
                    }
                }
            }
            FsData::Strings(elems) => match only {
                Some((_, elements)) => {
                    for &i in elements {
                        if let Some(Some(s)) = elems.get(i as usize) {
                            self.os.add(s);
                        }
                    }
                }
                None => {
                    for s in elems.iter().flatten() {
                        self.os.add(s);
                    }
                }
            },
            _ => {}
        }
    }

    fn write_string_blobs(&mut self) {
        let blobs = self.os.blobs();
        self.streams
            .write_varint(SlotKind::Control, blobs.len() as u64);
        let chars = self.streams.writer(SlotKind::StrChars);
        for blob in blobs {
            chars.write_string(blob);
        }
    }

    // =========================================================================
    // OBJECT WALK
    // =========================================================================

    fn included(&self, id: FsId) -> bool {
        self.seq.seq_of(id).unwrap_or(0) != 0
    }

    fn write_objects(&mut self) -> Result<(), EncodeError> {
        let emitted: Vec<FsId> = self.emitted_ids().filter(|&id| self.included(id)).collect();
        self.streams
            .write_varint(SlotKind::Control, emitted.len() as u64);
        for id in emitted {
            self.write_object(id)?;
        }
        Ok(())
    }

    fn write_object(&mut self, id: FsId) -> Result<(), EncodeError> {
        let src_code = self.store.type_of(id);
        let tgt_code = match &self.mapper {
            Some(m) => m.map_src_to_tgt(src_code),
            None => src_code,
        };
        debug_assert_ne!(tgt_code, 0);
        self.streams
            .write_varint(SlotKind::TypeCode, tgt_code as u64);

        if let Some(element) = self.tgt.type_info(tgt_code).array {
            self.write_array(id, tgt_code, element)?;
        } else {
            self.write_record(id, src_code, tgt_code)?;
        }
        Ok(())
    }

    fn write_record(
        &mut self,
        id: FsId,
        src_code: TypeCode,
        tgt_code: TypeCode,
    ) -> Result<(), EncodeError> {
        let n_tgt_feats = self.tgt.features(tgt_code).len();
        for tgt_feat in 0..n_tgt_feats as u16 {
            let src_feat = match &self.mapper {
                Some(m) => match m.tgt_feats_in_src(src_code)[tgt_feat as usize] {
                    Some(f) => f,
                    // encoding to a target claiming features the source
                    // lacks is a filtering error (decode tolerates it)
                    None => {
                        return Err(EncodeError::FeatureMissingInSource {
                            type_name: self.tgt.name_of(tgt_code).to_string(),
                            feature: self.tgt.features(tgt_code)[tgt_feat as usize].name.clone(),
                        });
                    }
                },
                None => tgt_feat,
            };
            self.write_slot(id, src_feat, tgt_code, tgt_feat)?;
        }
        Ok(())
    }

    fn write_slot(
        &mut self,
        id: FsId,
        src_feat: u16,
        tgt_code: TypeCode,
        tgt_feat: u16,
    ) -> Result<(), EncodeError> {
        match self.tgt.type_info(tgt_code).slot_kinds[tgt_feat as usize] {
            SlotKind::Int => {
                let v = self.store.int_value(id, src_feat);
                self.write_diff_cached(SlotKind::Int, tgt_code, tgt_feat, v);
            }
            SlotKind::Short => {
                let v = self.store.short_value(id, src_feat) as i32;
                self.write_diff_cached(SlotKind::Short, tgt_code, tgt_feat, v);
            }
            SlotKind::Byte => {
                let v = self.store.byte_value(id, src_feat);
                self.streams.writer(SlotKind::Byte).write_byte(v);
            }
            SlotKind::Boolean => {
                let v = self.store.boolean_value(id, src_feat);
                self.streams.writer(SlotKind::Byte).write_byte(v as u8);
            }
            SlotKind::Float => {
                let raw = self.store.float_value(id, src_feat).to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                value::write_float(exp, mant, raw);
            }
            SlotKind::DoubleRef => {
                let raw = self.store.double_value(id, src_feat).to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                value::write_double(exp, mant, raw);
            }
            SlotKind::LongRef => {
                let v = self.store.long_value(id, src_feat);
                let prev = self.prev.get(tgt_code, tgt_feat);
                let (hi, lo) = self
                    .streams
                    .writer_pair(SlotKind::LongHigh, SlotKind::LongLow);
                value::write_long(hi, lo, v, prev);
                self.prev.set(tgt_code, tgt_feat, v);
            }
            SlotKind::StrRef => {
                let s = self.store.string_value(id, src_feat).map(str::to_string);
                self.write_string_value(s.as_deref())?;
            }
            SlotKind::HeapRef => {
                let seq = self.ref_seq(self.store.ref_value(id, src_feat));
                self.write_diff_cached(SlotKind::HeapRef, tgt_code, tgt_feat, seq);
            }
            kind => unreachable!("{kind:?} is not a record slot kind"),
        }
        Ok(())
    }

    fn write_array(
        &mut self,
        id: FsId,
        tgt_code: TypeCode,
        element: Range,
    ) -> Result<(), EncodeError> {
        let len = self.store.array_len(id);
        self.streams
            .write_varint(SlotKind::ArrayLength, len as u64);
        if len == 0 {
            return Ok(());
        }
        match element {
            Range::Int => {
                let elems = self.store.int_array(id).to_vec();
                self.write_diffed_elements(SlotKind::Int, tgt_code, &elems);
            }
            Range::Ref => {
                let elems: Vec<i32> = self
                    .store
                    .ref_array(id)
                    .iter()
                    .map(|r| self.ref_seq(*r))
                    .collect();
                self.write_diffed_elements(SlotKind::HeapRef, tgt_code, &elems);
            }
            Range::Float => {
                let elems = self.store.float_array(id).to_vec();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                for v in elems {
                    value::write_float(exp, mant, v.to_bits());
                }
            }
            Range::String => {
                let elems: Vec<Option<String>> = self.store.string_array(id).to_vec();
                for s in &elems {
                    self.write_string_value(s.as_deref())?;
                }
            }
            Range::Boolean => {
                let w = self.streams.writer(SlotKind::Byte);
                for &v in self.store.boolean_array(id) {
                    w.write_byte(v as u8);
                }
            }
            Range::Byte => {
                let bytes = self.store.byte_array(id);
                self.streams.writer(SlotKind::Byte).write_bytes(bytes);
            }
            Range::Short => {
                let elems = self.store.short_array(id).to_vec();
                let w = self.streams.writer(SlotKind::Short);
                let mut prev = 0i32;
                for v in elems {
                    value::write_diff(w, v as i32, prev);
                    prev = v as i32;
                }
            }
            Range::Long => {
                let elems = self.store.long_array(id).to_vec();
                let (hi, lo) = self
                    .streams
                    .writer_pair(SlotKind::LongHigh, SlotKind::LongLow);
                let mut prev = 0i64;
                for v in elems {
                    value::write_long(hi, lo, v, prev);
                    prev = v;
                }
            }
            Range::Double => {
                let elems = self.store.double_array(id).to_vec();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                for v in elems {
                    value::write_double(exp, mant, v.to_bits());
                }
            }
        }
        Ok(())
    }

    /// Inline-stored elements diff against the running previous element;
    /// the first diffs against the previous same-type array's first.
    fn write_diffed_elements(&mut self, kind: SlotKind, tgt_code: TypeCode, elems: &[i32]) {
        let mut prev = self.prev.array_first(tgt_code) as i32;
        let w = self.streams.writer(kind);
        for &v in elems {
            value::write_diff(w, v, prev);
            if value::updates_prev(v) {
                prev = v;
            }
        }
        if value::updates_prev(elems[0]) {
            self.prev.set_array_first(tgt_code, elems[0] as i64);
        }
    }

    fn write_diff_cached(&mut self, kind: SlotKind, tgt_code: TypeCode, tgt_feat: u16, v: i32) {
        let prev = self.prev.get(tgt_code, tgt_feat) as i32;
        value::write_diff(self.streams.writer(kind), v, prev);
        if value::updates_prev(v) {
            self.prev.set(tgt_code, tgt_feat, v as i64);
        }
    }

    fn ref_seq(&self, r: Option<FsId>) -> i32 {
        match r {
            // an unmapped referent (filtered type, or unknown to a delta
            // baseline) encodes as null
            Some(id) => self.seq.seq_of(id).unwrap_or(0) as i32,
            None => 0,
        }
    }

    fn write_string_value(&mut self, s: Option<&str>) -> Result<(), EncodeError> {
        let Some(s) = s else {
            self.streams.write_varint(SlotKind::StrLength, 0);
            return Ok(());
        };
        let v = self.os.index_or_seq(s);
        if v < 0 {
            self.streams
                .write_varint(SlotKind::StrLength, encode_int_sign(v));
            return Ok(());
        }
        if s.is_empty() {
            self.streams
                .write_varint(SlotKind::StrLength, encode_int_sign(1));
            return Ok(());
        }
        if s.len() >= i32::MAX as usize {
            return Err(EncodeError::StringTooLong { len: s.len() });
        }
        let offset = self.os.offset(v);
        self.streams
            .write_varint(SlotKind::StrOffset, offset as u64);
        self.streams.write_varint(
            SlotKind::StrLength,
            encode_int_sign(s.len() as i64 + 1),
        );
        if self.os.blobs().len() > 1 {
            self.streams
                .write_varint(SlotKind::StrSeg, self.os.blob_index(v) as u64);
        }
        Ok(())
    }

    // =========================================================================
    // INDEX SECTION
    // =========================================================================

    fn write_index_section(&mut self) {
        let store: &'a Store = self.store;
        let views = store.view_count();
        self.streams.write_varint(SlotKind::Control, views as u64);
        self.streams.write_varint(SlotKind::Control, views as u64); // sofa count
        for v in 0..views {
            let sofa_seq = self.seq.seq_of(store.view_sofa(v)).unwrap_or(0);
            self.streams
                .write_varint(SlotKind::Control, sofa_seq as u64);
        }
        for v in 0..views {
            let lists: Vec<Vec<FsId>> = match &self.delta {
                Some(delta) => {
                    let sofa = store.view_sofa(v);
                    let snapshot = delta
                        .marker
                        .view_snapshot
                        .iter()
                        .find(|(s, _)| *s == sofa)
                        .map(|(_, set)| set.clone())
                        .unwrap_or_default();
                    let current: FxHashSet<FsId> = store.indexed_fss(v).collect();
                    let mods = store.mods();
                    let mut added = Vec::new();
                    let mut reindexed = Vec::new();
                    for &id in &current {
                        if !snapshot.contains(&id) {
                            added.push(id);
                        } else if mods.is_some_and(|m| m.contains_key(&id)) {
                            reindexed.push(id);
                        }
                    }
                    let removed: Vec<FsId> = snapshot
                        .iter()
                        .copied()
                        .filter(|id| !current.contains(id))
                        .collect();
                    vec![added, removed, reindexed]
                }
                None => vec![store.indexed_fss(v).collect()],
            };
            for list in lists {
                self.write_fs_list(&list);
            }
        }
    }

    /// One count-prefixed, ascending, delta-encoded sequence-number list.
    fn write_fs_list(&mut self, ids: &[FsId]) {
        let mut seqs: Vec<u32> = ids
            .iter()
            .filter_map(|id| self.seq.seq_of(*id))
            .filter(|&s| s != 0)
            .collect();
        seqs.sort_unstable();
        self.streams
            .write_varint(SlotKind::Control, seqs.len() as u64);
        let w = self.streams.writer(SlotKind::FsIndexes);
        let mut prev = 0u32;
        for s in seqs {
            w.write_varint((s - prev) as u64);
            prev = s;
        }
    }

    // =========================================================================
    // DELTA MODIFICATION SECTION
    // =========================================================================

    fn write_modifications(&mut self) -> Result<(), EncodeError> {
        let store: &'a Store = self.store;
        let mut entries: Vec<(u32, FsId)> = Vec::new();
        {
            let delta = self.delta.as_ref().expect("delta session");
            let cutoff = delta.marker.next_fs_id;
            if let Some(mods) = store.mods() {
                for &id in mods.keys() {
                    if id.get() >= cutoff || !delta.found_set.contains(&id) {
                        continue;
                    }
                    // pre-mark object never serialized at the baseline:
                    // nothing on the other side to patch
                    let Some(seq) = self.seq.seq_of(id).filter(|&s| s != 0) else {
                        continue;
                    };
                    entries.push((seq, id));
                }
            }
        }
        entries.sort_unstable();

        self.streams
            .write_varint(SlotKind::Control, entries.len() as u64);
        let mut prevs = ModPrevs::default();
        let mut prev_seq = 0i32;
        for (seq, id) in entries {
            value::write_diff(
                self.streams.writer(SlotKind::FsIndexes),
                seq as i32,
                prev_seq,
            );
            prev_seq = seq as i32;
            self.write_object_mods(id, &mut prevs)?;
        }
        Ok(())
    }

    fn write_object_mods(&mut self, id: FsId, prevs: &mut ModPrevs) -> Result<(), EncodeError> {
        let store: &'a Store = self.store;
        let record = store.mods().expect("journal active")[&id].clone();
        let type_code = store.type_of(id);
        match self.src.type_info(type_code).array {
            None => {
                let fields: Vec<u16> = record.fields.iter().copied().collect();
                self.streams
                    .write_varint(SlotKind::FsIndexes, fields.len() as u64);
                let mut prev_offset = 0u16;
                for f in fields {
                    self.streams
                        .write_varint(SlotKind::FsIndexes, (f - prev_offset) as u64);
                    prev_offset = f;
                    self.write_mod_field(id, type_code, f, prevs)?;
                }
            }
            Some(element) => {
                let elements: Vec<u32> = record.elements.iter().copied().collect();
                self.streams
                    .write_varint(SlotKind::FsIndexes, elements.len() as u64);
                let mut prev_idx = 0u32;
                for i in elements {
                    self.streams
                        .write_varint(SlotKind::FsIndexes, (i - prev_idx) as u64);
                    prev_idx = i;
                    self.write_mod_element(id, element, i as usize, prevs)?;
                }
            }
        }
        Ok(())
    }

    fn write_mod_field(
        &mut self,
        id: FsId,
        type_code: TypeCode,
        feat: u16,
        prevs: &mut ModPrevs,
    ) -> Result<(), EncodeError> {
        match self.src.type_info(type_code).slot_kinds[feat as usize] {
            SlotKind::Int => {
                let v = self.store.int_value(id, feat);
                value::write_diff(self.streams.writer(SlotKind::Int), v, prevs.int);
                if value::updates_prev(v) {
                    prevs.int = v;
                }
            }
            SlotKind::Short => {
                let v = self.store.short_value(id, feat) as i32;
                value::write_diff(self.streams.writer(SlotKind::Short), v, prevs.short);
                if value::updates_prev(v) {
                    prevs.short = v;
                }
            }
            SlotKind::HeapRef => {
                let seq = self.ref_seq(self.store.ref_value(id, feat));
                value::write_diff(self.streams.writer(SlotKind::HeapRef), seq, prevs.heap_ref);
                if value::updates_prev(seq) {
                    prevs.heap_ref = seq;
                }
            }
            SlotKind::LongRef => {
                let v = self.store.long_value(id, feat);
                let (hi, lo) = self
                    .streams
                    .writer_pair(SlotKind::LongHigh, SlotKind::LongLow);
                value::write_long(hi, lo, v, prevs.long);
                prevs.long = v;
            }
            SlotKind::Byte => {
                let v = self.store.byte_value(id, feat);
                self.streams.writer(SlotKind::Byte).write_byte(v);
            }
            SlotKind::Boolean => {
                let v = self.store.boolean_value(id, feat);
                self.streams.writer(SlotKind::Byte).write_byte(v as u8);
            }
            SlotKind::Float => {
                let raw = self.store.float_value(id, feat).to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                value::write_float(exp, mant, raw);
            }
            SlotKind::DoubleRef => {
                let raw = self.store.double_value(id, feat).to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                value::write_double(exp, mant, raw);
            }
            SlotKind::StrRef => {
                let s = self.store.string_value(id, feat).map(str::to_string);
                self.write_string_value(s.as_deref())?;
            }
            kind => unreachable!("{kind:?} is not a record slot kind"),
        }
        Ok(())
    }

    fn write_mod_element(
        &mut self,
        id: FsId,
        element: Range,
        idx: usize,
        prevs: &mut ModPrevs,
    ) -> Result<(), EncodeError> {
        match element {
            Range::Int => {
                let v = self.store.int_array(id)[idx];
                value::write_diff(self.streams.writer(SlotKind::Int), v, prevs.int);
                if value::updates_prev(v) {
                    prevs.int = v;
                }
            }
            Range::Short => {
                let v = self.store.short_array(id)[idx] as i32;
                value::write_diff(self.streams.writer(SlotKind::Short), v, prevs.short);
                if value::updates_prev(v) {
                    prevs.short = v;
                }
            }
            Range::Ref => {
                let seq = self.ref_seq(self.store.ref_array(id)[idx]);
                value::write_diff(self.streams.writer(SlotKind::HeapRef), seq, prevs.heap_ref);
                if value::updates_prev(seq) {
                    prevs.heap_ref = seq;
                }
            }
            Range::Long => {
                let v = self.store.long_array(id)[idx];
                let (hi, lo) = self
                    .streams
                    .writer_pair(SlotKind::LongHigh, SlotKind::LongLow);
                value::write_long(hi, lo, v, prevs.long);
                prevs.long = v;
            }
            Range::Byte => {
                let v = self.store.byte_array(id)[idx];
                self.streams.writer(SlotKind::Byte).write_byte(v);
            }
            Range::Boolean => {
                let v = self.store.boolean_array(id)[idx];
                self.streams.writer(SlotKind::Byte).write_byte(v as u8);
            }
            Range::Float => {
                let raw = self.store.float_array(id)[idx].to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                value::write_float(exp, mant, raw);
            }
            Range::Double => {
                let raw = self.store.double_array(id)[idx].to_bits();
                let (exp, mant) = self
                    .streams
                    .writer_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                value::write_double(exp, mant, raw);
            }
            Range::String => {
                let s = self.store.string_array(id)[idx].clone();
                self.write_string_value(s.as_deref())?;
            }
        }
        Ok(())
    }
}

/// Writes the self-describing schema section: the user types of the wire
/// schema, in code order (builtins are implied).
pub(crate) fn write_schema(w: &mut Writer, ts: &TypeSystem) {
    let user: Vec<TypeCode> = ts.user_types().collect();
    w.write_varint(user.len() as u64);
    for code in user {
        w.write_string(ts.name_of(code));
        w.write_varint(ts.supertype(code) as u64);
        // own features only: inherited ones re-flatten on decode
        let inherited = ts.features(ts.supertype(code)).len();
        let own = &ts.features(code)[inherited..];
        w.write_varint(own.len() as u64);
        for f in own {
            w.write_string(&f.name);
            w.write_byte(f.range as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::primitives::Reader;
    use crate::codec::streams::DecodedStreams;
    use crate::types::{TYPE_TOP, TypeSystemBuilder};

    fn int_field_store(n: i32) -> Store {
        let mut b = TypeSystemBuilder::new();
        let t = b.add_type("Counter", TYPE_TOP).unwrap();
        b.add_feature(t, "value", Range::Int).unwrap();
        let ts = b.commit().unwrap();
        let mut store = Store::new(&ts);
        let view = store.create_view("_InitialView");
        for i in 0..n {
            let fs = store.create_fs(t);
            store.set_int_value(fs, 0, i);
            store.index_fs(view, fs);
        }
        store
    }

    fn parse_streams(bytes: &[u8]) -> DecodedStreams {
        let mut r = Reader::new(bytes);
        r.read_bytes(6, "header").unwrap(); // magic + version + flags
        DecodedStreams::parse(&mut r).unwrap()
    }

    #[test]
    fn test_ascending_ints_use_one_byte_forms() {
        // 0..999: the first is the literal zero, the second the absolute
        // form (its predecessor stayed 0), the rest the delta form; all
        // are single bytes. Plus one byte for the sofa's own int feature.
        let store = int_field_store(1000);
        let out = serialize(&store, &SerializeOptions::new()).unwrap();
        let streams = parse_streams(&out.bytes);
        assert_eq!(streams.lens[SlotKind::Int.stream_id() as usize], 1001);
    }

    #[test]
    fn test_grouped_streams_beat_record_interleaving() {
        // the type-code stream is maximally repetitive: 1000 identical
        // varints must compress to a tiny block
        let store = int_field_store(1000);
        let out = serialize(&store, &SerializeOptions::new()).unwrap();
        let streams = parse_streams(&out.bytes);
        let tc = SlotKind::TypeCode.stream_id() as usize;
        assert_eq!(streams.lens[tc], 1001); // one byte per object
        assert!(out.bytes.len() < 1500, "blob was {} bytes", out.bytes.len());
    }

    #[test]
    fn test_reuse_replay_is_identical() {
        let store = int_field_store(50);
        let first = serialize(&store, &SerializeOptions::new()).unwrap();
        let mut options = SerializeOptions::new();
        options.reuse = Some(first.reuse.clone());
        let second = serialize(&store, &options).unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn test_encode_to_superset_target_fails() {
        let mut b = TypeSystemBuilder::new();
        let t = b.add_type("Thing", TYPE_TOP).unwrap();
        b.add_feature(t, "x", Range::Int).unwrap();
        let src = b.commit().unwrap();

        let mut b = TypeSystemBuilder::new();
        let t2 = b.add_type("Thing", TYPE_TOP).unwrap();
        b.add_feature(t2, "x", Range::Int).unwrap();
        b.add_feature(t2, "y", Range::Int).unwrap();
        let tgt = b.commit().unwrap();

        let mut store = Store::new(&src);
        let view = store.create_view("_InitialView");
        let fs = store.create_fs(t);
        store.index_fs(view, fs);

        let mut options = SerializeOptions::new();
        options.target = Some(tgt);
        assert!(matches!(
            serialize(&store, &options),
            Err(EncodeError::FeatureMissingInSource { .. })
        ));
    }

    #[test]
    fn test_foreign_and_stale_marks_rejected() {
        let mut store = int_field_store(3);
        let mut other = int_field_store(3);
        let foreign = other.mark();
        let base = serialize(&store, &SerializeOptions::new()).unwrap();
        assert!(matches!(
            serialize_delta(&store, &foreign, &base.reuse, &SerializeOptions::new()),
            Err(EncodeError::ForeignMark)
        ));

        let marker = store.mark();
        store.reset();
        assert!(matches!(
            serialize_delta(&store, &marker, &base.reuse, &SerializeOptions::new()),
            Err(EncodeError::StaleMark)
        ));
    }

    #[test]
    fn test_delta_cannot_retarget() {
        let mut store = int_field_store(3);
        let base = serialize(&store, &SerializeOptions::new()).unwrap();
        let marker = store.mark();
        let mut b = TypeSystemBuilder::new();
        b.add_type("Counter", TYPE_TOP).unwrap();
        let other = b.commit().unwrap();
        let mut options = SerializeOptions::new();
        options.target = Some(other);
        assert!(matches!(
            serialize_delta(&store, &marker, &base.reuse, &options),
            Err(EncodeError::DeltaWithTarget)
        ));
    }

    #[test]
    fn test_filtered_type_consumes_no_sequence_number() {
        let mut b = TypeSystemBuilder::new();
        let keep = b.add_type("Keep", TYPE_TOP).unwrap();
        b.add_feature(keep, "other", Range::Ref).unwrap();
        let drop = b.add_type("Drop", TYPE_TOP).unwrap();
        let src = b.commit().unwrap();

        let mut b = TypeSystemBuilder::new();
        let k2 = b.add_type("Keep", TYPE_TOP).unwrap();
        b.add_feature(k2, "other", Range::Ref).unwrap();
        let tgt = b.commit().unwrap();

        let mut store = Store::new(&src);
        let view = store.create_view("_InitialView");
        let dropped = store.create_fs(drop);
        let kept = store.create_fs(keep);
        store.set_ref_value(kept, 0, Some(dropped));
        store.index_fs(view, dropped);
        store.index_fs(view, kept);

        let mut options = SerializeOptions::new();
        options.target = Some(Arc::clone(&tgt));
        let out = serialize(&store, &options).unwrap();
        // sofa then kept; the dropped object maps to sequence 0
        assert_eq!(out.reuse.map.seq_of(dropped), Some(0));
        assert_eq!(out.reuse.map.seq_of(kept), Some(2));
        let streams = parse_streams(&out.bytes);
        let mut readers = streams.readers();
        // control: blob count, then object count = 2 (sofa + kept)
        let _ = readers.read_varint(SlotKind::Control, "blobs").unwrap();
        assert_eq!(readers.read_varint(SlotKind::Control, "objects").unwrap(), 2);
    }
}
