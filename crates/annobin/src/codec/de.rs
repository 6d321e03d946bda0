//! Deserialization sessions: full and delta.
//!
//! Decoding runs object by object in sequence order, with one read cursor
//! per slot kind. Each object's values are buffered first and the object
//! is constructed complete (the staged-builder discipline: identity
//! fields are never patched after construction). References to sequence
//! numbers not yet materialized become explicit fixups, flushed once every
//! object exists.

use std::sync::Arc;

use crate::codec::primitives::{Reader, decode_int_sign};
use crate::codec::reach::{ReuseInfo, SeqMap};
use crate::codec::slots::SlotKind;
use crate::codec::ser::{ModPrevs, PrevCache};
use crate::codec::streams::{DecodedStreams, StreamReaders};
use crate::codec::value;
use crate::error::DecodeError;
use crate::limits::{
    FLAG_DELTA, FLAG_EMBEDDED_SCHEMA, FORMAT_VERSION, MAGIC, MAX_ARRAY_LEN, MAX_BLOBS,
    MAX_BLOB_LEN, MAX_NAME_LEN, MAX_OBJECTS, MAX_SCHEMA_FEATURES, MAX_SCHEMA_TYPES,
    MAX_VIEWS, MIN_FORMAT_VERSION,
};
use crate::store::{FsData, FsId, Slot, Store};
use crate::types::{Range, TYPE_SOFA, TypeCode, TypeMapper, TypeSystem, TypeSystemBuilder};

/// Options for deserialization.
#[derive(Debug, Clone, Default)]
pub struct DeserializeOptions {
    /// The schema the blob was encoded against. Defaults to the store's
    /// own schema; ignored when the blob embeds one.
    pub schema: Option<Arc<TypeSystem>>,
    /// For delta blobs: the [`ReuseInfo`] captured when this store last
    /// exchanged the full graph.
    pub delta_base: Option<ReuseInfo>,
}

/// Reads the schema a self-describing blob embeds, without decoding the
/// graph. Returns `None` for blobs that rely on out-of-band agreement.
pub fn embedded_schema(bytes: &[u8]) -> Result<Option<Arc<TypeSystem>>, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.read_bytes(4, "magic")?;
    if magic != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::InvalidMagic { found });
    }
    let version = r.read_byte("version")?;
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    let flags = r.read_byte("flags")?;
    if flags & FLAG_EMBEDDED_SCHEMA == 0 {
        return Ok(None);
    }
    read_schema(&mut r).map(Some)
}

/// Decodes a blob into `store`.
///
/// A full blob replaces the store's content (the store is reset first); a
/// delta blob appends new objects and patches journaled modifications into
/// existing ones. On error the destination is unusable and must be
/// discarded by the caller.
///
/// Returns the session's [`ReuseInfo`], the baseline for a later delta
/// decode against this store.
pub fn deserialize(
    store: &mut Store,
    bytes: &[u8],
    options: &DeserializeOptions,
) -> Result<ReuseInfo, DecodeError> {
    let mut r = Reader::new(bytes);
    let magic = r.read_bytes(4, "magic")?;
    if magic != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::InvalidMagic { found });
    }
    let version = r.read_byte("version")?;
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    let flags = r.read_byte("flags")?;
    if flags & !(FLAG_DELTA | FLAG_EMBEDDED_SCHEMA) != 0 {
        return Err(DecodeError::UnknownFlags { flags });
    }
    let is_delta = flags & FLAG_DELTA != 0;

    let wire: Arc<TypeSystem> = if flags & FLAG_EMBEDDED_SCHEMA != 0 {
        read_schema(&mut r)?
    } else {
        match &options.schema {
            Some(ts) => Arc::clone(ts),
            None => Arc::clone(store.type_system()),
        }
    };

    let baseline = match (is_delta, &options.delta_base) {
        (true, None) => return Err(DecodeError::MissingBaseline),
        (false, Some(_)) => return Err(DecodeError::NotADelta),
        (true, Some(b)) => Some(b),
        (false, None) => None,
    };

    let mapper = if wire.uid() == store.type_system().uid() {
        None
    } else {
        Some(store.type_system().mapper_to(&wire)?)
    };

    if !is_delta {
        store.reset();
    }

    let streams = DecodedStreams::parse(&mut r)?;
    let readers = streams.readers();
    let prev = PrevCache::new(&wire);
    let seq_slots = match baseline {
        Some(b) => b.map.id_slots().to_vec(),
        None => vec![None],
    };

    let session = Decoder {
        store,
        wire,
        mapper,
        readers,
        prev,
        seq_slots,
        blobs: Vec::new(),
        strings: vec![String::new()], // slot 0 reserved for null
        fixups: Vec::new(),
        is_delta,
    };
    session.run()
}

enum FixupSlot {
    Field(u16),
    Element(u32),
}

/// A reference decoded before its referent existed.
struct Fixup {
    id: FsId,
    slot: FixupSlot,
    seq: u32,
}

struct Decoder<'s, 'b> {
    store: &'s mut Store,
    wire: Arc<TypeSystem>,
    mapper: Option<Arc<TypeMapper>>,
    readers: StreamReaders<'b>,
    prev: PrevCache,
    /// Sequence number -> materialized identity (None: null or filtered).
    seq_slots: Vec<Option<FsId>>,
    blobs: Vec<String>,
    strings: Vec<String>,
    fixups: Vec<Fixup>,
    is_delta: bool,
}

impl Decoder<'_, '_> {
    fn run(mut self) -> Result<ReuseInfo, DecodeError> {
        self.read_string_blobs()?;
        self.read_objects()?;
        self.read_index_section()?;
        if self.is_delta {
            self.read_modifications()?;
        }
        self.apply_fixups()?;

        let mut found: Vec<FsId> = self.seq_slots.iter().copied().flatten().collect();
        found.sort_unstable();
        Ok(ReuseInfo {
            found: Arc::new(found),
            map: Arc::new(SeqMap::from_slots(self.seq_slots)),
        })
    }

    // =========================================================================
    // STRINGS
    // =========================================================================

    fn read_string_blobs(&mut self) -> Result<(), DecodeError> {
        let count = self.readers.read_varint(SlotKind::Control, "blob count")? as usize;
        if count > MAX_BLOBS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "string blobs",
                len: count,
                max: MAX_BLOBS,
            });
        }
        for _ in 0..count {
            let blob = self
                .readers
                .reader(SlotKind::StrChars)
                .read_string(MAX_BLOB_LEN, "string blob")?;
            self.blobs.push(blob);
        }
        Ok(())
    }

    fn read_string_value(&mut self) -> Result<Option<String>, DecodeError> {
        let code = decode_int_sign(self.readers.read_varint(SlotKind::StrLength, "string length")?);
        if code == 0 {
            return Ok(None);
        }
        if code == 1 {
            self.strings.push(String::new());
            return Ok(Some(String::new()));
        }
        if code < 0 {
            let index = (-code) as usize;
            if index >= self.strings.len() {
                return Err(DecodeError::StringBackrefOutOfRange {
                    index,
                    size: self.strings.len() - 1,
                });
            }
            return Ok(Some(self.strings[index].clone()));
        }
        let len = (code - 1) as usize;
        let offset = self.readers.read_varint(SlotKind::StrOffset, "string offset")? as usize;
        let seg = if self.blobs.len() > 1 {
            self.readers.read_varint(SlotKind::StrSeg, "string segment")? as usize
        } else {
            0
        };
        let blob = self.blobs.get(seg).ok_or(DecodeError::BlobIndexOutOfRange {
            index: seg,
            count: self.blobs.len(),
        })?;
        let end = offset.checked_add(len).ok_or(DecodeError::StringOutOfBlob {
            offset,
            len,
            blob_len: blob.len(),
        })?;
        let s = blob
            .get(offset..end)
            .ok_or(DecodeError::StringOutOfBlob {
                offset,
                len,
                blob_len: blob.len(),
            })?
            .to_string();
        self.strings.push(s.clone());
        Ok(Some(s))
    }

    // =========================================================================
    // OBJECTS
    // =========================================================================

    fn read_objects(&mut self) -> Result<(), DecodeError> {
        let count = self.readers.read_varint(SlotKind::Control, "object count")? as usize;
        if count > MAX_OBJECTS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "objects",
                len: count,
                max: MAX_OBJECTS,
            });
        }
        for _ in 0..count {
            self.read_object()?;
        }
        Ok(())
    }

    fn read_object(&mut self) -> Result<(), DecodeError> {
        let tgt_code = self.readers.reader(SlotKind::TypeCode).read_varint32("type code")?;
        if !self.wire.contains(tgt_code) {
            return Err(DecodeError::UnknownTypeCode { code: tgt_code });
        }
        let src_code = match &self.mapper {
            Some(m) => m.map_tgt_to_src(tgt_code),
            None => tgt_code,
        };

        if let Some(element) = self.wire.type_info(tgt_code).array {
            let (data, refs) = self.read_array(tgt_code, element)?;
            self.materialize(src_code, data, refs);
        } else {
            let (data, refs) = self.read_record(tgt_code, src_code)?;
            self.materialize(src_code, data, refs);
        }
        Ok(())
    }

    /// Installs a buffered object, consuming its sequence slot. Objects of
    /// types the destination schema lacks consume the slot unmaterialized.
    fn materialize(&mut self, src_code: TypeCode, data: Option<FsData>, refs: Vec<(FixupSlot, u32)>) {
        if src_code == 0 {
            self.seq_slots.push(None);
            return;
        }
        let data = data.expect("buffered data for a mapped type");
        let id = self.store.adopt(src_code, data);
        self.seq_slots.push(Some(id));
        for (slot, seq) in refs {
            // backward references resolve now; forward ones wait until
            // every object exists
            if (seq as usize) < self.seq_slots.len() {
                let target = self.seq_slots[seq as usize];
                match slot {
                    FixupSlot::Field(f) => self.store.set_ref_raw(id, f, target),
                    FixupSlot::Element(i) => self.store.set_ref_array_raw(id, i as usize, target),
                }
            } else {
                self.fixups.push(Fixup { id, slot, seq });
            }
        }
    }

    fn read_record(
        &mut self,
        tgt_code: TypeCode,
        src_code: TypeCode,
    ) -> Result<(Option<FsData>, Vec<(FixupSlot, u32)>), DecodeError> {
        let materialize = src_code != 0;
        let mut slots: Vec<Slot> = if materialize {
            self.store
                .type_system()
                .features(src_code)
                .iter()
                .map(|f| default_slot(f.range))
                .collect()
        } else {
            Vec::new()
        };
        let mut refs: Vec<(FixupSlot, u32)> = Vec::new();

        let n_feats = self.wire.features(tgt_code).len();
        for tgt_feat in 0..n_feats as u16 {
            let kind = self.wire.type_info(tgt_code).slot_kinds[tgt_feat as usize];
            let dest: Option<u16> = if !materialize {
                None
            } else {
                match &self.mapper {
                    Some(m) => m.tgt_feats_in_src(src_code)[tgt_feat as usize],
                    None => Some(tgt_feat),
                }
            };
            let value = self.read_slot(kind, tgt_code, tgt_feat)?;
            // a feature the destination lacks: value read (streams stay
            // aligned) and dropped, destination keeps its default
            let Some(dest) = dest else { continue };
            match value {
                RawSlot::Boolean(v) => slots[dest as usize] = Slot::Boolean(v),
                RawSlot::Byte(v) => slots[dest as usize] = Slot::Byte(v),
                RawSlot::Short(v) => slots[dest as usize] = Slot::Short(v),
                RawSlot::Int(v) => slots[dest as usize] = Slot::Int(v),
                RawSlot::Long(v) => slots[dest as usize] = Slot::Long(v),
                RawSlot::Float(bits) => slots[dest as usize] = Slot::Float(f32::from_bits(bits)),
                RawSlot::Double(bits) => slots[dest as usize] = Slot::Double(f64::from_bits(bits)),
                RawSlot::Str(s) => slots[dest as usize] = Slot::Str(s),
                RawSlot::RefSeq(seq) => {
                    if seq != 0 {
                        refs.push((FixupSlot::Field(dest), seq));
                    }
                }
            }
        }
        Ok((materialize.then_some(FsData::Record(slots)), refs))
    }

    fn read_slot(
        &mut self,
        kind: SlotKind,
        tgt_code: TypeCode,
        tgt_feat: u16,
    ) -> Result<RawSlot, DecodeError> {
        Ok(match kind {
            SlotKind::Int => {
                RawSlot::Int(self.read_diff_cached(SlotKind::Int, tgt_code, tgt_feat)?)
            }
            SlotKind::Short => {
                let v = self.read_diff_cached(SlotKind::Short, tgt_code, tgt_feat)?;
                RawSlot::Short(v as i16)
            }
            SlotKind::Byte => RawSlot::Byte(self.readers.reader(SlotKind::Byte).read_byte("byte")?),
            SlotKind::Boolean => {
                RawSlot::Boolean(self.readers.reader(SlotKind::Byte).read_byte("boolean")? != 0)
            }
            SlotKind::Float => {
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                RawSlot::Float(value::read_float(exp, mant)?)
            }
            SlotKind::DoubleRef => {
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                RawSlot::Double(value::read_double(exp, mant)?)
            }
            SlotKind::LongRef => {
                let prev = self.prev.get(tgt_code, tgt_feat);
                let (hi, lo) = self
                    .readers
                    .reader_pair(SlotKind::LongHigh, SlotKind::LongLow);
                let v = value::read_long(hi, lo, prev)?;
                self.prev.set(tgt_code, tgt_feat, v);
                RawSlot::Long(v)
            }
            SlotKind::StrRef => RawSlot::Str(self.read_string_value()?),
            SlotKind::HeapRef => {
                let v = self.read_diff_cached(SlotKind::HeapRef, tgt_code, tgt_feat)?;
                RawSlot::RefSeq(check_seq(v)?)
            }
            kind => unreachable!("{kind:?} is not a record slot kind"),
        })
    }

    fn read_diff_cached(
        &mut self,
        kind: SlotKind,
        tgt_code: TypeCode,
        tgt_feat: u16,
    ) -> Result<i32, DecodeError> {
        let prev = self.prev.get(tgt_code, tgt_feat) as i32;
        let v = value::read_diff(self.readers.reader(kind), prev, "slot value")?;
        if value::updates_prev(v) {
            self.prev.set(tgt_code, tgt_feat, v as i64);
        }
        Ok(v)
    }

    fn read_array(
        &mut self,
        tgt_code: TypeCode,
        element: Range,
    ) -> Result<(Option<FsData>, Vec<(FixupSlot, u32)>), DecodeError> {
        let len = self.readers.read_varint(SlotKind::ArrayLength, "array length")? as usize;
        if len > MAX_ARRAY_LEN {
            return Err(DecodeError::LengthExceedsLimit {
                field: "array",
                len,
                max: MAX_ARRAY_LEN,
            });
        }
        let mut refs: Vec<(FixupSlot, u32)> = Vec::new();
        let data = match element {
            Range::Int => {
                FsData::Ints(self.read_diffed_elements(SlotKind::Int, tgt_code, len)?)
            }
            Range::Ref => {
                let seqs = self.read_diffed_elements(SlotKind::HeapRef, tgt_code, len)?;
                for (i, &v) in seqs.iter().enumerate() {
                    let seq = check_seq(v)?;
                    if seq != 0 {
                        refs.push((FixupSlot::Element(i as u32), seq));
                    }
                }
                FsData::Refs(vec![None; len])
            }
            Range::Float => {
                let mut elems = Vec::with_capacity(len);
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                for _ in 0..len {
                    elems.push(f32::from_bits(value::read_float(exp, mant)?));
                }
                FsData::Floats(elems)
            }
            Range::String => {
                let mut elems = Vec::with_capacity(len);
                for _ in 0..len {
                    elems.push(self.read_string_value()?);
                }
                FsData::Strings(elems)
            }
            Range::Boolean => {
                let r = self.readers.reader(SlotKind::Byte);
                let mut elems = Vec::with_capacity(len);
                for _ in 0..len {
                    elems.push(r.read_byte("boolean element")? != 0);
                }
                FsData::Booleans(elems)
            }
            Range::Byte => {
                let bytes = self
                    .readers
                    .reader(SlotKind::Byte)
                    .read_bytes(len, "byte elements")?;
                FsData::Bytes(bytes.to_vec())
            }
            Range::Short => {
                let r = self.readers.reader(SlotKind::Short);
                let mut elems = Vec::with_capacity(len);
                let mut prev = 0i32;
                for _ in 0..len {
                    let v = value::read_diff(r, prev, "short element")?;
                    prev = v;
                    elems.push(v as i16);
                }
                FsData::Shorts(elems)
            }
            Range::Long => {
                let mut elems = Vec::with_capacity(len);
                let (hi, lo) = self
                    .readers
                    .reader_pair(SlotKind::LongHigh, SlotKind::LongLow);
                let mut prev = 0i64;
                for _ in 0..len {
                    let v = value::read_long(hi, lo, prev)?;
                    prev = v;
                    elems.push(v);
                }
                FsData::Longs(elems)
            }
            Range::Double => {
                let mut elems = Vec::with_capacity(len);
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                for _ in 0..len {
                    elems.push(f64::from_bits(value::read_double(exp, mant)?));
                }
                FsData::Doubles(elems)
            }
        };
        Ok((Some(data), refs))
    }

    /// Mirror of the encoder's inline-element diffing: the running
    /// predecessor starts at the previous same-type array's first element.
    fn read_diffed_elements(
        &mut self,
        kind: SlotKind,
        tgt_code: TypeCode,
        len: usize,
    ) -> Result<Vec<i32>, DecodeError> {
        let mut elems = Vec::with_capacity(len);
        if len == 0 {
            return Ok(elems);
        }
        let mut prev = self.prev.array_first(tgt_code) as i32;
        let r = self.readers.reader(kind);
        for _ in 0..len {
            let v = value::read_diff(r, prev, "array element")?;
            if value::updates_prev(v) {
                prev = v;
            }
            elems.push(v);
        }
        if value::updates_prev(elems[0]) {
            self.prev.set_array_first(tgt_code, elems[0] as i64);
        }
        Ok(elems)
    }

    // =========================================================================
    // INDEX SECTION
    // =========================================================================

    fn read_index_section(&mut self) -> Result<(), DecodeError> {
        let nbr_views = self.readers.read_varint(SlotKind::Control, "view count")? as usize;
        if nbr_views > MAX_VIEWS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "views",
                len: nbr_views,
                max: MAX_VIEWS,
            });
        }
        let nbr_sofas = self.readers.read_varint(SlotKind::Control, "sofa count")? as usize;
        if nbr_sofas > MAX_VIEWS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "sofas",
                len: nbr_sofas,
                max: MAX_VIEWS,
            });
        }

        let mut view_ids = Vec::with_capacity(nbr_sofas);
        for _ in 0..nbr_sofas {
            let seq = self.readers.read_varint(SlotKind::Control, "sofa seq")? as u32;
            let sofa = self
                .resolve_seq(seq)?
                .ok_or(DecodeError::SequenceOutOfRange {
                    seq,
                    max: self.seq_slots.len() as u32 - 1,
                })?;
            if self.store.type_of(sofa) != TYPE_SOFA {
                return Err(DecodeError::MalformedEncoding {
                    context: "sofa sequence names a non-sofa object",
                });
            }
            let view = match self.store.view_of_sofa(sofa) {
                Some(v) => v,
                None => self.store.attach_view(sofa),
            };
            view_ids.push(view);
        }

        for v in 0..nbr_views {
            let view = *view_ids.get(v).ok_or(DecodeError::MalformedEncoding {
                context: "more views than sofas",
            })?;
            if self.is_delta {
                let added = self.read_fs_list()?;
                let removed = self.read_fs_list()?;
                let reindexed = self.read_fs_list()?;
                for id in added {
                    self.store.index_fs(view, id);
                }
                for id in removed {
                    self.store.unindex_fs(view, id);
                }
                for id in reindexed {
                    self.store.protected_update(id, |_| {});
                }
            } else {
                let ids = self.read_fs_list()?;
                for id in ids {
                    self.store.index_fs(view, id);
                }
            }
        }
        Ok(())
    }

    /// One count-prefixed ascending delta-encoded sequence list; entries
    /// the destination filtered out dissolve silently.
    fn read_fs_list(&mut self) -> Result<Vec<FsId>, DecodeError> {
        let count = self.readers.read_varint(SlotKind::Control, "index list count")? as usize;
        if count > MAX_OBJECTS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "index list",
                len: count,
                max: MAX_OBJECTS,
            });
        }
        let mut ids = Vec::with_capacity(count);
        let mut prev = 0u64;
        for _ in 0..count {
            let delta = self.readers.read_varint(SlotKind::FsIndexes, "index entry")?;
            let seq = prev + delta;
            prev = seq;
            if let Some(id) = self.resolve_seq(seq as u32)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn resolve_seq(&self, seq: u32) -> Result<Option<FsId>, DecodeError> {
        if seq == 0 {
            return Ok(None);
        }
        self.seq_slots
            .get(seq as usize)
            .copied()
            .ok_or(DecodeError::SequenceOutOfRange {
                seq,
                max: self.seq_slots.len() as u32 - 1,
            })
    }

    // =========================================================================
    // DELTA MODIFICATIONS
    // =========================================================================

    fn read_modifications(&mut self) -> Result<(), DecodeError> {
        let count = self.readers.read_varint(SlotKind::Control, "modified count")? as usize;
        if count > MAX_OBJECTS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "modifications",
                len: count,
                max: MAX_OBJECTS,
            });
        }
        let mut prevs = ModPrevs::default();
        let mut prev_seq = 0i32;
        for _ in 0..count {
            let seq =
                value::read_diff(self.readers.reader(SlotKind::FsIndexes), prev_seq, "mod seq")?;
            prev_seq = seq;
            let seq = check_seq(seq)?;
            let id = self
                .resolve_seq(seq)?
                .ok_or(DecodeError::ModifiedObjectMissing { seq })?;
            self.read_object_mods(id, &mut prevs)?;
        }
        Ok(())
    }

    fn read_object_mods(&mut self, id: FsId, prevs: &mut ModPrevs) -> Result<(), DecodeError> {
        let src_code = self.store.type_of(id);
        let tgt_code = match &self.mapper {
            Some(m) => m.map_src_to_tgt(src_code),
            None => src_code,
        };
        if tgt_code == 0 {
            return Err(DecodeError::MalformedEncoding {
                context: "modified object's type missing from wire schema",
            });
        }
        let n_mods = self.readers.read_varint(SlotKind::FsIndexes, "mod count")? as usize;
        let array = self.wire.type_info(tgt_code).array;

        // Buffer the updates, then apply them in one protected pass: a
        // modified feature may be an index sort key.
        let mut updates: Vec<(u32, RawSlot)> = Vec::with_capacity(n_mods);
        let mut prev_offset = 0u64;
        for _ in 0..n_mods {
            let delta = self.readers.read_varint(SlotKind::FsIndexes, "mod offset")?;
            let offset = prev_offset + delta;
            prev_offset = offset;
            let value = match array {
                Some(element) => self.read_mod_element(element, prevs)?,
                None => {
                    let kind = *self
                        .wire
                        .type_info(tgt_code)
                        .slot_kinds
                        .get(offset as usize)
                        .ok_or(DecodeError::MalformedEncoding { context: "mod offset" })?;
                    self.read_mod_field(kind, prevs)?
                }
            };
            let offset = if array.is_none() {
                // target offset -> destination offset
                match &self.mapper {
                    Some(m) => m.tgt_feats_in_src(src_code)[offset as usize].ok_or(
                        DecodeError::MalformedEncoding {
                            context: "modified feature missing in destination schema",
                        },
                    )? as u64,
                    None => offset,
                }
            } else {
                offset
            };
            updates.push((offset as u32, value));
        }

        let mut result = Ok(());
        let seq_slots = std::mem::take(&mut self.seq_slots);
        self.store.protected_update(id, |store| {
            result = apply_updates(store, id, array, &updates, &seq_slots);
        });
        self.seq_slots = seq_slots;
        result
    }

    fn read_mod_field(&mut self, kind: SlotKind, prevs: &mut ModPrevs) -> Result<RawSlot, DecodeError> {
        Ok(match kind {
            SlotKind::Int => {
                let v = value::read_diff(self.readers.reader(SlotKind::Int), prevs.int, "mod int")?;
                if value::updates_prev(v) {
                    prevs.int = v;
                }
                RawSlot::Int(v)
            }
            SlotKind::Short => {
                let v =
                    value::read_diff(self.readers.reader(SlotKind::Short), prevs.short, "mod short")?;
                if value::updates_prev(v) {
                    prevs.short = v;
                }
                RawSlot::Short(v as i16)
            }
            SlotKind::HeapRef => {
                let v = value::read_diff(
                    self.readers.reader(SlotKind::HeapRef),
                    prevs.heap_ref,
                    "mod ref",
                )?;
                if value::updates_prev(v) {
                    prevs.heap_ref = v;
                }
                RawSlot::RefSeq(check_seq(v)?)
            }
            SlotKind::LongRef => {
                let (hi, lo) = self
                    .readers
                    .reader_pair(SlotKind::LongHigh, SlotKind::LongLow);
                let v = value::read_long(hi, lo, prevs.long)?;
                prevs.long = v;
                RawSlot::Long(v)
            }
            SlotKind::Byte => RawSlot::Byte(self.readers.reader(SlotKind::Byte).read_byte("mod byte")?),
            SlotKind::Boolean => {
                RawSlot::Boolean(self.readers.reader(SlotKind::Byte).read_byte("mod boolean")? != 0)
            }
            SlotKind::Float => {
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::FloatExponent, SlotKind::FloatMantissaSign);
                RawSlot::Float(value::read_float(exp, mant)?)
            }
            SlotKind::DoubleRef => {
                let (exp, mant) = self
                    .readers
                    .reader_pair(SlotKind::DoubleExponent, SlotKind::DoubleMantissaSign);
                RawSlot::Double(value::read_double(exp, mant)?)
            }
            SlotKind::StrRef => RawSlot::Str(self.read_string_value()?),
            _ => return Err(DecodeError::MalformedEncoding { context: "mod slot kind" }),
        })
    }

    fn read_mod_element(&mut self, element: Range, prevs: &mut ModPrevs) -> Result<RawSlot, DecodeError> {
        // element values travel on the same streams as record slots of the
        // same range, with the same running predecessors
        self.read_mod_field(element.feature_slot_kind(), prevs)
    }

    // =========================================================================
    // FIXUPS
    // =========================================================================

    fn apply_fixups(&mut self) -> Result<(), DecodeError> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            let target = self.resolve_seq(fixup.seq)?;
            match fixup.slot {
                FixupSlot::Field(f) => self.store.set_ref_raw(fixup.id, f, target),
                FixupSlot::Element(i) => {
                    self.store.set_ref_array_raw(fixup.id, i as usize, target)
                }
            }
        }
        Ok(())
    }
}

/// A decoded value awaiting placement.
enum RawSlot {
    Boolean(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Str(Option<String>),
    RefSeq(u32),
}

fn default_slot(range: Range) -> Slot {
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

fn check_seq(v: i32) -> Result<u32, DecodeError> {
    u32::try_from(v).map_err(|_| DecodeError::MalformedEncoding {
        context: "negative sequence number",
    })
}

fn apply_updates(
    store: &mut Store,
    id: FsId,
    array: Option<Range>,
    updates: &[(u32, RawSlot)],
    seq_slots: &[Option<FsId>],
) -> Result<(), DecodeError> {
    for (offset, value) in updates {
        let resolve = |seq: u32| -> Result<Option<FsId>, DecodeError> {
            if seq == 0 {
                return Ok(None);
            }
            seq_slots
                .get(seq as usize)
                .copied()
                .ok_or(DecodeError::SequenceOutOfRange {
                    seq,
                    max: seq_slots.len() as u32 - 1,
                })
        };
        match array {
            None => {
                let feat = *offset as u16;
                match value {
                    RawSlot::Boolean(v) => store.set_boolean_value(id, feat, *v),
                    RawSlot::Byte(v) => store.set_byte_value(id, feat, *v),
                    RawSlot::Short(v) => store.set_short_value(id, feat, *v),
                    RawSlot::Int(v) => store.set_int_value(id, feat, *v),
                    RawSlot::Long(v) => store.set_long_value(id, feat, *v),
                    RawSlot::Float(bits) => {
                        store.set_float_value(id, feat, f32::from_bits(*bits))
                    }
                    RawSlot::Double(bits) => {
                        store.set_double_value(id, feat, f64::from_bits(*bits))
                    }
                    RawSlot::Str(s) => store.set_string_value(id, feat, s.as_deref()),
                    RawSlot::RefSeq(seq) => store.set_ref_value(id, feat, resolve(*seq)?),
                }
            }
            Some(_) => {
                let idx = *offset as usize;
                if idx >= store.array_len(id) {
                    return Err(DecodeError::MalformedEncoding {
                        context: "array modification index",
                    });
                }
                match value {
                    RawSlot::Boolean(v) => store.set_boolean_array_value(id, idx, *v),
                    RawSlot::Byte(v) => store.set_byte_array_value(id, idx, *v),
                    RawSlot::Short(v) => store.set_short_array_value(id, idx, *v),
                    RawSlot::Int(v) => store.set_int_array_value(id, idx, *v),
                    RawSlot::Long(v) => store.set_long_array_value(id, idx, *v),
                    RawSlot::Float(bits) => {
                        store.set_float_array_value(id, idx, f32::from_bits(*bits))
                    }
                    RawSlot::Double(bits) => {
                        store.set_double_array_value(id, idx, f64::from_bits(*bits))
                    }
                    RawSlot::Str(s) => store.set_string_array_value(id, idx, s.as_deref()),
                    RawSlot::RefSeq(seq) => store.set_ref_array_value(id, idx, resolve(*seq)?),
                }
            }
        }
    }
    Ok(())
}

/// Reads the self-describing schema section written at encode time.
fn read_schema(r: &mut Reader<'_>) -> Result<Arc<TypeSystem>, DecodeError> {
    let count = r.read_varint("schema type count")? as usize;
    if count > MAX_SCHEMA_TYPES {
        return Err(DecodeError::LengthExceedsLimit {
            field: "schema types",
            len: count,
            max: MAX_SCHEMA_TYPES,
        });
    }
    let mut builder = TypeSystemBuilder::new();
    for _ in 0..count {
        let name = r.read_string(MAX_NAME_LEN, "type name")?;
        let supertype = r.read_varint32("supertype")?;
        let code = builder.add_type(&name, supertype)?;
        let n_feats = r.read_varint("feature count")? as usize;
        if n_feats > MAX_SCHEMA_FEATURES {
            return Err(DecodeError::LengthExceedsLimit {
                field: "schema features",
                len: n_feats,
                max: MAX_SCHEMA_FEATURES,
            });
        }
        for _ in 0..n_feats {
            let fname = r.read_string(MAX_NAME_LEN, "feature name")?;
            let range_byte = r.read_byte("feature range")?;
            let range = Range::from_u8(range_byte).ok_or(DecodeError::MalformedEncoding {
                context: "feature range",
            })?;
            builder.add_feature(code, &fname, range)?;
        }
    }
    Ok(builder.commit()?)
}
