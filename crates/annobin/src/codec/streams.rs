//! The stream multiplexer: one logical sub-stream per slot kind, each
//! compressed independently and framed behind a directory.
//!
//! Grouping same-kind values, rather than interleaving them record by
//! record, is the central compression lever: the general-purpose
//! compressor sees runs of statistically similar bytes.

use crate::codec::primitives::{Reader, Writer};
use crate::codec::slots::{NUM_STREAMS, SlotKind};
use crate::error::{DecodeError, EncodeError};
use crate::limits::MAX_STREAM_LEN;

/// Write-side stream set. Sub-streams are created lazily, only if used.
#[derive(Debug, Default)]
pub(crate) struct StreamSet {
    streams: [Option<Writer>; NUM_STREAMS],
}

impl StreamSet {
    pub(crate) fn new() -> StreamSet {
        StreamSet::default()
    }

    /// The writer for a slot kind's sub-stream.
    #[inline]
    pub(crate) fn writer(&mut self, kind: SlotKind) -> &mut Writer {
        self.streams[kind.stream_id() as usize].get_or_insert_with(Writer::new)
    }

    /// Two writers at once, for the split encodings (float, double, long).
    #[inline]
    pub(crate) fn writer_pair(&mut self, a: SlotKind, b: SlotKind) -> (&mut Writer, &mut Writer) {
        let (ia, ib) = (a.stream_id() as usize, b.stream_id() as usize);
        debug_assert_ne!(ia, ib);
        self.streams[ia].get_or_insert_with(Writer::new);
        self.streams[ib].get_or_insert_with(Writer::new);
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (left, right) = self.streams.split_at_mut(hi);
        let w_lo = left[lo].as_mut().expect("stream just created");
        let w_hi = right[0].as_mut().expect("stream just created");
        if ia < ib { (w_lo, w_hi) } else { (w_hi, w_lo) }
    }

    /// Convenience varint append.
    #[inline]
    pub(crate) fn write_varint(&mut self, kind: SlotKind, v: u64) {
        self.writer(kind).write_varint(v);
    }

    /// Compresses each non-empty sub-stream and appends the directory
    /// followed by the concatenated blocks.
    pub(crate) fn finish_into(self, out: &mut Writer, level: i32) -> Result<(), EncodeError> {
        let mut entries: Vec<(u8, Vec<u8>, usize)> = Vec::new();
        for (i, stream) in self.streams.into_iter().enumerate() {
            let Some(stream) = stream else { continue };
            if stream.is_empty() {
                continue;
            }
            let raw = stream.into_bytes();
            let compressed = zstd::encode_all(raw.as_slice(), level)
                .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;
            entries.push((i as u8, compressed, raw.len()));
        }

        out.write_varint(entries.len() as u64);
        for (id, compressed, raw_len) in &entries {
            out.write_byte(*id);
            out.write_varint(compressed.len() as u64);
            out.write_varint(*raw_len as u64);
        }
        for (_, compressed, _) in &entries {
            out.write_bytes(compressed);
        }
        Ok(())
    }
}

/// Read-side stream set: the decompressed bytes of each sub-stream.
#[derive(Debug, Default)]
pub(crate) struct DecodedStreams {
    bufs: [Vec<u8>; NUM_STREAMS],
    /// Uncompressed lengths as declared by the directory (diagnostics).
    pub(crate) lens: [usize; NUM_STREAMS],
}

impl DecodedStreams {
    /// Parses the directory at the reader's position and decompresses the
    /// blocks that follow it.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<DecodedStreams, DecodeError> {
        let count = r.read_varint("directory count")? as usize;
        if count > NUM_STREAMS {
            return Err(DecodeError::LengthExceedsLimit {
                field: "directory",
                len: count,
                max: NUM_STREAMS,
            });
        }
        let mut entries = Vec::with_capacity(count);
        let mut seen = [false; NUM_STREAMS];
        for _ in 0..count {
            let id = r.read_byte("stream id")?;
            if SlotKind::from_stream_id(id).is_none() {
                return Err(DecodeError::InvalidSlotKind { id });
            }
            if seen[id as usize] {
                return Err(DecodeError::DuplicateStream { id });
            }
            seen[id as usize] = true;
            let compressed_len = r.read_varint("compressed length")? as usize;
            let raw_len = r.read_varint("uncompressed length")? as usize;
            if raw_len > MAX_STREAM_LEN {
                return Err(DecodeError::LengthExceedsLimit {
                    field: "stream",
                    len: raw_len,
                    max: MAX_STREAM_LEN,
                });
            }
            entries.push((id, compressed_len, raw_len));
        }

        let mut streams = DecodedStreams::default();
        for (id, compressed_len, raw_len) in entries {
            let block = r.read_bytes(compressed_len, "compressed block")?;
            let raw = zstd::decode_all(block)
                .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;
            if raw.len() != raw_len {
                return Err(DecodeError::UncompressedSizeMismatch {
                    declared: raw_len,
                    actual: raw.len(),
                });
            }
            streams.lens[id as usize] = raw_len;
            streams.bufs[id as usize] = raw;
        }
        Ok(streams)
    }

    /// One read cursor per sub-stream. Absent streams read as empty, so a
    /// value demanded from one surfaces as a truncation error.
    pub(crate) fn readers(&self) -> StreamReaders<'_> {
        StreamReaders {
            readers: std::array::from_fn(|i| Reader::new(&self.bufs[i])),
        }
    }
}

/// Per-kind read cursors over the decompressed sub-streams.
#[derive(Debug)]
pub(crate) struct StreamReaders<'a> {
    readers: [Reader<'a>; NUM_STREAMS],
}

impl<'a> StreamReaders<'a> {
    #[inline]
    pub(crate) fn reader(&mut self, kind: SlotKind) -> &mut Reader<'a> {
        &mut self.readers[kind.stream_id() as usize]
    }

    /// Two cursors at once, for the split encodings.
    #[inline]
    pub(crate) fn reader_pair(
        &mut self,
        a: SlotKind,
        b: SlotKind,
    ) -> (&mut Reader<'a>, &mut Reader<'a>) {
        let (ia, ib) = (a.stream_id() as usize, b.stream_id() as usize);
        debug_assert_ne!(ia, ib);
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (left, right) = self.readers.split_at_mut(hi);
        let r_lo = &mut left[lo];
        let r_hi = &mut right[0];
        if ia < ib { (r_lo, r_hi) } else { (r_hi, r_lo) }
    }

    #[inline]
    pub(crate) fn read_varint(
        &mut self,
        kind: SlotKind,
        context: &'static str,
    ) -> Result<u64, DecodeError> {
        self.reader(kind).read_varint(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut set = StreamSet::new();
        set.write_varint(SlotKind::Int, 42);
        set.write_varint(SlotKind::Control, 7);
        set.writer(SlotKind::Byte).write_bytes(&[1, 2, 3]);

        let mut out = Writer::new();
        set.finish_into(&mut out, 3).unwrap();

        let bytes = out.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = DecodedStreams::parse(&mut r).unwrap();
        assert!(r.is_empty());

        let mut readers = decoded.readers();
        assert_eq!(readers.read_varint(SlotKind::Int, "t").unwrap(), 42);
        assert_eq!(readers.read_varint(SlotKind::Control, "t").unwrap(), 7);
        assert_eq!(readers.reader(SlotKind::Byte).read_bytes(3, "t").unwrap(), &[1, 2, 3]);
        // absent stream reads as truncated
        assert!(readers.read_varint(SlotKind::Short, "t").is_err());
    }

    #[test]
    fn test_lazy_streams_only_in_directory() {
        let mut set = StreamSet::new();
        set.write_varint(SlotKind::Int, 1);
        let mut out = Writer::new();
        set.finish_into(&mut out, 3).unwrap();
        let bytes = out.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint("count").unwrap(), 1);
        assert_eq!(r.read_byte("id").unwrap(), SlotKind::Int.stream_id());
    }

    #[test]
    fn test_bad_stream_id_rejected() {
        let mut out = Writer::new();
        out.write_varint(1);
        out.write_byte(200); // invalid stream id
        out.write_varint(0);
        out.write_varint(0);
        let bytes = out.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            DecodedStreams::parse(&mut r),
            Err(DecodeError::InvalidSlotKind { id: 200 })
        ));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut set = StreamSet::new();
        set.write_varint(SlotKind::Int, 999999);
        let mut out = Writer::new();
        set.finish_into(&mut out, 3).unwrap();
        let bytes = out.into_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        let mut r = Reader::new(truncated);
        assert!(DecodedStreams::parse(&mut r).is_err());
    }
}
