//! Format constants and security limits for decoding.
//!
//! The decoder must stay safe on untrusted input: every count read from the
//! wire is checked against one of these bounds before allocation.

/// Magic bytes opening every serialized blob.
pub const MAGIC: &[u8; 4] = b"ANB1";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Oldest format version this crate still decodes.
pub const MIN_FORMAT_VERSION: u8 = 1;

/// Header flag: the blob is a delta against an earlier serialization.
pub const FLAG_DELTA: u8 = 0x01;

/// Header flag: a self-describing type-system section follows the header.
pub const FLAG_EMBEDDED_SCHEMA: u8 = 0x02;

/// Maximum bytes in a varint (64-bit LEB128).
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum number of objects a single blob may declare.
pub const MAX_OBJECTS: usize = 64 * 1024 * 1024;

/// Maximum declared length of any single array.
pub const MAX_ARRAY_LEN: usize = 16 * 1024 * 1024;

/// Maximum byte length of one shared string blob.
pub const MAX_BLOB_LEN: usize = 256 * 1024 * 1024;

/// Maximum number of shared string blobs.
pub const MAX_BLOBS: usize = 4096;

/// Maximum uncompressed size of one slot-kind sub-stream.
pub const MAX_STREAM_LEN: usize = 1024 * 1024 * 1024;

/// Maximum number of views in the index section.
pub const MAX_VIEWS: usize = 4096;

/// Maximum number of types in an embedded schema section.
pub const MAX_SCHEMA_TYPES: usize = 64 * 1024;

/// Maximum number of features on one type in an embedded schema section.
pub const MAX_SCHEMA_FEATURES: usize = 4096;

/// Maximum byte length of a type or feature name.
pub const MAX_NAME_LEN: usize = 4096;

/// Bound on the per-schema type-mapper cache (oldest entry evicted).
pub const MAPPER_CACHE_SIZE: usize = 10;
