//! Error types for encoding, decoding and schema mapping.

use thiserror::Error;

/// Error while building or mapping type systems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate type name: {name}")]
    DuplicateType { name: String },

    #[error("duplicate feature {feature} on type {type_name}")]
    DuplicateFeature { type_name: String, feature: String },

    #[error("unknown supertype code {code}")]
    UnknownSupertype { code: u32 },

    #[error("type system has too many types ({count})")]
    TooManyTypes { count: usize },

    #[error("feature {feature} on type {type_name} has range {found} in one schema and {expected} in the other")]
    RangeMismatch {
        type_name: String,
        feature: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Error during binary decoding.
///
/// A decode error leaves the destination store in an unusable state; the
/// caller must discard or reset it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid magic bytes: expected ANB1, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("unsupported version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("unknown header flags: {flags:#04x}")]
    UnknownFlags { flags: u8 },

    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("varint overflow (value exceeds u64)")]
    VarintOverflow,

    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("slot kind id {id} is not a serialized stream")]
    InvalidSlotKind { id: u8 },

    #[error("duplicate directory entry for slot kind {id}")]
    DuplicateStream { id: u8 },

    #[error("type code {code} has no counterpart in the wire schema")]
    UnknownTypeCode { code: u32 },

    #[error("sequence number {seq} out of range (max {max})")]
    SequenceOutOfRange { seq: u32, max: u32 },

    #[error("string back-reference {index} out of range (table size {size})")]
    StringBackrefOutOfRange { index: usize, size: usize },

    #[error("string blob index {index} out of range ({count} blobs)")]
    BlobIndexOutOfRange { index: usize, count: usize },

    #[error("string placement {offset}+{len} exceeds blob of {blob_len} chars")]
    StringOutOfBlob {
        offset: usize,
        len: usize,
        blob_len: usize,
    },

    #[error("delta blob but no baseline: deserialize the full blob first and keep its ReuseInfo")]
    MissingBaseline,

    #[error("blob is not a delta but delta options were given")]
    NotADelta,

    #[error("delta-modified object seq {seq} resolves to nothing in this store")]
    ModifiedObjectMissing { seq: u32 },

    #[error("zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("decompressed size {actual} doesn't match declared {declared}")]
    UncompressedSizeMismatch { declared: usize, actual: usize },

    #[error("malformed encoding: {context}")]
    MalformedEncoding { context: &'static str },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Error during binary encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("string of {len} chars exceeds the encodable maximum")]
    StringTooLong { len: usize },

    #[error("target schema claims feature {feature} on {type_name} which the source lacks")]
    FeatureMissingInSource { type_name: String, feature: String },

    #[error("mark was created against a different store")]
    ForeignMark,

    #[error("mark is stale: the store was reset after it was created")]
    StaleMark,

    #[error("delta serialization cannot re-target a different schema")]
    DeltaWithTarget,

    #[error("zstd compression failed: {0}")]
    CompressionFailed(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
