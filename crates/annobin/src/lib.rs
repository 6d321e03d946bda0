//! ANB-1: compressed binary codec for typed annotation graphs.
//!
//! This crate persists and exchanges a typed, mutable object graph (an
//! annotation store of feature structures linked by references and held in
//! per-view indexes) as a compact binary blob.
//!
//! # Overview
//!
//! The codec demultiplexes every scalar value by semantic kind into ~18
//! independent sub-streams (all type codes together, all float exponents
//! together, ...), difference-encodes same-kind neighbors, splits floats
//! and doubles into exponent and bit-reversed mantissa, deduplicates and
//! substring-shares all strings, and compresses each sub-stream
//! independently with zstd. Decoding mirrors every transform, resolving
//! forward references with explicit fixups.
//!
//! # Quick Start
//!
//! ```rust
//! use annobin::{Range, Store, TypeSystemBuilder, TYPE_TOP};
//! use annobin::codec::{serialize, deserialize, SerializeOptions, DeserializeOptions};
//!
//! // Define and commit a schema
//! let mut builder = TypeSystemBuilder::new();
//! let token = builder.add_type("Token", TYPE_TOP).unwrap();
//! builder.add_feature(token, "begin", Range::Int).unwrap();
//! builder.add_feature(token, "end", Range::Int).unwrap();
//! let ts = builder.commit().unwrap();
//!
//! // Populate a store
//! let mut store = Store::new(&ts);
//! let view = store.create_view("_InitialView");
//! let fs = store.create_fs(token);
//! store.set_int_value(fs, 0, 5);
//! store.set_int_value(fs, 1, 10);
//! store.index_fs(view, fs);
//!
//! // Round-trip
//! let out = serialize(&store, &SerializeOptions::new()).unwrap();
//! let mut copy = Store::new(&ts);
//! deserialize(&mut copy, &out.bytes, &DeserializeOptions::default()).unwrap();
//! assert_eq!(copy.indexed_fss(0).count(), 1);
//! ```
//!
//! # Delta serialization
//!
//! [`Store::mark`] journals every later mutation of pre-existing objects.
//! [`codec::serialize_delta`] then emits only the increment: new objects,
//! per-view index changes, and a compact modification section. The
//! receiving side applies it with [`codec::deserialize`] and the
//! [`codec::ReuseInfo`] baseline captured when the full graph was
//! exchanged.
//!
//! # Schema exchange
//!
//! Serializing through a *target* schema filters the graph down to the
//! types and features the target names (heterogeneous exchange); decoding
//! tolerates a wire schema wider than the store's own. A blob can also
//! embed a self-describing dump of its schema.
//!
//! # Failure model
//!
//! The decoder is safe on untrusted input (every allocation is bounded,
//! every read bounds-checked) but a failed decode leaves the destination
//! store unusable: discard it. There is no partial-failure recovery.

pub mod codec;
pub mod error;
pub mod limits;
pub mod store;
pub mod types;

pub use codec::{DeserializeOptions, ReuseInfo, SerializeOptions, SerializeOutput};
pub use error::{DecodeError, EncodeError, SchemaError};
pub use store::{FsId, IndexDef, Marker, SortOrder, Store};
pub use types::{
    FIRST_USER_TYPE, Range, TYPE_SOFA, TYPE_TOP, TypeCode, TypeSystem, TypeSystemBuilder,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
