//! Binary encoding and decoding for the ANB-1 format.

pub mod de;
pub mod primitives;
pub mod reach;
pub mod ser;
pub mod slots;
pub mod strings;
pub mod value;

pub(crate) mod streams;

pub use de::{DeserializeOptions, deserialize, embedded_schema};
pub use reach::ReuseInfo;
pub use ser::{SerializeOptions, SerializeOutput, serialize, serialize_delta, serialize_profiled};
pub use slots::SlotKind;
