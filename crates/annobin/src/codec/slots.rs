//! Slot kinds: the semantic categories of storable values.
//!
//! Every value written to the wire is routed to the sub-stream of its slot
//! kind, so that statistically similar bytes (all type codes, all float
//! exponents, ...) end up adjacent and compress well. The first
//! [`NUM_STREAMS`] kinds are real sub-streams; the remaining kinds are
//! convenience categories that route onto them (a float value, for example,
//! is split across the `FloatExponent` and `FloatMantissaSign` streams).

/// Semantic kind of a storable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotKind {
    // Serialized stream kinds. The discriminant is the wire stream id.
    ArrayLength = 0,
    HeapRef = 1,
    Int = 2,
    Byte = 3,
    Short = 4,
    TypeCode = 5,
    StrOffset = 6,
    StrLength = 7,
    LongHigh = 8,
    LongLow = 9,
    FloatMantissaSign = 10,
    FloatExponent = 11,
    DoubleMantissaSign = 12,
    DoubleExponent = 13,
    FsIndexes = 14,
    StrChars = 15,
    Control = 16,
    StrSeg = 17,

    // Convenience kinds, never serialized under their own id.
    StrRef = 18,
    BooleanRef = 19,
    ByteRef = 20,
    ShortRef = 21,
    LongRef = 22,
    DoubleRef = 23,
    Float = 24,
    Boolean = 25,
}

/// Number of distinct serialized sub-streams.
pub const NUM_STREAMS: usize = 18;

impl SlotKind {
    /// The wire stream id of a serialized kind.
    #[inline]
    pub fn stream_id(self) -> u8 {
        debug_assert!((self as u8) < NUM_STREAMS as u8);
        self as u8
    }

    /// Creates a serialized stream kind from its wire id.
    pub fn from_stream_id(id: u8) -> Option<SlotKind> {
        match id {
            0 => Some(SlotKind::ArrayLength),
            1 => Some(SlotKind::HeapRef),
            2 => Some(SlotKind::Int),
            3 => Some(SlotKind::Byte),
            4 => Some(SlotKind::Short),
            5 => Some(SlotKind::TypeCode),
            6 => Some(SlotKind::StrOffset),
            7 => Some(SlotKind::StrLength),
            8 => Some(SlotKind::LongHigh),
            9 => Some(SlotKind::LongLow),
            10 => Some(SlotKind::FloatMantissaSign),
            11 => Some(SlotKind::FloatExponent),
            12 => Some(SlotKind::DoubleMantissaSign),
            13 => Some(SlotKind::DoubleExponent),
            14 => Some(SlotKind::FsIndexes),
            15 => Some(SlotKind::StrChars),
            16 => Some(SlotKind::Control),
            17 => Some(SlotKind::StrSeg),
            _ => None,
        }
    }

    /// Whether values of this kind are candidates for difference encoding.
    ///
    /// Difference encoding costs one flag bit, so it is only tried for
    /// multi-byte kinds where the delta is usually shorter than the value.
    #[inline]
    pub fn diff_encodable(self) -> bool {
        matches!(
            self,
            SlotKind::HeapRef
                | SlotKind::Int
                | SlotKind::Short
                | SlotKind::LongHigh
                | SlotKind::LongLow
                | SlotKind::FsIndexes
                | SlotKind::StrRef
                | SlotKind::ByteRef
                | SlotKind::ShortRef
                | SlotKind::LongRef
                | SlotKind::DoubleRef
        )
    }

    /// Whether values of this kind may be negative.
    ///
    /// Diff-encodable kinds are always sign-carrying; for the rest the
    /// attribute marks kinds whose encoding moves the sign bit explicitly
    /// (float/double parts).
    #[inline]
    pub fn can_be_negative(self) -> bool {
        self.diff_encodable()
            || matches!(
                self,
                SlotKind::FloatMantissaSign
                    | SlotKind::FloatExponent
                    | SlotKind::DoubleMantissaSign
                    | SlotKind::DoubleExponent
            )
    }

    /// Element size in bytes for array-backing kinds (0 for the rest).
    #[inline]
    pub fn element_size(self) -> usize {
        match self {
            SlotKind::StrChars => 2,
            SlotKind::ArrayLength
            | SlotKind::HeapRef
            | SlotKind::Int
            | SlotKind::Byte
            | SlotKind::Short
            | SlotKind::TypeCode
            | SlotKind::StrOffset
            | SlotKind::StrLength
            | SlotKind::FsIndexes
            | SlotKind::StrRef
            | SlotKind::BooleanRef
            | SlotKind::ByteRef
            | SlotKind::ShortRef
            | SlotKind::LongRef
            | SlotKind::DoubleRef
            | SlotKind::Float
            | SlotKind::Boolean => 4,
            _ => 0,
        }
    }

    /// Whether values of this kind live inline in the main record storage
    /// (as opposed to an auxiliary byte/short/long store).
    #[inline]
    pub fn in_main_storage(self) -> bool {
        matches!(
            self,
            SlotKind::ArrayLength
                | SlotKind::HeapRef
                | SlotKind::Int
                | SlotKind::Byte
                | SlotKind::Short
                | SlotKind::TypeCode
                | SlotKind::StrRef
                | SlotKind::BooleanRef
                | SlotKind::ByteRef
                | SlotKind::ShortRef
                | SlotKind::LongRef
                | SlotKind::DoubleRef
                | SlotKind::Float
                | SlotKind::Boolean
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_roundtrip() {
        for id in 0..NUM_STREAMS as u8 {
            let kind = SlotKind::from_stream_id(id).unwrap();
            assert_eq!(kind.stream_id(), id);
        }
        assert!(SlotKind::from_stream_id(NUM_STREAMS as u8).is_none());
    }

    #[test]
    fn test_diff_encodable_kinds_carry_sign() {
        assert!(SlotKind::Int.diff_encodable());
        assert!(SlotKind::Int.can_be_negative());
        assert!(!SlotKind::ArrayLength.diff_encodable());
        assert!(!SlotKind::ArrayLength.can_be_negative());
        assert!(!SlotKind::FloatExponent.diff_encodable());
        assert!(SlotKind::FloatExponent.can_be_negative());
    }

    #[test]
    fn test_str_chars_element_size() {
        assert_eq!(SlotKind::StrChars.element_size(), 2);
        assert_eq!(SlotKind::Control.element_size(), 0);
        assert_eq!(SlotKind::Int.element_size(), 4);
    }
}
