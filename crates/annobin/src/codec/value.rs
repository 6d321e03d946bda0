//! Scalar value codec: difference encoding, float/double bit transforms,
//! and the two-half long split.
//!
//! Difference encoding represents a value as the smaller of its own
//! magnitude or its distance from a same-kind predecessor, with a delta
//! flag in bit 0 and the sign of the chosen magnitude in bit 1:
//!
//! ```text
//! varint payload = (magnitude << 2) | sign_bit << 1 | delta_bit
//! ```
//!
//! Two payloads are reserved: `0` is the literal zero (always encoded
//! absolutely, regardless of the predecessor) and `2` ("negative zero") is
//! `i32::MIN`, whose magnitude has no absolute value. Neither reserved form
//! updates the predecessor cache; [`updates_prev`] tells callers whether a
//! value participates.

use crate::codec::primitives::{Reader, Writer, decode_int_sign, encode_int_sign};
use crate::error::DecodeError;

/// Whether a value written or read through the diff codec becomes the new
/// predecessor. The reserved literal forms (0 and `i32::MIN`) do not.
#[inline]
pub fn updates_prev(v: i32) -> bool {
    v != 0 && v != i32::MIN
}

/// Writes `v` against predecessor `prev` using difference encoding.
pub fn write_diff(w: &mut Writer, v: i32, prev: i32) {
    if v == 0 {
        w.write_varint(0);
        return;
    }
    if v == i32::MIN {
        // written as "-0"; the magnitude would overflow
        w.write_varint(2);
        return;
    }

    let abs_v = v.unsigned_abs() as u64;
    if (v > 0 && prev > 0) || (v < 0 && prev < 0) {
        // same sign, so the subtraction cannot overflow
        let diff = v - prev;
        let abs_diff = diff.unsigned_abs() as u64;
        let payload = if abs_v <= abs_diff {
            (abs_v << 2) | if v < 0 { 2 } else { 0 }
        } else {
            (abs_diff << 2) | if diff < 0 { 3 } else { 1 }
        };
        w.write_varint(payload);
        return;
    }
    // signs differ (or prev is 0): absolute form only
    w.write_varint((abs_v << 2) | if v < 0 { 2 } else { 0 });
}

/// Reads a difference-encoded value against predecessor `prev`.
pub fn read_diff(r: &mut Reader<'_>, prev: i32, context: &'static str) -> Result<i32, DecodeError> {
    let encoded = r.read_varint(context)?;
    let is_delta = encoded & 1 != 0;
    let is_negative = encoded & 2 != 0;
    let magnitude = encoded >> 2;
    if magnitude > i32::MAX as u64 {
        return Err(DecodeError::MalformedEncoding { context });
    }
    let mut v = magnitude as i32;
    if is_negative {
        if v == 0 {
            return Ok(i32::MIN);
        }
        v = -v;
    }
    if is_delta {
        v = v.wrapping_add(prev);
    }
    Ok(v)
}

/// Writes a long as two independently diff-encoded 32-bit halves.
pub fn write_long(hi: &mut Writer, lo: &mut Writer, v: i64, prev: i64) {
    write_diff(hi, ((v as u64) >> 32) as i32, ((prev as u64) >> 32) as i32);
    write_diff(lo, v as i32, prev as i32);
}

/// Reads a long written by [`write_long`].
pub fn read_long(
    hi: &mut Reader<'_>,
    lo: &mut Reader<'_>,
    prev: i64,
) -> Result<i64, DecodeError> {
    let vh = read_diff(hi, ((prev as u64) >> 32) as i32, "long high")?;
    let vl = read_diff(lo, prev as i32, "long low")?;
    Ok(((vh as i64) << 32) | (vl as u32 as i64))
}

/// Writes the raw bits of a float, split into exponent and mantissa+sign.
///
/// Zero raw bits collapse to the single sentinel exponent byte 0; otherwise
/// the stored exponent is the IEEE field plus one. The mantissa is
/// bit-reversed so its low-order bits (zero for short decimal fractions)
/// land adjacent in the stream, then the sign bit is appended.
pub fn write_float(exp: &mut Writer, mant: &mut Writer, raw: u32) {
    if raw == 0 {
        exp.write_varint(0);
        return;
    }
    let exponent = ((raw >> 23) & 0xFF) + 1; // 0 reserved for the zero value
    let rev_mants = ((raw & 0x007F_FFFF) << 9).reverse_bits();
    let mants = (rev_mants << 1) | (raw >> 31);
    exp.write_varint(exponent as u64);
    mant.write_varint(mants as u64);
}

/// Reads float raw bits written by [`write_float`].
pub fn read_float(exp: &mut Reader<'_>, mant: &mut Reader<'_>) -> Result<u32, DecodeError> {
    let exponent = exp.read_varint("float exponent")?;
    if exponent == 0 {
        return Ok(0);
    }
    if exponent > 256 {
        return Err(DecodeError::MalformedEncoding {
            context: "float exponent",
        });
    }
    let mants = mant.read_varint("float mantissa")?;
    if mants > u32::MAX as u64 {
        return Err(DecodeError::MalformedEncoding {
            context: "float mantissa",
        });
    }
    let mants = mants as u32;
    let sign = mants & 1;
    let mantissa = (mants >> 1).reverse_bits() >> 9;
    Ok(((exponent as u32 - 1) << 23) | mantissa | (sign << 31))
}

/// Writes the raw bits of a double.
///
/// Same shape as [`write_float`] with a 52-bit mantissa, except the
/// exponent is rebased around 1.0 (bias 1023) and sign-coded, since
/// magnitudes near one dominate typical numeric data.
pub fn write_double(exp: &mut Writer, mant: &mut Writer, raw: u64) {
    if raw == 0 {
        exp.write_varint(0);
        return;
    }
    let mut exponent = (((raw >> 52) & 0x7FF) as i64) - 1023;
    if exponent >= 0 {
        exponent += 1; // skip 0, reserved for the zero value
    }
    let rev_mants = ((raw & 0x000F_FFFF_FFFF_FFFF) << 12).reverse_bits();
    let mants = (rev_mants << 1) | (raw >> 63);
    exp.write_varint(encode_int_sign(exponent));
    mant.write_varint(mants);
}

/// Reads double raw bits written by [`write_double`].
pub fn read_double(exp: &mut Reader<'_>, mant: &mut Reader<'_>) -> Result<u64, DecodeError> {
    let exp_code = exp.read_varint("double exponent")?;
    if exp_code == 0 {
        return Ok(0);
    }
    let mut exponent = decode_int_sign(exp_code);
    if exponent > 0 {
        exponent -= 1;
    }
    exponent += 1023;
    if !(0..=0x7FF).contains(&exponent) {
        return Err(DecodeError::MalformedEncoding {
            context: "double exponent",
        });
    }
    let mants = mant.read_varint("double mantissa")?;
    let sign = mants & 1;
    let mantissa = (mants >> 1).reverse_bits() >> 12;
    Ok(((exponent as u64) << 52) | mantissa | (sign << 63))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn diff_roundtrip(v: i32, prev: i32) -> i32 {
        let mut w = Writer::new();
        write_diff(&mut w, v, prev);
        let mut r = Reader::new(w.as_bytes());
        read_diff(&mut r, prev, "test").unwrap()
    }

    #[test]
    fn test_diff_edge_values() {
        for prev in [0, 1, -1, 5, -5, i32::MAX, i32::MIN, i32::MIN + 1] {
            for v in [0, 1, -1, 2, -2, 100, -100, i32::MAX, i32::MIN, i32::MIN + 1] {
                assert_eq!(diff_roundtrip(v, prev), v, "v={} prev={}", v, prev);
            }
        }
    }

    #[test]
    fn test_diff_zero_is_one_byte_literal() {
        let mut w = Writer::new();
        write_diff(&mut w, 0, 123456);
        assert_eq!(w.as_bytes(), &[0]);
    }

    #[test]
    fn test_diff_min_int_is_sentinel() {
        let mut w = Writer::new();
        write_diff(&mut w, i32::MIN, 77);
        assert_eq!(w.as_bytes(), &[2]);
    }

    #[test]
    fn test_diff_prefers_smaller_delta() {
        // 1000 vs prev 999: |diff| = 1 beats |v| = 1000
        let mut w = Writer::new();
        write_diff(&mut w, 1000, 999);
        assert_eq!(w.as_bytes(), &[(1 << 2) | 1]);
    }

    #[test]
    fn test_diff_tie_favors_absolute() {
        // v = 2, prev = 1: |diff| = 1 < 2, delta wins
        let mut w = Writer::new();
        write_diff(&mut w, 2, 1);
        assert_eq!(w.as_bytes(), &[(1 << 2) | 1]);
        // v = 1, prev = 2: |v| = |diff| = 1, absolute wins the tie
        let mut w = Writer::new();
        write_diff(&mut w, 1, 2);
        assert_eq!(w.as_bytes(), &[1 << 2]);
    }

    #[test]
    fn test_diff_sign_mismatch_uses_absolute() {
        let mut w = Writer::new();
        write_diff(&mut w, 3, -1000);
        assert_eq!(w.as_bytes(), &[3 << 2]);
    }

    #[test]
    fn test_reserved_forms_do_not_update_prev() {
        assert!(!updates_prev(0));
        assert!(!updates_prev(i32::MIN));
        assert!(updates_prev(1));
        assert!(updates_prev(i32::MIN + 1));
    }

    #[test]
    fn test_long_roundtrip() {
        let values = [
            0i64,
            1,
            -1,
            0x0123_4567_89AB_CDEF,
            i64::MAX,
            i64::MIN,
            -42,
        ];
        let mut prev = 0i64;
        for &v in &values {
            let mut hi = Writer::new();
            let mut lo = Writer::new();
            write_long(&mut hi, &mut lo, v, prev);
            let mut hi_r = Reader::new(hi.as_bytes());
            let mut lo_r = Reader::new(lo.as_bytes());
            assert_eq!(read_long(&mut hi_r, &mut lo_r, prev).unwrap(), v);
            prev = v;
        }
    }

    fn float_roundtrip(raw: u32) -> u32 {
        let mut exp = Writer::new();
        let mut mant = Writer::new();
        write_float(&mut exp, &mut mant, raw);
        let mut exp_r = Reader::new(exp.as_bytes());
        let mut mant_r = Reader::new(mant.as_bytes());
        read_float(&mut exp_r, &mut mant_r).unwrap()
    }

    fn double_roundtrip(raw: u64) -> u64 {
        let mut exp = Writer::new();
        let mut mant = Writer::new();
        write_double(&mut exp, &mut mant, raw);
        let mut exp_r = Reader::new(exp.as_bytes());
        let mut mant_r = Reader::new(mant.as_bytes());
        read_double(&mut exp_r, &mut mant_r).unwrap()
    }

    #[test]
    fn test_float_special_values() {
        for f in [
            0.0f32,
            -0.0,
            1.0,
            -1.0,
            0.5,
            f32::INFINITY,
            f32::NEG_INFINITY,
            f32::NAN,
            f32::MIN_POSITIVE,
            f32::from_bits(1), // smallest subnormal
        ] {
            let raw = f.to_bits();
            assert_eq!(float_roundtrip(raw), raw, "bits {:#010x}", raw);
        }
        // NaN payloads must survive bit-exactly
        for raw in [0x7FC0_0001u32, 0xFF80_0000, 0x7F80_0001] {
            assert_eq!(float_roundtrip(raw), raw, "bits {:#010x}", raw);
        }
    }

    #[test]
    fn test_double_special_values() {
        for d in [
            0.0f64,
            -0.0,
            1.0,
            -1.0,
            0.5,
            2.0,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
            f64::MIN_POSITIVE,
            f64::from_bits(1),
        ] {
            let raw = d.to_bits();
            assert_eq!(double_roundtrip(raw), raw, "bits {:#018x}", raw);
        }
        for raw in [0x7FF8_0000_0000_0001u64, 0xFFF0_0000_0000_0000] {
            assert_eq!(double_roundtrip(raw), raw, "bits {:#018x}", raw);
        }
    }

    #[test]
    fn test_float_zero_is_single_byte() {
        let mut exp = Writer::new();
        let mut mant = Writer::new();
        write_float(&mut exp, &mut mant, 0);
        assert_eq!(exp.as_bytes(), &[0]);
        assert!(mant.is_empty());
    }

    proptest! {
        #[test]
        fn prop_diff_bijection(v in any::<i32>(), prev in any::<i32>()) {
            prop_assert_eq!(diff_roundtrip(v, prev), v);
        }

        #[test]
        fn prop_float_bits_roundtrip(raw in any::<u32>()) {
            prop_assert_eq!(float_roundtrip(raw), raw);
        }

        #[test]
        fn prop_double_bits_roundtrip(raw in any::<u64>()) {
            prop_assert_eq!(double_roundtrip(raw), raw);
        }

        #[test]
        fn prop_long_roundtrip(v in any::<i64>(), prev in any::<i64>()) {
            let mut hi = Writer::new();
            let mut lo = Writer::new();
            write_long(&mut hi, &mut lo, v, prev);
            let mut hi_r = Reader::new(hi.as_bytes());
            let mut lo_r = Reader::new(lo.as_bytes());
            prop_assert_eq!(read_long(&mut hi_r, &mut lo_r, prev).unwrap(), v);
        }
    }
}
