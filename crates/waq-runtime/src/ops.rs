//! Scalar numeric intrinsics with exact Wasm semantics.
//!
//! ## Float-to-integer truncation
//!
//! Rust's `as` cast from float to integer saturates and maps NaN to 0, which
//! is exactly `trunc_sat`. The trapping `trunc` family validates first: NaN
//! traps `InvalidConversion`, a value whose truncation is out of range traps
//! `IntegerOverflow`.
//!
//! ## Integer division / remainder
//!
//! Divide-by-zero traps `DivisionByZero`; `MIN / -1` traps
//! `IntegerOverflow`. `MIN rem -1` is 0 and does not trap.
//!
//! ## NaN handling
//!
//! `min`/`max` propagate NaN and order `-0.0` below `+0.0`. The native
//! variants return the NaN operand with its quiet bit set; the `_det`
//! variants (and `canonicalize_*`) produce the canonical NaN so that results
//! are bit-identical across hosts.

use crate::{WasmResult, WasmTrap};

/// Canonical quiet NaN for f32.
pub const CANONICAL_NAN_F32: u32 = 0x7FC0_0000;

/// Canonical quiet NaN for f64.
pub const CANONICAL_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

// ── Bit counting ─────────────────────────────────────────────────────────────

#[inline]
pub fn i32_clz(v: i32) -> i32 {
    v.leading_zeros() as i32
}

#[inline]
pub fn i32_ctz(v: i32) -> i32 {
    v.trailing_zeros() as i32
}

#[inline]
pub fn i32_popcnt(v: i32) -> i32 {
    v.count_ones() as i32
}

#[inline]
pub fn i64_clz(v: i64) -> i64 {
    v.leading_zeros() as i64
}

#[inline]
pub fn i64_ctz(v: i64) -> i64 {
    v.trailing_zeros() as i64
}

#[inline]
pub fn i64_popcnt(v: i64) -> i64 {
    v.count_ones() as i64
}

// ── Rotation ─────────────────────────────────────────────────────────────────
// The shift count is taken modulo the bit width, so negative and over-wide
// counts are valid.

#[inline]
pub fn i32_rotl(v: i32, shift: i32) -> i32 {
    v.rotate_left((shift as u32) & 31)
}

#[inline]
pub fn i32_rotr(v: i32, shift: i32) -> i32 {
    v.rotate_right((shift as u32) & 31)
}

#[inline]
pub fn i64_rotl(v: i64, shift: i64) -> i64 {
    v.rotate_left((shift as u64 & 63) as u32)
}

#[inline]
pub fn i64_rotr(v: i64, shift: i64) -> i64 {
    v.rotate_right((shift as u64 & 63) as u32)
}

// ── Sign extension ───────────────────────────────────────────────────────────

#[inline]
pub fn i32_extend8_s(v: i32) -> i32 {
    v as i8 as i32
}

#[inline]
pub fn i32_extend16_s(v: i32) -> i32 {
    v as i16 as i32
}

#[inline]
pub fn i64_extend8_s(v: i64) -> i64 {
    v as i8 as i64
}

#[inline]
pub fn i64_extend16_s(v: i64) -> i64 {
    v as i16 as i64
}

#[inline]
pub fn i64_extend32_s(v: i64) -> i64 {
    v as i32 as i64
}

// ── Integer division / remainder ─────────────────────────────────────────────

/// `i32.div_s`.
#[inline(never)]
pub fn i32_div_s(lhs: i32, rhs: i32) -> WasmResult<i32> {
    if rhs == 0 {
        return Err(WasmTrap::DivisionByZero);
    }
    lhs.checked_div(rhs).ok_or(WasmTrap::IntegerOverflow)
}

/// `i32.div_u`.
#[inline(never)]
pub fn i32_div_u(lhs: i32, rhs: i32) -> WasmResult<i32> {
    (lhs as u32)
        .checked_div(rhs as u32)
        .map(|v| v as i32)
        .ok_or(WasmTrap::DivisionByZero)
}

/// `i32.rem_s`. `wrapping_rem` yields 0 for `MIN rem -1`.
#[inline(never)]
pub fn i32_rem_s(lhs: i32, rhs: i32) -> WasmResult<i32> {
    if rhs == 0 {
        return Err(WasmTrap::DivisionByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

/// `i32.rem_u`.
#[inline(never)]
pub fn i32_rem_u(lhs: i32, rhs: i32) -> WasmResult<i32> {
    (lhs as u32)
        .checked_rem(rhs as u32)
        .map(|v| v as i32)
        .ok_or(WasmTrap::DivisionByZero)
}

/// `i64.div_s`.
#[inline(never)]
pub fn i64_div_s(lhs: i64, rhs: i64) -> WasmResult<i64> {
    if rhs == 0 {
        return Err(WasmTrap::DivisionByZero);
    }
    lhs.checked_div(rhs).ok_or(WasmTrap::IntegerOverflow)
}

/// `i64.div_u`.
#[inline(never)]
pub fn i64_div_u(lhs: i64, rhs: i64) -> WasmResult<i64> {
    (lhs as u64)
        .checked_div(rhs as u64)
        .map(|v| v as i64)
        .ok_or(WasmTrap::DivisionByZero)
}

/// `i64.rem_s`.
#[inline(never)]
pub fn i64_rem_s(lhs: i64, rhs: i64) -> WasmResult<i64> {
    if rhs == 0 {
        return Err(WasmTrap::DivisionByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

/// `i64.rem_u`.
#[inline(never)]
pub fn i64_rem_u(lhs: i64, rhs: i64) -> WasmResult<i64> {
    (lhs as u64)
        .checked_rem(rhs as u64)
        .map(|v| v as i64)
        .ok_or(WasmTrap::DivisionByZero)
}

// ── Trapping float → int truncation ──────────────────────────────────────────

// `$lo` and `$hi` are the nearest representable floats strictly outside the
// target range; anything in between truncates to a valid integer.
macro_rules! trapping_trunc {
    ($(#[$doc:meta])* $name:ident: $float:ty => $int:ty as $out:ty, $lo:expr, $hi:expr) => {
        $(#[$doc])*
        #[inline(never)]
        pub fn $name(v: $float) -> WasmResult<$out> {
            if v.is_nan() {
                return Err(WasmTrap::InvalidConversion);
            }
            if v <= $lo || v >= $hi {
                return Err(WasmTrap::IntegerOverflow);
            }
            Ok(v as $int as $out)
        }
    };
}

trapping_trunc!(
    /// `i32.trunc_f32_s`.
    i32_trunc_f32_s: f32 => i32 as i32, -2147483904.0f32, 2147483648.0f32
);
trapping_trunc!(
    /// `i32.trunc_f32_u`. `-0.9` truncates to 0 and is accepted.
    i32_trunc_f32_u: f32 => u32 as i32, -1.0f32, 4294967296.0f32
);
trapping_trunc!(
    /// `i32.trunc_f64_s`.
    i32_trunc_f64_s: f64 => i32 as i32, -2147483649.0f64, 2147483648.0f64
);
trapping_trunc!(
    /// `i32.trunc_f64_u`.
    i32_trunc_f64_u: f64 => u32 as i32, -1.0f64, 4294967296.0f64
);
trapping_trunc!(
    /// `i64.trunc_f32_s`.
    i64_trunc_f32_s: f32 => i64 as i64, -9223373136366403584.0f32, 9223372036854775808.0f32
);
trapping_trunc!(
    /// `i64.trunc_f32_u`.
    i64_trunc_f32_u: f32 => u64 as i64, -1.0f32, 18446744073709551616.0f32
);
trapping_trunc!(
    /// `i64.trunc_f64_s`.
    i64_trunc_f64_s: f64 => i64 as i64, -9223372036854777856.0f64, 9223372036854775808.0f64
);
trapping_trunc!(
    /// `i64.trunc_f64_u`.
    i64_trunc_f64_u: f64 => u64 as i64, -1.0f64, 18446744073709551616.0f64
);

// ── Saturating float → int truncation ────────────────────────────────────────

#[inline]
pub fn i32_trunc_sat_f32_s(v: f32) -> i32 {
    v as i32
}

#[inline]
pub fn i32_trunc_sat_f32_u(v: f32) -> i32 {
    v as u32 as i32
}

#[inline]
pub fn i32_trunc_sat_f64_s(v: f64) -> i32 {
    v as i32
}

#[inline]
pub fn i32_trunc_sat_f64_u(v: f64) -> i32 {
    v as u32 as i32
}

#[inline]
pub fn i64_trunc_sat_f32_s(v: f32) -> i64 {
    v as i64
}

#[inline]
pub fn i64_trunc_sat_f32_u(v: f32) -> i64 {
    v as u64 as i64
}

#[inline]
pub fn i64_trunc_sat_f64_s(v: f64) -> i64 {
    v as i64
}

#[inline]
pub fn i64_trunc_sat_f64_u(v: f64) -> i64 {
    v as u64 as i64
}

// ── Float unary ──────────────────────────────────────────────────────────────

#[inline]
pub fn f32_abs(v: f32) -> f32 {
    f32::from_bits(v.to_bits() & 0x7FFF_FFFF)
}

#[inline]
pub fn f32_neg(v: f32) -> f32 {
    f32::from_bits(v.to_bits() ^ 0x8000_0000)
}

#[inline]
pub fn f32_ceil(v: f32) -> f32 {
    v.ceil()
}

#[inline]
pub fn f32_floor(v: f32) -> f32 {
    v.floor()
}

#[inline]
pub fn f32_trunc(v: f32) -> f32 {
    v.trunc()
}

/// Round to nearest, ties to even.
#[inline]
pub fn f32_nearest(v: f32) -> f32 {
    v.round_ties_even()
}

#[inline]
pub fn f32_sqrt(v: f32) -> f32 {
    v.sqrt()
}

#[inline]
pub fn f64_abs(v: f64) -> f64 {
    f64::from_bits(v.to_bits() & 0x7FFF_FFFF_FFFF_FFFF)
}

#[inline]
pub fn f64_neg(v: f64) -> f64 {
    f64::from_bits(v.to_bits() ^ 0x8000_0000_0000_0000)
}

#[inline]
pub fn f64_ceil(v: f64) -> f64 {
    v.ceil()
}

#[inline]
pub fn f64_floor(v: f64) -> f64 {
    v.floor()
}

#[inline]
pub fn f64_trunc(v: f64) -> f64 {
    v.trunc()
}

/// Round to nearest, ties to even.
#[inline]
pub fn f64_nearest(v: f64) -> f64 {
    v.round_ties_even()
}

#[inline]
pub fn f64_sqrt(v: f64) -> f64 {
    v.sqrt()
}

// ── Float binary ─────────────────────────────────────────────────────────────

/// Magnitude of `a`, sign bit of `b`. NaN payloads pass through untouched.
#[inline]
pub fn f32_copysign(a: f32, b: f32) -> f32 {
    f32::from_bits((a.to_bits() & 0x7FFF_FFFF) | (b.to_bits() & 0x8000_0000))
}

#[inline]
pub fn f64_copysign(a: f64, b: f64) -> f64 {
    f64::from_bits(
        (a.to_bits() & 0x7FFF_FFFF_FFFF_FFFF) | (b.to_bits() & 0x8000_0000_0000_0000),
    )
}

#[inline]
fn quiet_f32(v: f32) -> f32 {
    f32::from_bits(v.to_bits() | 0x0040_0000)
}

#[inline]
fn quiet_f64(v: f64) -> f64 {
    f64::from_bits(v.to_bits() | 0x0008_0000_0000_0000)
}

/// `f32.min`: NaN-propagating, `-0.0 < +0.0`.
#[inline]
pub fn f32_min(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        return quiet_f32(a);
    }
    if b.is_nan() {
        return quiet_f32(b);
    }
    if a == b {
        // Equal values differ at most in the sign of zero; prefer negative.
        return f32::from_bits(a.to_bits() | b.to_bits());
    }
    if a < b {
        a
    } else {
        b
    }
}

/// `f32.max`: NaN-propagating, `-0.0 < +0.0`.
#[inline]
pub fn f32_max(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        return quiet_f32(a);
    }
    if b.is_nan() {
        return quiet_f32(b);
    }
    if a == b {
        return f32::from_bits(a.to_bits() & b.to_bits());
    }
    if a > b {
        a
    } else {
        b
    }
}

/// `f64.min`: NaN-propagating, `-0.0 < +0.0`.
#[inline]
pub fn f64_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        return quiet_f64(a);
    }
    if b.is_nan() {
        return quiet_f64(b);
    }
    if a == b {
        return f64::from_bits(a.to_bits() | b.to_bits());
    }
    if a < b {
        a
    } else {
        b
    }
}

/// `f64.max`: NaN-propagating, `-0.0 < +0.0`.
#[inline]
pub fn f64_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        return quiet_f64(a);
    }
    if b.is_nan() {
        return quiet_f64(b);
    }
    if a == b {
        return f64::from_bits(a.to_bits() & b.to_bits());
    }
    if a > b {
        a
    } else {
        b
    }
}

// ── Deterministic NaN profile ────────────────────────────────────────────────

/// Replace any NaN with the canonical quiet NaN.
#[inline]
pub fn canonicalize_f32(v: f32) -> f32 {
    if v.is_nan() {
        f32::from_bits(CANONICAL_NAN_F32)
    } else {
        v
    }
}

/// Replace any NaN with the canonical quiet NaN.
#[inline]
pub fn canonicalize_f64(v: f64) -> f64 {
    if v.is_nan() {
        f64::from_bits(CANONICAL_NAN_F64)
    } else {
        v
    }
}

#[inline]
pub fn f32_div_det(a: f32, b: f32) -> f32 {
    canonicalize_f32(a / b)
}

#[inline]
pub fn f32_sqrt_det(v: f32) -> f32 {
    canonicalize_f32(v.sqrt())
}

#[inline]
pub fn f32_min_det(a: f32, b: f32) -> f32 {
    canonicalize_f32(f32_min(a, b))
}

#[inline]
pub fn f32_max_det(a: f32, b: f32) -> f32 {
    canonicalize_f32(f32_max(a, b))
}

#[inline]
pub fn f64_div_det(a: f64, b: f64) -> f64 {
    canonicalize_f64(a / b)
}

#[inline]
pub fn f64_sqrt_det(v: f64) -> f64 {
    canonicalize_f64(v.sqrt())
}

#[inline]
pub fn f64_min_det(a: f64, b: f64) -> f64 {
    canonicalize_f64(f64_min(a, b))
}

#[inline]
pub fn f64_max_det(a: f64, b: f64) -> f64 {
    canonicalize_f64(f64_max(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clz_reference(v: u32) -> i32 {
        (0..32).rev().take_while(|bit| v & (1 << bit) == 0).count() as i32
    }

    fn ctz_reference(v: u32) -> i32 {
        (0..32).take_while(|bit| v & (1 << bit) == 0).count() as i32
    }

    // ── Bit counting ─────────────────────────────────────────────────────

    #[test]
    fn zero_counts_full_width() {
        assert_eq!(i32_clz(0), 32);
        assert_eq!(i32_ctz(0), 32);
        assert_eq!(i64_clz(0), 64);
        assert_eq!(i64_ctz(0), 64);
        assert_eq!(i32_popcnt(-1), 32);
        assert_eq!(i64_popcnt(-1), 64);
    }

    #[test]
    fn bit_counts_on_known_values() {
        assert_eq!(i32_clz(1), 31);
        assert_eq!(i32_ctz(i32::MIN), 31);
        assert_eq!(i64_clz(0x0000_0001_0000_0000), 31);
        assert_eq!(i32_popcnt(0x0F0F), 8);
    }

    proptest! {
        #[test]
        fn clz_matches_reference(v in any::<u32>()) {
            prop_assert_eq!(i32_clz(v as i32), clz_reference(v));
        }

        #[test]
        fn ctz_matches_reference(v in any::<u32>()) {
            prop_assert_eq!(i32_ctz(v as i32), ctz_reference(v));
        }

        #[test]
        fn rotr_then_rotl_is_identity(v in any::<i32>(), s in any::<i32>()) {
            prop_assert_eq!(i32_rotl(i32_rotr(v, s), s), v);
        }

        #[test]
        fn rotation_is_modulo_width(v in any::<i64>(), s in any::<i64>()) {
            prop_assert_eq!(i64_rotl(v, s), i64_rotl(v, s.rem_euclid(64)));
            prop_assert_eq!(i64_rotl(i64_rotr(v, s), s), v);
        }
    }

    #[test]
    fn rotation_edge_counts() {
        assert_eq!(i32_rotl(0x1234_5678, 0), 0x1234_5678);
        assert_eq!(i32_rotl(1, 33), 2);
        assert_eq!(i32_rotl(1, -1), i32::MIN);
        assert_eq!(i32_rotr(1, 1), i32::MIN);
        assert_eq!(i64_rotr(2, 65), 1);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(i32_extend8_s(0x80), -128);
        assert_eq!(i32_extend8_s(0x7F), 127);
        assert_eq!(i32_extend16_s(0xFFFF), -1);
        assert_eq!(i64_extend8_s(0x1FF), -1);
        assert_eq!(i64_extend16_s(0x8000), -32768);
        assert_eq!(i64_extend32_s(0xFFFF_FFFF), -1);
    }

    // ── Division ─────────────────────────────────────────────────────────

    #[test]
    fn division_traps() {
        assert_eq!(i32_div_s(5, 0), Err(WasmTrap::DivisionByZero));
        assert_eq!(i32_div_s(i32::MIN, -1), Err(WasmTrap::IntegerOverflow));
        assert_eq!(i64_div_s(i64::MIN, -1), Err(WasmTrap::IntegerOverflow));
        assert_eq!(i32_div_u(5, 0), Err(WasmTrap::DivisionByZero));
        assert_eq!(i64_rem_u(5, 0), Err(WasmTrap::DivisionByZero));
        assert_eq!(i32_rem_s(5, 0), Err(WasmTrap::DivisionByZero));
    }

    #[test]
    fn division_results() {
        assert_eq!(i32_div_s(-10, 3), Ok(-3));
        assert_eq!(i32_div_u(-1, 1), Ok(-1));
        assert_eq!(i32_rem_s(-10, 3), Ok(-1));
        assert_eq!(i64_div_u(17, 5), Ok(3));
        assert_eq!(i64_rem_s(17, -5), Ok(2));
    }

    #[test]
    fn min_rem_neg_one_is_zero() {
        assert_eq!(i32_rem_s(i32::MIN, -1), Ok(0));
        assert_eq!(i64_rem_s(i64::MIN, -1), Ok(0));
    }

    // ── Truncation ───────────────────────────────────────────────────────

    #[test]
    fn trapping_trunc_nan_is_invalid_conversion() {
        assert_eq!(i32_trunc_f32_s(f32::NAN), Err(WasmTrap::InvalidConversion));
        assert_eq!(i32_trunc_f64_u(f64::NAN), Err(WasmTrap::InvalidConversion));
        assert_eq!(i64_trunc_f32_u(f32::NAN), Err(WasmTrap::InvalidConversion));
        assert_eq!(i64_trunc_f64_s(f64::NAN), Err(WasmTrap::InvalidConversion));
    }

    #[test]
    fn trapping_trunc_bounds() {
        assert_eq!(i32_trunc_f32_s(2147483648.0), Err(WasmTrap::IntegerOverflow));
        assert_eq!(i32_trunc_f32_s(-2147483648.0), Ok(i32::MIN));
        assert_eq!(i32_trunc_f64_s(2147483647.9), Ok(i32::MAX));
        assert_eq!(i32_trunc_f64_s(-2147483648.9), Ok(i32::MIN));
        assert_eq!(i32_trunc_f64_s(-2147483649.0), Err(WasmTrap::IntegerOverflow));
        assert_eq!(i32_trunc_f64_u(4294967295.0), Ok(-1));
        assert_eq!(i32_trunc_f64_u(-0.9), Ok(0));
        assert_eq!(i32_trunc_f32_u(-1.0), Err(WasmTrap::IntegerOverflow));
        assert_eq!(i64_trunc_f64_s(-9223372036854775808.0), Ok(i64::MIN));
        assert_eq!(
            i64_trunc_f64_s(9223372036854775808.0),
            Err(WasmTrap::IntegerOverflow)
        );
        assert_eq!(i64_trunc_f32_s(f32::INFINITY), Err(WasmTrap::IntegerOverflow));
        assert_eq!(
            i64_trunc_f64_u(18446744073709551616.0),
            Err(WasmTrap::IntegerOverflow)
        );
    }

    #[test]
    fn saturating_trunc() {
        assert_eq!(i32_trunc_sat_f64_s(2147483648.0), i32::MAX);
        assert_eq!(i32_trunc_sat_f64_s(-2147483649.0), i32::MIN);
        assert_eq!(i32_trunc_sat_f32_s(f32::NAN), 0);
        assert_eq!(i32_trunc_sat_f32_u(-5.0), 0);
        assert_eq!(i32_trunc_sat_f32_u(f32::INFINITY), -1);
        assert_eq!(i32_trunc_sat_f64_u(1e12), -1);
        assert_eq!(i64_trunc_sat_f32_s(f32::NEG_INFINITY), i64::MIN);
        assert_eq!(i64_trunc_sat_f64_s(-1.9), -1);
        assert_eq!(i64_trunc_sat_f32_u(f32::NAN), 0);
        assert_eq!(i64_trunc_sat_f64_u(1e30), -1);
    }

    // ── Floats ───────────────────────────────────────────────────────────

    #[test]
    fn nearest_ties_to_even() {
        assert_eq!(f32_nearest(2.5), 2.0);
        assert_eq!(f32_nearest(3.5), 4.0);
        assert_eq!(f64_nearest(-0.5).to_bits(), (-0.0f64).to_bits());
        assert_eq!(f64_nearest(1.4), 1.0);
    }

    #[test]
    fn copysign_uses_raw_sign_bit() {
        assert_eq!(f32_copysign(1.0, -0.0), -1.0);
        assert_eq!(f64_copysign(-3.0, 0.0), 3.0);
        let negative_nan = f32::from_bits(0xFFC0_0000);
        assert_eq!(f32_copysign(2.0, negative_nan), -2.0);
        assert!(f64_copysign(f64::NAN, -1.0).is_sign_negative());
    }

    #[test]
    fn abs_and_neg_only_touch_the_sign() {
        let nan = f32::from_bits(0x7FA0_0001);
        assert_eq!(f32_neg(nan).to_bits(), 0xFFA0_0001);
        assert_eq!(f32_abs(f32_neg(nan)).to_bits(), 0x7FA0_0001);
        assert_eq!(f64_abs(-0.0).to_bits(), 0);
    }

    #[test]
    fn min_max_signed_zero() {
        assert!(f32_min(0.0, -0.0).is_sign_negative());
        assert!(f32_min(-0.0, 0.0).is_sign_negative());
        assert!(f32_max(-0.0, 0.0).is_sign_positive());
        assert!(f64_min(0.0, -0.0).is_sign_negative());
        assert!(f64_max(0.0, -0.0).is_sign_positive());
        assert_eq!(f64_min(1.0, 2.0), 1.0);
        assert_eq!(f32_max(1.0, 2.0), 2.0);
    }

    #[test]
    fn min_max_propagate_nan() {
        assert!(f32_min(f32::NAN, 1.0).is_nan());
        assert!(f32_max(1.0, f32::NAN).is_nan());
        assert!(f64_min(1.0, f64::NAN).is_nan());
        // a signaling payload comes back quieted
        let signaling = f32::from_bits(0x7F80_0001);
        assert_eq!(f32_min(signaling, 0.0).to_bits(), 0x7FC0_0001);
    }

    #[test]
    fn deterministic_profile_canonicalizes() {
        let odd_nan = f64::from_bits(0xFFF8_0000_0000_1234);
        assert_eq!(canonicalize_f64(odd_nan).to_bits(), CANONICAL_NAN_F64);
        assert_eq!(f32_div_det(0.0, 0.0).to_bits(), CANONICAL_NAN_F32);
        assert_eq!(f32_sqrt_det(-1.0).to_bits(), CANONICAL_NAN_F32);
        assert_eq!(f64_sqrt_det(-1.0).to_bits(), CANONICAL_NAN_F64);
        assert_eq!(f64_min_det(odd_nan, 1.0).to_bits(), CANONICAL_NAN_F64);
        assert_eq!(f32_max_det(f32::NAN, 1.0).to_bits(), CANONICAL_NAN_F32);
        assert_eq!(f64_div_det(1.0, 4.0), 0.25);
        assert_eq!(canonicalize_f32(1.5), 1.5);
    }
}
