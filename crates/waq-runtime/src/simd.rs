//! Relaxed SIMD on 128-bit vectors, implemented lane by lane.
//!
//! Relaxed instructions leave some edge cases implementation-defined. Each
//! one here resolves them with a single fixed policy so results never vary
//! between hosts:
//!
//! | instruction                 | policy                                   |
//! |-----------------------------|------------------------------------------|
//! | `i8x16.relaxed_swizzle`     | index ≥ 16 selects 0                     |
//! | `*.relaxed_laneselect`      | bitwise select on the whole mask         |
//! | `f*.relaxed_min/max`        | same as scalar `min`/`max`               |
//! | `f*.relaxed_madd/nmadd`     | fused multiply-add, single rounding      |
//! | `i32x4.relaxed_trunc_*`     | saturating, NaN → 0                      |
//! | `i16x8.relaxed_q15mulr_s`   | saturating                               |
//! | `*.relaxed_dot_i8x16_i7x16` | second operand signed, wrapping sums     |
//!
//! Vectors are little-endian byte arrays, matching their layout in linear
//! memory.

use crate::ops;

/// A `v128` value.
pub type V128 = [u8; 16];

// ── Lane helpers ─────────────────────────────────────────────────────────────

fn i8_lanes(v: V128) -> [i8; 16] {
    v.map(|b| b as i8)
}

fn i16_lanes(v: V128) -> [i16; 8] {
    let mut lanes = [0i16; 8];
    for (lane, bytes) in lanes.iter_mut().zip(v.chunks_exact(2)) {
        *lane = i16::from_le_bytes([bytes[0], bytes[1]]);
    }
    lanes
}

fn from_i16_lanes(lanes: [i16; 8]) -> V128 {
    let mut v = [0u8; 16];
    for (bytes, lane) in v.chunks_exact_mut(2).zip(lanes) {
        bytes.copy_from_slice(&lane.to_le_bytes());
    }
    v
}

fn i32_lanes(v: V128) -> [i32; 4] {
    let mut lanes = [0i32; 4];
    for (lane, bytes) in lanes.iter_mut().zip(v.chunks_exact(4)) {
        *lane = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }
    lanes
}

fn from_i32_lanes(lanes: [i32; 4]) -> V128 {
    let mut v = [0u8; 16];
    for (bytes, lane) in v.chunks_exact_mut(4).zip(lanes) {
        bytes.copy_from_slice(&lane.to_le_bytes());
    }
    v
}

fn f32_lanes(v: V128) -> [f32; 4] {
    i32_lanes(v).map(|bits| f32::from_bits(bits as u32))
}

fn from_f32_lanes(lanes: [f32; 4]) -> V128 {
    from_i32_lanes(lanes.map(|f| f.to_bits() as i32))
}

fn f64_lanes(v: V128) -> [f64; 2] {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&v[..8]);
    hi.copy_from_slice(&v[8..]);
    [f64::from_le_bytes(lo), f64::from_le_bytes(hi)]
}

fn from_f64_lanes(lanes: [f64; 2]) -> V128 {
    let mut v = [0u8; 16];
    v[..8].copy_from_slice(&lanes[0].to_le_bytes());
    v[8..].copy_from_slice(&lanes[1].to_le_bytes());
    v
}

fn zip_f32(a: V128, b: V128, op: fn(f32, f32) -> f32) -> V128 {
    let (a, b) = (f32_lanes(a), f32_lanes(b));
    from_f32_lanes(std::array::from_fn(|i| op(a[i], b[i])))
}

fn zip_f64(a: V128, b: V128, op: fn(f64, f64) -> f64) -> V128 {
    let (a, b) = (f64_lanes(a), f64_lanes(b));
    from_f64_lanes([op(a[0], b[0]), op(a[1], b[1])])
}

// ── Lane selection ───────────────────────────────────────────────────────────

/// `i8x16.relaxed_swizzle`: `out[i] = a[s[i]]`, 0 for indices ≥ 16.
pub fn i8x16_relaxed_swizzle(a: V128, s: V128) -> V128 {
    s.map(|index| a.get(index as usize).copied().unwrap_or(0))
}

/// `i8x16/i16x8/i32x4/i64x2.relaxed_laneselect`: bits of `a` where `mask`
/// is set, bits of `b` elsewhere. Identical for every lane width.
pub fn v128_relaxed_laneselect(a: V128, b: V128, mask: V128) -> V128 {
    std::array::from_fn(|i| (a[i] & mask[i]) | (b[i] & !mask[i]))
}

// ── Float min/max and fused multiply-add ─────────────────────────────────────

pub fn f32x4_relaxed_min(a: V128, b: V128) -> V128 {
    zip_f32(a, b, ops::f32_min)
}

pub fn f32x4_relaxed_max(a: V128, b: V128) -> V128 {
    zip_f32(a, b, ops::f32_max)
}

pub fn f64x2_relaxed_min(a: V128, b: V128) -> V128 {
    zip_f64(a, b, ops::f64_min)
}

pub fn f64x2_relaxed_max(a: V128, b: V128) -> V128 {
    zip_f64(a, b, ops::f64_max)
}

/// `f32x4.relaxed_madd`: `a * b + c`, rounded once.
pub fn f32x4_relaxed_madd(a: V128, b: V128, c: V128) -> V128 {
    let (a, b, c) = (f32_lanes(a), f32_lanes(b), f32_lanes(c));
    from_f32_lanes(std::array::from_fn(|i| a[i].mul_add(b[i], c[i])))
}

/// `f32x4.relaxed_nmadd`: `-(a * b) + c`, rounded once.
pub fn f32x4_relaxed_nmadd(a: V128, b: V128, c: V128) -> V128 {
    let (a, b, c) = (f32_lanes(a), f32_lanes(b), f32_lanes(c));
    from_f32_lanes(std::array::from_fn(|i| (-a[i]).mul_add(b[i], c[i])))
}

pub fn f64x2_relaxed_madd(a: V128, b: V128, c: V128) -> V128 {
    let (a, b, c) = (f64_lanes(a), f64_lanes(b), f64_lanes(c));
    from_f64_lanes([a[0].mul_add(b[0], c[0]), a[1].mul_add(b[1], c[1])])
}

pub fn f64x2_relaxed_nmadd(a: V128, b: V128, c: V128) -> V128 {
    let (a, b, c) = (f64_lanes(a), f64_lanes(b), f64_lanes(c));
    from_f64_lanes([(-a[0]).mul_add(b[0], c[0]), (-a[1]).mul_add(b[1], c[1])])
}

// ── Truncation ───────────────────────────────────────────────────────────────

pub fn i32x4_relaxed_trunc_f32x4_s(a: V128) -> V128 {
    from_i32_lanes(f32_lanes(a).map(ops::i32_trunc_sat_f32_s))
}

pub fn i32x4_relaxed_trunc_f32x4_u(a: V128) -> V128 {
    from_i32_lanes(f32_lanes(a).map(ops::i32_trunc_sat_f32_u))
}

/// Two results in the low lanes, high lanes zero.
pub fn i32x4_relaxed_trunc_f64x2_s_zero(a: V128) -> V128 {
    let [x, y] = f64_lanes(a).map(ops::i32_trunc_sat_f64_s);
    from_i32_lanes([x, y, 0, 0])
}

pub fn i32x4_relaxed_trunc_f64x2_u_zero(a: V128) -> V128 {
    let [x, y] = f64_lanes(a).map(ops::i32_trunc_sat_f64_u);
    from_i32_lanes([x, y, 0, 0])
}

// ── Fixed-point and dot products ─────────────────────────────────────────────

/// `i16x8.relaxed_q15mulr_s`: `sat16((a * b + 0x4000) >> 15)`.
pub fn i16x8_relaxed_q15mulr_s(a: V128, b: V128) -> V128 {
    let (a, b) = (i16_lanes(a), i16_lanes(b));
    from_i16_lanes(std::array::from_fn(|i| {
        let product = (a[i] as i32) * (b[i] as i32);
        ((product + 0x4000) >> 15).clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }))
}

/// `i16x8.relaxed_dot_i8x16_i7x16_s`: adjacent signed byte products summed
/// pairwise into 16-bit lanes.
pub fn i16x8_relaxed_dot_i8x16_i7x16_s(a: V128, b: V128) -> V128 {
    let (a, b) = (i8_lanes(a), i8_lanes(b));
    from_i16_lanes(std::array::from_fn(|i| {
        let lo = (a[2 * i] as i16) * (b[2 * i] as i16);
        let hi = (a[2 * i + 1] as i16) * (b[2 * i + 1] as i16);
        lo.wrapping_add(hi)
    }))
}

/// `i32x4.relaxed_dot_i8x16_i7x16_add_s`: groups of four byte products
/// summed into 32-bit lanes, then `c` added.
pub fn i32x4_relaxed_dot_i8x16_i7x16_add_s(a: V128, b: V128, c: V128) -> V128 {
    let pairs = i16_lanes(i16x8_relaxed_dot_i8x16_i7x16_s(a, b));
    let c = i32_lanes(c);
    from_i32_lanes(std::array::from_fn(|i| {
        (pairs[2 * i] as i32)
            .wrapping_add(pairs[2 * i + 1] as i32)
            .wrapping_add(c[i])
    }))
}
