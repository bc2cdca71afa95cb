//! Minimal GC heap: struct and array objects plus unboxed i31 values.
//!
//! Objects live in a bump arena of 64-bit slots that is never collected:
//! every object survives until the owning `Instance` is torn down. When the
//! arena is full its capacity doubles; if the host cannot provide that (or the configured
//! limit is reached) the guest traps with `OutOfMemory`, since there is no
//! collector that could reclaim space.
//!
//! Each object has a header (type index, kind, slot range) stored in a side
//! table; a reference is an index into that table rather than a pointer
//! offset, so field and length access stay O(1) without pointer arithmetic.
//!
//! Type tests compare `type_index` by exact equality. No subtype lattice is
//! modeled, so a cast to a supertype fails where the Wasm GC proposal
//! would succeed.

use crate::{WasmResult, WasmTrap};

/// A Wasm reference value (`anyref` and friends), 64 bits wide.
///
/// - `0` is null
/// - low bit `1`: an unboxed i31 in bits 1..=31, never dereferenced
/// - low bit `0`, non-zero: `(object_index + 1) << 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GcRef(u64);

impl GcRef {
    pub const NULL: GcRef = GcRef(0);

    /// Reinterpret a raw reference value produced by compiled code.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        GcRef(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_i31(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    fn from_index(index: usize) -> Self {
        GcRef(((index as u64) + 1) << 1)
    }

    #[inline]
    fn object_index(self) -> Option<usize> {
        if self.is_null() || self.is_i31() {
            return None;
        }
        Some(((self.0 >> 1) - 1) as usize)
    }
}

/// `ref.i31`: keep the low 31 bits of `value` and tag them.
#[inline]
pub fn ref_i31(value: i32) -> GcRef {
    GcRef((((value as u32) & 0x7FFF_FFFF) as u64) << 1 | 1)
}

/// `i31.get_s`: payload sign-extended from bit 30.
pub fn i31_get_s(r: GcRef) -> WasmResult<i32> {
    let bits = i31_payload(r)?;
    // Shift the 31-bit payload to the top and arithmetic-shift it back.
    Ok(((bits << 1) as i32) >> 1)
}

/// `i31.get_u`: payload zero-extended.
pub fn i31_get_u(r: GcRef) -> WasmResult<i32> {
    Ok(i31_payload(r)? as i32)
}

fn i31_payload(r: GcRef) -> WasmResult<u32> {
    if r.is_null() {
        return Err(WasmTrap::NullReference);
    }
    if !r.is_i31() {
        return Err(WasmTrap::CastFailure);
    }
    Ok(((r.0 >> 1) & 0x7FFF_FFFF) as u32)
}

/// `ref.is_null`.
#[inline]
pub fn ref_is_null(r: GcRef) -> i32 {
    r.is_null() as i32
}

/// `ref.eq`: identity for objects, value equality for i31.
#[inline]
pub fn ref_eq(a: GcRef, b: GcRef) -> i32 {
    (a == b) as i32
}

/// Packed storage types for `struct.get_s/u` and `array.get_s/u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packed {
    I8,
    I16,
}

impl Packed {
    fn extend(self, raw: u64, signed: bool) -> i32 {
        match (self, signed) {
            (Packed::I8, true) => raw as u8 as i8 as i32,
            (Packed::I8, false) => raw as u8 as i32,
            (Packed::I16, true) => raw as u16 as i16 as i32,
            (Packed::I16, false) => raw as u16 as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Struct,
    Array,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    type_index: u32,
    kind: ObjectKind,
    /// First slot in the arena.
    start: usize,
    /// Field count (struct) or element count (array).
    len: u32,
}

/// Bump-allocated object arena.
pub struct GcHeap {
    headers: Vec<Header>,
    slots: Vec<u64>,
    /// Upper bound on arena slots; `None` means "whatever the host gives".
    limit: Option<usize>,
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl GcHeap {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            slots: Vec::new(),
            limit: None,
        }
    }

    /// Heap that traps with `OutOfMemory` beyond `max_bytes` of field data.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            limit: Some(max_bytes / 8),
            ..Self::new()
        }
    }

    /// Number of live objects (all objects ever allocated).
    pub fn object_count(&self) -> usize {
        self.headers.len()
    }

    /// Bytes of field/element data handed out so far.
    pub fn used_bytes(&self) -> usize {
        self.slots.len() * 8
    }

    /// Reserve `words` zeroed slots, doubling the arena when it is full.
    fn bump(&mut self, words: usize) -> WasmResult<usize> {
        let start = self.slots.len();
        let end = start.checked_add(words).ok_or(WasmTrap::OutOfMemory)?;
        if self.limit.is_some_and(|limit| end > limit) {
            return Err(WasmTrap::OutOfMemory);
        }
        if end > self.slots.capacity() {
            let mut target = self.slots.capacity().max(64);
            while target < end {
                target = target.checked_mul(2).ok_or(WasmTrap::OutOfMemory)?;
            }
            if let Some(limit) = self.limit {
                target = target.min(limit);
            }
            self.slots
                .try_reserve_exact(target - start)
                .map_err(|_| WasmTrap::OutOfMemory)?;
            tracing::debug!(target: "waq::gc", capacity = self.slots.capacity(), "arena grown");
        }
        self.headers
            .try_reserve(1)
            .map_err(|_| WasmTrap::OutOfMemory)?;
        self.slots.resize(end, 0);
        Ok(start)
    }

    fn alloc(&mut self, type_index: u32, kind: ObjectKind, len: u32) -> WasmResult<GcRef> {
        let start = self.bump(len as usize)?;
        self.headers.push(Header {
            type_index,
            kind,
            start,
            len,
        });
        Ok(GcRef::from_index(self.headers.len() - 1))
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// `struct.new` with every field zeroed.
    pub fn struct_new(&mut self, type_index: u32, field_count: u32) -> WasmResult<GcRef> {
        self.alloc(type_index, ObjectKind::Struct, field_count)
    }

    /// `struct.new_default`: fields are already zero.
    pub fn struct_new_default(&mut self, type_index: u32, field_count: u32) -> WasmResult<GcRef> {
        self.struct_new(type_index, field_count)
    }

    /// `struct.new` with operand values.
    pub fn struct_new_with_fields(&mut self, type_index: u32, fields: &[i64]) -> WasmResult<GcRef> {
        let r = self.alloc(type_index, ObjectKind::Struct, fields.len() as u32)?;
        let range = self.slot_range(r)?;
        for (slot, &value) in self.slots[range].iter_mut().zip(fields) {
            *slot = value as u64;
        }
        Ok(r)
    }

    /// `array.new`: `length` elements, each `init` widened to 64 bits.
    pub fn array_new(&mut self, type_index: u32, init: i64, length: u32) -> WasmResult<GcRef> {
        let r = self.alloc(type_index, ObjectKind::Array, length)?;
        let range = self.slot_range(r)?;
        self.slots[range].fill(init as u64);
        Ok(r)
    }

    /// `array.new_default`.
    pub fn array_new_default(&mut self, type_index: u32, length: u32) -> WasmResult<GcRef> {
        self.alloc(type_index, ObjectKind::Array, length)
    }

    /// `array.new_fixed`.
    pub fn array_new_fixed(&mut self, type_index: u32, values: &[i64]) -> WasmResult<GcRef> {
        let r = self.alloc(type_index, ObjectKind::Array, values.len() as u32)?;
        let range = self.slot_range(r)?;
        for (slot, &value) in self.slots[range].iter_mut().zip(values) {
            *slot = value as u64;
        }
        Ok(r)
    }

    // ── Access ────────────────────────────────────────────────────────

    fn header(&self, r: GcRef) -> WasmResult<&Header> {
        if r.is_null() {
            return Err(WasmTrap::NullReference);
        }
        r.object_index()
            .and_then(|index| self.headers.get(index))
            .ok_or(WasmTrap::CastFailure)
    }

    fn slot_range(&self, r: GcRef) -> WasmResult<core::ops::Range<usize>> {
        let header = self.header(r)?;
        Ok(header.start..header.start + header.len as usize)
    }

    fn slot_of(&self, r: GcRef, kind: ObjectKind, index: u32) -> WasmResult<usize> {
        let header = self.header(r)?;
        if header.kind != kind {
            return Err(WasmTrap::CastFailure);
        }
        if index >= header.len {
            return Err(match kind {
                ObjectKind::Array => WasmTrap::ArrayOutOfBounds,
                ObjectKind::Struct => WasmTrap::OutOfBounds,
            });
        }
        Ok(header.start + index as usize)
    }

    /// `struct.get`: the raw 64-bit field slot.
    pub fn struct_get(&self, r: GcRef, field: u32) -> WasmResult<i64> {
        let slot = self.slot_of(r, ObjectKind::Struct, field)?;
        Ok(self.slots[slot] as i64)
    }

    /// `struct.get_s` on a packed field.
    pub fn struct_get_s(&self, r: GcRef, field: u32, packed: Packed) -> WasmResult<i32> {
        let slot = self.slot_of(r, ObjectKind::Struct, field)?;
        Ok(packed.extend(self.slots[slot], true))
    }

    /// `struct.get_u` on a packed field.
    pub fn struct_get_u(&self, r: GcRef, field: u32, packed: Packed) -> WasmResult<i32> {
        let slot = self.slot_of(r, ObjectKind::Struct, field)?;
        Ok(packed.extend(self.slots[slot], false))
    }

    /// `struct.set`.
    pub fn struct_set(&mut self, r: GcRef, field: u32, value: i64) -> WasmResult<()> {
        let slot = self.slot_of(r, ObjectKind::Struct, field)?;
        self.slots[slot] = value as u64;
        Ok(())
    }

    /// `array.len`.
    pub fn array_len(&self, r: GcRef) -> WasmResult<u32> {
        let header = self.header(r)?;
        if header.kind != ObjectKind::Array {
            return Err(WasmTrap::CastFailure);
        }
        Ok(header.len)
    }

    /// `array.get`.
    pub fn array_get(&self, r: GcRef, index: u32) -> WasmResult<i64> {
        let slot = self.slot_of(r, ObjectKind::Array, index)?;
        Ok(self.slots[slot] as i64)
    }

    /// `array.get_s` on packed elements.
    pub fn array_get_s(&self, r: GcRef, index: u32, packed: Packed) -> WasmResult<i32> {
        let slot = self.slot_of(r, ObjectKind::Array, index)?;
        Ok(packed.extend(self.slots[slot], true))
    }

    /// `array.get_u` on packed elements.
    pub fn array_get_u(&self, r: GcRef, index: u32, packed: Packed) -> WasmResult<i32> {
        let slot = self.slot_of(r, ObjectKind::Array, index)?;
        Ok(packed.extend(self.slots[slot], false))
    }

    /// `array.set`.
    pub fn array_set(&mut self, r: GcRef, index: u32, value: i64) -> WasmResult<()> {
        let slot = self.slot_of(r, ObjectKind::Array, index)?;
        self.slots[slot] = value as u64;
        Ok(())
    }

    /// `array.fill`: checked as a whole before writing.
    pub fn array_fill(&mut self, r: GcRef, offset: u32, value: i64, len: u32) -> WasmResult<()> {
        let range = self.array_range(r, offset, len)?;
        self.slots[range].fill(value as u64);
        Ok(())
    }

    /// `array.copy`: overlap-safe, checked as a whole before writing.
    pub fn array_copy(
        &mut self,
        dst: GcRef,
        dst_offset: u32,
        src: GcRef,
        src_offset: u32,
        len: u32,
    ) -> WasmResult<()> {
        let dst = self.array_range(dst, dst_offset, len)?;
        let src = self.array_range(src, src_offset, len)?;
        self.slots.copy_within(src, dst.start);
        Ok(())
    }

    fn array_range(&self, r: GcRef, offset: u32, len: u32) -> WasmResult<core::ops::Range<usize>> {
        let length = self.array_len(r)?;
        let end = offset.checked_add(len).ok_or(WasmTrap::ArrayOutOfBounds)?;
        if end > length {
            return Err(WasmTrap::ArrayOutOfBounds);
        }
        let start = self.header(r)?.start;
        Ok(start + offset as usize..start + end as usize)
    }

    // ── Type tests ────────────────────────────────────────────────────

    fn has_type(&self, r: GcRef, type_index: u32) -> bool {
        r.object_index()
            .and_then(|index| self.headers.get(index))
            .is_some_and(|header| header.type_index == type_index)
    }

    /// `ref.test (ref T)`: null is never an instance.
    pub fn ref_test(&self, r: GcRef, type_index: u32) -> i32 {
        self.has_type(r, type_index) as i32
    }

    /// `ref.test (ref null T)`: null always is.
    pub fn ref_test_null(&self, r: GcRef, type_index: u32) -> i32 {
        (r.is_null() || self.has_type(r, type_index)) as i32
    }

    /// `ref.cast (ref T)`.
    pub fn ref_cast(&self, r: GcRef, type_index: u32) -> WasmResult<GcRef> {
        if r.is_null() {
            return Err(WasmTrap::NullReference);
        }
        if !self.has_type(r, type_index) {
            return Err(WasmTrap::CastFailure);
        }
        Ok(r)
    }

    /// `ref.cast (ref null T)`: null passes through.
    pub fn ref_cast_null(&self, r: GcRef, type_index: u32) -> WasmResult<GcRef> {
        if r.is_null() {
            return Ok(r);
        }
        self.ref_cast(r, type_index)
    }
}
