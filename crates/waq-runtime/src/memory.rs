//! WebAssembly linear memory: `LinearMemory`.
//!
//! The backing store is a `Vec<u8>` whose length is always exactly
//! `pages * PAGE_SIZE`. Growth reserves capacity fallibly, zero-fills the
//! new pages and only then commits the new page count, so a failed growth
//! leaves the previous contents and size untouched.
//!
//! Growth may reallocate. Any raw pointer taken with `as_ptr` /
//! `as_mut_ptr` is invalid after a successful `grow`.
//!
//! Addresses are `u64` so the same code serves memory32 and memory64
//! guests. Bounds checks compute `address + width` in 64-bit arithmetic:
//! a 32-bit sum could wrap and mask an out-of-range access.

use crate::{ConstructionError, WasmResult, WasmTrap, MAX_PAGES, PAGE_SIZE};

/// Linear memory for a single Wasm instance.
pub struct LinearMemory {
    /// Active bytes. `bytes.len() == pages as usize * PAGE_SIZE`.
    bytes: Vec<u8>,
    /// Number of currently active pages.
    pages: u32,
    /// Upper bound for `grow` (never above `MAX_PAGES`).
    max_pages: u32,
}

impl LinearMemory {
    /// Create a memory with `initial_pages` zeroed pages and the global
    /// maximum of `MAX_PAGES`.
    pub fn try_new(initial_pages: u32) -> Result<Self, ConstructionError> {
        Self::with_max(initial_pages, MAX_PAGES)
    }

    /// Create a memory with an explicit maximum (clamped to `MAX_PAGES`).
    ///
    /// # Errors
    /// - `MemoryInitialPagesExceedsMax` if `initial_pages > max_pages`
    /// - `AllocationFailed` if the host cannot provide the initial bytes
    pub fn with_max(initial_pages: u32, max_pages: u32) -> Result<Self, ConstructionError> {
        let max_pages = max_pages.min(MAX_PAGES);
        if initial_pages > max_pages {
            return Err(ConstructionError::MemoryInitialPagesExceedsMax {
                initial: initial_pages,
                max: max_pages,
            });
        }
        let mut memory = Self {
            bytes: Vec::new(),
            pages: 0,
            max_pages,
        };
        if memory.grow_pages(initial_pages).is_none() {
            return Err(ConstructionError::AllocationFailed);
        }
        Ok(memory)
    }

    /// Current number of active pages.
    #[inline(always)]
    pub fn page_count(&self) -> u32 {
        self.pages
    }

    /// Maximum number of pages this memory may grow to.
    #[inline(always)]
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Current active size in bytes.
    #[inline(always)]
    pub fn active_size(&self) -> usize {
        self.bytes.len()
    }

    /// Wasm `memory.size`: returns current page count.
    #[inline(always)]
    pub fn size(&self) -> i32 {
        self.pages as i32
    }

    /// memory64 `memory.size`.
    #[inline(always)]
    pub fn size64(&self) -> i64 {
        i64::from(self.pages)
    }

    /// Wasm `memory.grow`: returns the previous page count, or -1 on failure.
    ///
    /// Fails for a negative delta, when `old + delta` exceeds the maximum, or
    /// when the host refuses the allocation. Failure never traps.
    pub fn grow(&mut self, delta: i32) -> i32 {
        if delta < 0 {
            return -1;
        }
        match self.grow_pages(delta as u32) {
            Some(old) => old as i32,
            None => -1,
        }
    }

    /// memory64 `memory.grow`: same contract with 64-bit operands.
    pub fn grow64(&mut self, delta: i64) -> i64 {
        let Ok(delta) = u32::try_from(delta) else {
            return -1;
        };
        match self.grow_pages(delta) {
            Some(old) => i64::from(old),
            None => -1,
        }
    }

    fn grow_pages(&mut self, delta: u32) -> Option<u32> {
        let old = self.pages;
        // Overflow is checked before the sum is ever used.
        let new = old.checked_add(delta)?;
        if new > self.max_pages {
            tracing::trace!(target: "waq::memory", old, delta, max = self.max_pages, "grow refused");
            return None;
        }
        let new_len = new as usize * PAGE_SIZE;
        let additional = new_len - self.bytes.len();
        if self.bytes.try_reserve_exact(additional).is_err() {
            tracing::debug!(target: "waq::memory", old, delta, "host allocation failed");
            return None;
        }
        // Zero-init exactly the new pages.
        self.bytes.resize(new_len, 0);
        self.pages = new;
        tracing::debug!(target: "waq::memory", old, new, "memory grown");
        Some(old)
    }

    // ── Bulk memory operations ────────────────────────────────────────

    /// Wasm `memory.copy`: copy `len` bytes from `src` to `dst`.
    ///
    /// Semantics match `memmove`: overlapping source and destination regions
    /// are handled correctly. Traps (`OutOfBounds`) if either region extends
    /// beyond the current active memory, before any byte moves.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> WasmResult<()> {
        let src = checked_range(self.active_size(), src, len)?;
        let dst = checked_range(self.active_size(), dst, len)?;
        self.bytes.copy_within(src, dst.start);
        Ok(())
    }

    /// Wasm `memory.fill`: set `len` bytes at `dst` to the low byte of `value`.
    pub fn fill(&mut self, dst: u64, value: u8, len: u64) -> WasmResult<()> {
        let dst = checked_range(self.active_size(), dst, len)?;
        self.bytes[dst].fill(value);
        Ok(())
    }

    /// Bounds-checked view of `len` bytes at `addr`.
    #[inline]
    pub fn read_bytes(&self, addr: u64, len: u64) -> WasmResult<&[u8]> {
        let range = checked_range(self.active_size(), addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Bounds-checked mutable view of `len` bytes at `addr`.
    #[inline]
    pub fn bytes_mut(&mut self, addr: u64, len: u64) -> WasmResult<&mut [u8]> {
        let range = checked_range(self.active_size(), addr, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy `data` into linear memory at `addr` (data segments, host writes).
    ///
    /// # Errors
    /// Returns `Err(WasmTrap::OutOfBounds)` if `addr + data.len()` exceeds
    /// the active size; nothing is written in that case.
    #[inline]
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> WasmResult<()> {
        self.bytes_mut(addr, data.len() as u64)?
            .copy_from_slice(data);
        Ok(())
    }

    // ── Bounds-checked (safe) load/store ──────────────────────────────

    #[inline(always)]
    fn load<const N: usize>(&self, addr: u64) -> WasmResult<[u8; N]> {
        let s = self.read_bytes(addr, N as u64)?;
        s.try_into().map_err(|_| WasmTrap::OutOfBounds)
    }

    #[inline(always)]
    fn store<const N: usize>(&mut self, addr: u64, bytes: [u8; N]) -> WasmResult<()> {
        self.write_bytes(addr, &bytes)
    }

    /// `i32.load8_u` and friends.
    pub fn load_u8(&self, addr: u64) -> WasmResult<u8> {
        Ok(self.load::<1>(addr)?[0])
    }

    /// `i32.load8_s`.
    pub fn load_i8(&self, addr: u64) -> WasmResult<i8> {
        Ok(self.load::<1>(addr)?[0] as i8)
    }

    /// `i32.load16_u`.
    pub fn load_u16(&self, addr: u64) -> WasmResult<u16> {
        self.load(addr).map(u16::from_le_bytes)
    }

    /// `i32.load16_s`.
    pub fn load_i16(&self, addr: u64) -> WasmResult<i16> {
        self.load(addr).map(i16::from_le_bytes)
    }

    /// `i64.load32_u`.
    pub fn load_u32(&self, addr: u64) -> WasmResult<u32> {
        self.load(addr).map(u32::from_le_bytes)
    }

    pub fn load_i32(&self, addr: u64) -> WasmResult<i32> {
        self.load(addr).map(i32::from_le_bytes)
    }

    pub fn load_i64(&self, addr: u64) -> WasmResult<i64> {
        self.load(addr).map(i64::from_le_bytes)
    }

    pub fn load_f32(&self, addr: u64) -> WasmResult<f32> {
        self.load(addr).map(f32::from_le_bytes)
    }

    pub fn load_f64(&self, addr: u64) -> WasmResult<f64> {
        self.load(addr).map(f64::from_le_bytes)
    }

    /// `v128.load`.
    pub fn load_v128(&self, addr: u64) -> WasmResult<[u8; 16]> {
        self.load(addr)
    }

    /// `i32.store8` (low byte of the operand).
    pub fn store_u8(&mut self, addr: u64, value: u8) -> WasmResult<()> {
        self.store(addr, [value])
    }

    /// `i32.store16`.
    pub fn store_u16(&mut self, addr: u64, value: u16) -> WasmResult<()> {
        self.store(addr, value.to_le_bytes())
    }

    pub fn store_i32(&mut self, addr: u64, value: i32) -> WasmResult<()> {
        self.store(addr, value.to_le_bytes())
    }

    pub fn store_i64(&mut self, addr: u64, value: i64) -> WasmResult<()> {
        self.store(addr, value.to_le_bytes())
    }

    pub fn store_f32(&mut self, addr: u64, value: f32) -> WasmResult<()> {
        self.store(addr, value.to_le_bytes())
    }

    pub fn store_f64(&mut self, addr: u64, value: f64) -> WasmResult<()> {
        self.store(addr, value.to_le_bytes())
    }

    /// `v128.store`.
    pub fn store_v128(&mut self, addr: u64, value: [u8; 16]) -> WasmResult<()> {
        self.store(addr, value)
    }

    // ── Unchecked (trusted) load/store ────────────────────────────────
    //
    // For compiled code that already performed its own inlined bounds
    // check. The checked family above is the hardening layer that catches
    // bugs in that inlined logic.

    /// Load i32 without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee `addr + 4 <= active_size()`.
    #[inline(always)]
    pub unsafe fn load_i32_unchecked(&self, addr: usize) -> i32 {
        let ptr = self.bytes.as_ptr().add(addr) as *const i32;
        i32::from_le(ptr.read_unaligned())
    }

    /// Load i64 without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee `addr + 8 <= active_size()`.
    #[inline(always)]
    pub unsafe fn load_i64_unchecked(&self, addr: usize) -> i64 {
        let ptr = self.bytes.as_ptr().add(addr) as *const i64;
        i64::from_le(ptr.read_unaligned())
    }

    /// Store i32 without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee `addr + 4 <= active_size()`.
    #[inline(always)]
    pub unsafe fn store_i32_unchecked(&mut self, addr: usize, value: i32) {
        let ptr = self.bytes.as_mut_ptr().add(addr) as *mut i32;
        ptr.write_unaligned(value.to_le());
    }

    /// Store i64 without bounds checking.
    ///
    /// # Safety
    /// Caller must guarantee `addr + 8 <= active_size()`.
    #[inline(always)]
    pub unsafe fn store_i64_unchecked(&mut self, addr: usize, value: i64) {
        let ptr = self.bytes.as_mut_ptr().add(addr) as *mut i64;
        ptr.write_unaligned(value.to_le());
    }

    /// Base address for compiled code. Invalidated by `grow`.
    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// Mutable base address for compiled code. Invalidated by `grow`.
    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// Read-only access to the active memory region.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable access to the active memory region.
    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Validate `[addr, addr+len)` against `active_bytes` and return it as a
/// `usize` range. Returns `Err(OutOfBounds)` on overflow or out-of-range,
/// never panics.
#[inline(always)]
fn checked_range(
    active_bytes: usize,
    addr: u64,
    len: u64,
) -> WasmResult<core::ops::Range<usize>> {
    let end = addr.checked_add(len).ok_or(WasmTrap::OutOfBounds)?;
    if end > active_bytes as u64 {
        return Err(WasmTrap::OutOfBounds);
    }
    // end <= active_bytes, so both fit in usize.
    Ok(addr as usize..end as usize)
}


// ── Kani Formal Verification Proofs ──────────────────────────────────────
//
// Bounded model checks of the LinearMemory invariants. Run with:
// cargo kani -p waq-runtime

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: load_i32 never panics, and success implies an in-range access.
    #[kani::proof]
    #[kani::unwind(1)]
    fn load_i32_never_panics() {
        let mem = LinearMemory::with_max(1, 1).unwrap();
        let addr: u64 = kani::any();
        if mem.load_i32(addr).is_ok() {
            kani::assert(
                addr.checked_add(4).is_some_and(|end| end <= mem.active_size() as u64),
                "successful load must be within the active region",
            );
        }
    }

    /// Proof: store_i64 never panics for any address and value.
    #[kani::proof]
    #[kani::unwind(1)]
    fn store_i64_never_panics() {
        let mut mem = LinearMemory::with_max(1, 1).unwrap();
        let addr: u64 = kani::any();
        let value: i64 = kani::any();
        let _ = mem.store_i64(addr, value);
    }

    /// Proof: grow respects the maximum and leaves the size unchanged on failure.
    #[kani::proof]
    #[kani::unwind(3)]
    fn grow_respects_max_pages() {
        let mut mem = LinearMemory::with_max(1, 2).unwrap();
        let delta: i32 = kani::any();
        let old = mem.page_count();
        let result = mem.grow(delta);
        kani::assert(mem.page_count() <= 2, "pages never exceed the maximum");
        if result < 0 {
            kani::assert(mem.page_count() == old, "failed grow leaves pages unchanged");
        } else {
            kani::assert(result == old as i32, "grow returns old page count");
        }
        kani::assert(
            mem.active_size() == mem.page_count() as usize * PAGE_SIZE,
            "active_size = pages * PAGE_SIZE",
        );
    }

    /// Proof: store followed by load returns the same value (i32).
    #[kani::proof]
    #[kani::unwind(1)]
    fn store_load_roundtrip_i32() {
        let mut mem = LinearMemory::with_max(1, 1).unwrap();
        let addr: u64 = kani::any();
        let value: i32 = kani::any();
        if mem.store_i32(addr, value).is_ok() {
            kani::assert(mem.load_i32(addr) == Ok(value), "i32 roundtrip preserves value");
        }
    }
}
