//! Wasm tables: indirect call targets and reference slots.
//!
//! A Wasm table is a growable vector of nullable references. `call_indirect`
//! looks up an entry by index, checks its type signature, and dispatches.
//!
//! Compiled functions have heterogeneous native signatures, so entries are
//! type-erased `FuncRef`s: each carries a `type_index` (the Wasm type
//! section index) and a `func_index` the compiled code dispatches on after
//! the type check passes.
//!
//! Growth follows the same discipline as linear memory: overflow is checked
//! before the addition, the cap is `MAX_TABLE_SIZE` (or a lower configured
//! maximum), and new slots are always initialized.

use crate::{ConstructionError, WasmResult, WasmTrap, MAX_TABLE_SIZE};

/// A single table entry: a typed function reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef {
    /// Index into the module's type section. Used by `call_indirect` to
    /// verify the caller's expected signature matches the callee's actual
    /// signature. A mismatch is a trap (`IndirectCallTypeMismatch`).
    pub type_index: u32,
    /// Index into the module's function index space.
    pub func_index: u32,
}

impl FuncRef {
    pub const fn new(type_index: u32, func_index: u32) -> Self {
        Self {
            type_index,
            func_index,
        }
    }
}

/// Growable reference table.
///
/// Entries are `Option<FuncRef>`; `None` is the null reference (calling it
/// traps with `UndefinedElement`).
pub struct Table {
    entries: Vec<Option<FuncRef>>,
    max_size: u32,
}

impl Table {
    /// Create a table with `initial_size` null slots.
    ///
    /// # Errors
    /// Returns `TableInitialSizeExceedsMax` if `initial_size > max_size`.
    pub fn try_new(initial_size: u32, max_size: u32) -> Result<Self, ConstructionError> {
        let max_size = max_size.min(MAX_TABLE_SIZE);
        if initial_size > max_size {
            return Err(ConstructionError::TableInitialSizeExceedsMax {
                initial: initial_size,
                max: max_size,
            });
        }
        Ok(Self {
            entries: vec![None; initial_size as usize],
            max_size,
        })
    }

    /// Current number of slots.
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline(always)]
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Wasm `table.get`. Negative indices are out of range.
    #[inline]
    pub fn get(&self, index: i32) -> WasmResult<Option<FuncRef>> {
        let idx = usize::try_from(index).map_err(|_| WasmTrap::TableOutOfBounds)?;
        self.entries
            .get(idx)
            .copied()
            .ok_or(WasmTrap::TableOutOfBounds)
    }

    /// Wasm `table.set`. Negative indices are out of range.
    #[inline]
    pub fn set(&mut self, index: i32, entry: Option<FuncRef>) -> WasmResult<()> {
        let idx = usize::try_from(index).map_err(|_| WasmTrap::TableOutOfBounds)?;
        let slot = self
            .entries
            .get_mut(idx)
            .ok_or(WasmTrap::TableOutOfBounds)?;
        *slot = entry;
        Ok(())
    }

    /// Resolve a `call_indirect` target.
    ///
    /// - `TableOutOfBounds` if `index >= size`
    /// - `UndefinedElement` if the slot is null
    /// - `IndirectCallTypeMismatch` if the entry's type differs
    #[inline]
    pub fn call_target(&self, index: u32, expected_type: u32) -> WasmResult<FuncRef> {
        let entry = self
            .entries
            .get(index as usize)
            .ok_or(WasmTrap::TableOutOfBounds)?
            .ok_or(WasmTrap::UndefinedElement)?;
        if entry.type_index != expected_type {
            return Err(WasmTrap::IndirectCallTypeMismatch);
        }
        Ok(entry)
    }

    /// Write `entries` into consecutive slots starting at `base`
    /// (element segment initialization). Checked as a whole before writing.
    pub fn init_elements(&mut self, base: u32, entries: &[Option<FuncRef>]) -> WasmResult<()> {
        let range = self.checked_range(base, entries.len() as u32)?;
        self.entries[range].copy_from_slice(entries);
        Ok(())
    }

    /// Wasm `table.grow`: returns the previous size, or -1 on failure.
    pub fn grow(&mut self, delta: i32, init: Option<FuncRef>) -> i32 {
        let Ok(delta) = u32::try_from(delta) else {
            return -1;
        };
        let old = self.size();
        let Some(new) = old.checked_add(delta) else {
            return -1;
        };
        if new > self.max_size {
            return -1;
        }
        if self.entries.try_reserve_exact(delta as usize).is_err() {
            return -1;
        }
        self.entries.resize(new as usize, init);
        tracing::debug!(target: "waq::table", old, new, "table grown");
        old as i32
    }

    /// Wasm `table.fill`. Traps before writing if `dest + len` exceeds the
    /// current size.
    pub fn fill(&mut self, dest: u32, value: Option<FuncRef>, len: u32) -> WasmResult<()> {
        let range = self.checked_range(dest, len)?;
        self.entries[range].fill(value);
        Ok(())
    }

    /// `table.copy` within a single table (overlap-safe).
    pub fn copy_within(&mut self, dest: u32, src: u32, len: u32) -> WasmResult<()> {
        let src = self.checked_range(src, len)?;
        let dest = self.checked_range(dest, len)?;
        self.entries.copy_within(src, dest.start);
        Ok(())
    }

    /// `table.copy` between two distinct tables.
    pub fn copy_from(
        &mut self,
        src_table: &Table,
        dest: u32,
        src: u32,
        len: u32,
    ) -> WasmResult<()> {
        let src = src_table.checked_range(src, len)?;
        let dest = self.checked_range(dest, len)?;
        self.entries[dest].copy_from_slice(&src_table.entries[src]);
        Ok(())
    }

    fn checked_range(&self, start: u32, len: u32) -> WasmResult<core::ops::Range<usize>> {
        let end = start.checked_add(len).ok_or(WasmTrap::TableOutOfBounds)?;
        if end > self.size() {
            return Err(WasmTrap::TableOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }
}


// ── Kani Formal Verification Proofs ──────────────────────────────────────

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: get never panics, only returns Ok or Err.
    #[kani::proof]
    #[kani::unwind(5)]
    fn get_never_panics() {
        let table = Table::try_new(4, 8).unwrap();
        let index: i32 = kani::any();
        let _ = table.get(index);
    }

    /// Proof: grow respects the maximum size.
    #[kani::proof]
    #[kani::unwind(9)]
    fn grow_respects_max_size() {
        let mut table = Table::try_new(4, 8).unwrap();
        let delta: i32 = kani::any();
        let result = table.grow(delta, None);
        kani::assert(table.size() <= 8, "size never exceeds the maximum");
        if result < 0 {
            kani::assert(table.size() == 4, "failed grow leaves size unchanged");
        }
    }
}
