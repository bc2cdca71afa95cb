//! `Instance`: all runtime state of one executing guest.
//!
//! Compiled functions take `&mut Instance` and reach memory, tables, the GC
//! heap and the exception stack through it. One instance is driven by one
//! host thread; the borrow checker enforces the single writer.
//!
//! The `i32` methods below are the guest ABI: they accept operands exactly as
//! compiled code holds them (addresses reinterpreted as unsigned) and
//! delegate to the typed subsystems.

use crate::exception::{ExceptionStack, Landing};
use crate::gc::GcHeap;
use crate::memory::LinearMemory;
use crate::ops;
use crate::segment::{DataSegments, ElementSegments};
use crate::table::{FuncRef, Table};
use crate::{
    ConstructionError, ExecResult, Exception, Unwind, WasmResult, WasmTrap, MAX_PAGES,
    MAX_TABLE_SIZE,
};

/// Slots in table 0 when the embedding does not say otherwise.
pub const DEFAULT_TABLE_SIZE: u32 = 64;

/// How NaN results of float arithmetic are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NanProfile {
    /// Whatever the host FPU yields; `min`/`max` return the quieted operand.
    #[default]
    Native,
    /// Every NaN result of `div`, `sqrt`, `min` and `max` is canonical.
    Deterministic,
}

/// Construction parameters for an `Instance`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub initial_pages: u32,
    pub max_pages: u32,
    pub table_size: u32,
    pub max_table_size: u32,
    /// Cap on GC field storage in bytes; `None` is bounded only by the host.
    pub gc_heap_limit: Option<usize>,
    pub nan_profile: NanProfile,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_pages: 1,
            max_pages: MAX_PAGES,
            table_size: DEFAULT_TABLE_SIZE,
            max_table_size: MAX_TABLE_SIZE,
            gc_heap_limit: None,
            nan_profile: NanProfile::Native,
        }
    }
}

pub struct Instance {
    pub memory: LinearMemory,
    /// Table 0 always exists; further tables come from `add_table`.
    pub tables: Vec<Table>,
    pub data: DataSegments,
    pub elements: ElementSegments,
    pub heap: GcHeap,
    pub exceptions: ExceptionStack,
    nan_profile: NanProfile,
}

impl Instance {
    /// Instantiate with `initial_pages` of memory (non-positive means one
    /// page) and the default table.
    pub fn init(initial_pages: i32) -> Result<Self, ConstructionError> {
        let initial_pages = u32::try_from(initial_pages)
            .ok()
            .filter(|pages| *pages > 0)
            .unwrap_or(1);
        Self::with_config(RuntimeConfig {
            initial_pages,
            ..RuntimeConfig::default()
        })
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, ConstructionError> {
        let memory = LinearMemory::with_max(config.initial_pages, config.max_pages)?;
        let table = Table::try_new(config.table_size, config.max_table_size)?;
        let heap = match config.gc_heap_limit {
            Some(limit) => GcHeap::with_limit(limit),
            None => GcHeap::new(),
        };
        tracing::debug!(
            target: "waq::instance",
            pages = config.initial_pages,
            table_size = config.table_size,
            profile = ?config.nan_profile,
            "instance created"
        );
        Ok(Self {
            memory,
            tables: vec![table],
            data: DataSegments::new(),
            elements: ElementSegments::new(),
            heap,
            exceptions: ExceptionStack::new(),
            nan_profile: config.nan_profile,
        })
    }

    /// Declare another table and return its index.
    pub fn add_table(&mut self, initial: u32, max: u32) -> Result<u32, ConstructionError> {
        self.tables.push(Table::try_new(initial, max)?);
        Ok((self.tables.len() - 1) as u32)
    }

    /// Release every resource the instance owns.
    pub fn teardown(self) {
        tracing::debug!(
            target: "waq::instance",
            pages = self.memory.page_count(),
            gc_objects = self.heap.object_count(),
            gc_bytes = self.heap.used_bytes(),
            "instance torn down"
        );
    }

    pub fn nan_profile(&self) -> NanProfile {
        self.nan_profile
    }

    // ── Memory ────────────────────────────────────────────────────────

    pub fn memory_size(&self) -> i32 {
        self.memory.size()
    }

    pub fn memory_grow(&mut self, delta: i32) -> i32 {
        self.memory.grow(delta)
    }

    pub fn memory_size64(&self) -> i64 {
        self.memory.size64()
    }

    pub fn memory_grow64(&mut self, delta: i64) -> i64 {
        self.memory.grow64(delta)
    }

    /// `memory.copy`. A non-positive length does nothing.
    pub fn memory_copy(&mut self, dst: i32, src: i32, len: i32) -> WasmResult<()> {
        if len <= 0 {
            return Ok(());
        }
        self.memory
            .copy(u64::from(dst as u32), u64::from(src as u32), len as u64)
    }

    /// `memory.fill` with the low byte of `value`. A non-positive length
    /// does nothing.
    pub fn memory_fill(&mut self, dst: i32, value: i32, len: i32) -> WasmResult<()> {
        if len <= 0 {
            return Ok(());
        }
        self.memory
            .fill(u64::from(dst as u32), value as u8, len as u64)
    }

    /// `memory.init`: copy `len` bytes at `src` of data segment `seg` to
    /// `dst`. Both ranges are checked before anything is written.
    pub fn memory_init(&mut self, seg: u32, dst: i32, src: i32, len: i32) -> WasmResult<()> {
        let bytes = self.data.slice(seg, src as u32, len as u32)?;
        self.memory.write_bytes(u64::from(dst as u32), bytes)
    }

    /// `data.drop`.
    pub fn data_drop(&mut self, seg: u32) -> WasmResult<()> {
        self.data.drop_segment(seg)
    }

    // ── Tables ────────────────────────────────────────────────────────

    pub fn table(&self, table: u32) -> WasmResult<&Table> {
        self.tables
            .get(table as usize)
            .ok_or(WasmTrap::TableOutOfBounds)
    }

    pub fn table_mut(&mut self, table: u32) -> WasmResult<&mut Table> {
        self.tables
            .get_mut(table as usize)
            .ok_or(WasmTrap::TableOutOfBounds)
    }

    pub fn table_get(&self, table: u32, index: i32) -> WasmResult<Option<FuncRef>> {
        self.table(table)?.get(index)
    }

    pub fn table_set(&mut self, table: u32, index: i32, value: Option<FuncRef>) -> WasmResult<()> {
        self.table_mut(table)?.set(index, value)
    }

    pub fn table_size(&self, table: u32) -> WasmResult<i32> {
        Ok(self.table(table)?.size() as i32)
    }

    /// `table.grow`: previous size, or -1 when the table cannot grow.
    pub fn table_grow(&mut self, table: u32, delta: i32, init: Option<FuncRef>) -> WasmResult<i32> {
        Ok(self.table_mut(table)?.grow(delta, init))
    }

    pub fn table_fill(
        &mut self,
        table: u32,
        dst: i32,
        value: Option<FuncRef>,
        len: i32,
    ) -> WasmResult<()> {
        self.table_mut(table)?.fill(dst as u32, value, len as u32)
    }

    /// `table.copy`, possibly between two different tables.
    pub fn table_copy(
        &mut self,
        dst_table: u32,
        src_table: u32,
        dst: i32,
        src: i32,
        len: i32,
    ) -> WasmResult<()> {
        let (dst, src, len) = (dst as u32, src as u32, len as u32);
        self.table(src_table)?;
        if dst_table == src_table {
            return self.table_mut(dst_table)?.copy_within(dst, src, len);
        }
        let (d, s) = (dst_table as usize, src_table as usize);
        if d >= self.tables.len() {
            return Err(WasmTrap::TableOutOfBounds);
        }
        if d < s {
            let (low, high) = self.tables.split_at_mut(s);
            low[d].copy_from(&high[0], dst, src, len)
        } else {
            let (low, high) = self.tables.split_at_mut(d);
            high[0].copy_from(&low[s], dst, src, len)
        }
    }

    /// `table.init` from element segment `seg`.
    pub fn table_init(
        &mut self,
        table: u32,
        seg: u32,
        dst: i32,
        src: i32,
        len: i32,
    ) -> WasmResult<()> {
        let entries = self.elements.slice(seg, src as u32, len as u32)?;
        self.tables
            .get_mut(table as usize)
            .ok_or(WasmTrap::TableOutOfBounds)?
            .init_elements(dst as u32, entries)
    }

    /// `elem.drop`.
    pub fn elem_drop(&mut self, seg: u32) -> WasmResult<()> {
        self.elements.drop_segment(seg)
    }

    /// Resolve the target of a `call_indirect` through `table`.
    #[inline]
    pub fn call_indirect(&self, table: u32, index: i32, expected_type: u32) -> WasmResult<FuncRef> {
        self.table(table)?.call_target(index as u32, expected_type)
    }

    // ── Float arithmetic under the instance's NaN profile ─────────────

    pub fn f32_div(&self, a: f32, b: f32) -> f32 {
        match self.nan_profile {
            NanProfile::Native => a / b,
            NanProfile::Deterministic => ops::f32_div_det(a, b),
        }
    }

    pub fn f64_div(&self, a: f64, b: f64) -> f64 {
        match self.nan_profile {
            NanProfile::Native => a / b,
            NanProfile::Deterministic => ops::f64_div_det(a, b),
        }
    }

    pub fn f32_sqrt(&self, v: f32) -> f32 {
        match self.nan_profile {
            NanProfile::Native => ops::f32_sqrt(v),
            NanProfile::Deterministic => ops::f32_sqrt_det(v),
        }
    }

    pub fn f64_sqrt(&self, v: f64) -> f64 {
        match self.nan_profile {
            NanProfile::Native => ops::f64_sqrt(v),
            NanProfile::Deterministic => ops::f64_sqrt_det(v),
        }
    }

    pub fn f32_min(&self, a: f32, b: f32) -> f32 {
        match self.nan_profile {
            NanProfile::Native => ops::f32_min(a, b),
            NanProfile::Deterministic => ops::f32_min_det(a, b),
        }
    }

    pub fn f32_max(&self, a: f32, b: f32) -> f32 {
        match self.nan_profile {
            NanProfile::Native => ops::f32_max(a, b),
            NanProfile::Deterministic => ops::f32_max_det(a, b),
        }
    }

    pub fn f64_min(&self, a: f64, b: f64) -> f64 {
        match self.nan_profile {
            NanProfile::Native => ops::f64_min(a, b),
            NanProfile::Deterministic => ops::f64_min_det(a, b),
        }
    }

    pub fn f64_max(&self, a: f64, b: f64) -> f64 {
        match self.nan_profile {
            NanProfile::Native => ops::f64_max(a, b),
            NanProfile::Deterministic => ops::f64_max_det(a, b),
        }
    }

    // ── Exceptions ────────────────────────────────────────────────────

    /// Run `body` under a fresh handler frame.
    ///
    /// An exception the frame catches is passed to `handler`, which runs
    /// with the frame still in place so `rethrow` can target it. The stack
    /// is restored to its prior depth however either closure returns.
    pub fn try_catch<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> ExecResult<T>,
        handler: impl FnOnce(&mut Self, Exception) -> ExecResult<T>,
    ) -> ExecResult<T> {
        let depth = self.exceptions.push_handler()?;
        let result = body(self);
        let outcome = match self.exceptions.land(depth, result) {
            Ok(Landing::Normal(value)) => Ok(value),
            Ok(Landing::Caught(exception)) => handler(self, exception),
            Err(unwind) => Err(unwind),
        };
        if depth == 1 {
            return self.exceptions.settle(outcome).map_err(Unwind::Trap);
        }
        self.exceptions.unwind_to(depth - 1);
        outcome
    }

    /// Call a guest export from the embedding. Exceptions that nothing
    /// caught surface as the `UncaughtException` trap; no handler frame
    /// outlives the call.
    pub fn invoke<T>(&mut self, export: impl FnOnce(&mut Self) -> ExecResult<T>) -> WasmResult<T> {
        let result = export(self);
        self.exceptions.settle(result)
    }

    /// `throw`: the returned value is meant to be propagated with `Err(..)?`.
    pub fn throw(&mut self, tag: u32, payload: &[u8]) -> Unwind {
        self.exceptions.throw(tag, payload)
    }

    /// `rethrow` of the exception being handled.
    pub fn rethrow(&mut self) -> Unwind {
        self.exceptions.rethrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_defaults() {
        let instance = Instance::init(0).unwrap();
        assert_eq!(instance.memory_size(), 1);
        assert_eq!(instance.table_size(0), Ok(DEFAULT_TABLE_SIZE as i32));
        assert_eq!(instance.nan_profile(), NanProfile::Native);
        let instance = Instance::init(-4).unwrap();
        assert_eq!(instance.memory_size(), 1);
        let instance = Instance::init(3).unwrap();
        assert_eq!(instance.memory_size64(), 3);
        instance.teardown();
    }

    #[test]
    fn config_initial_above_max_is_rejected() {
        let config = RuntimeConfig {
            initial_pages: 4,
            max_pages: 2,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            Instance::with_config(config),
            Err(ConstructionError::MemoryInitialPagesExceedsMax { initial: 4, max: 2 })
        ));
    }

    #[test]
    fn memory_bulk_ops_ignore_non_positive_len() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(instance.memory_copy(-1, -1, 0), Ok(()));
        assert_eq!(instance.memory_fill(-1, 7, -5), Ok(()));
        assert_eq!(instance.memory_fill(-1, 7, 1), Err(WasmTrap::OutOfBounds));
    }

    #[test]
    fn memory_fill_and_copy() {
        let mut instance = Instance::init(1).unwrap();
        instance.memory_fill(10, 0x1AB, 4).unwrap();
        assert_eq!(instance.memory.load_u32(10), Ok(0xABAB_ABAB));
        instance.memory_copy(12, 10, 4).unwrap();
        assert_eq!(instance.memory.load_u8(15), Ok(0xAB));
        assert_eq!(instance.memory.load_u8(16), Ok(0));
    }

    #[test]
    fn memory_init_and_drop() {
        let mut instance = Instance::init(1).unwrap();
        let seg = instance.data.register(&b"hello world"[..]).unwrap();
        instance.memory_init(seg, 100, 6, 5).unwrap();
        assert_eq!(instance.memory.read_bytes(100, 5), Ok(&b"world"[..]));
        assert_eq!(instance.memory_init(seg, 0, 8, 5), Err(WasmTrap::OutOfBounds));
        assert_eq!(
            instance.memory_init(seg, 65534, 0, 5),
            Err(WasmTrap::OutOfBounds)
        );
        instance.data_drop(seg).unwrap();
        assert_eq!(instance.memory_init(seg, 0, 0, 1), Err(WasmTrap::OutOfBounds));
        assert_eq!(instance.data_drop(seg), Ok(()));
        assert_eq!(instance.data_drop(seg + 1), Err(WasmTrap::OutOfBounds));
    }

    #[test]
    fn unknown_table_traps() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(instance.table_size(1), Err(WasmTrap::TableOutOfBounds));
        assert_eq!(instance.table_grow(3, 1, None), Err(WasmTrap::TableOutOfBounds));
        assert_eq!(
            instance.call_indirect(1, 0, 0),
            Err(WasmTrap::TableOutOfBounds)
        );
    }

    #[test]
    fn table_init_from_elements() {
        let mut instance = Instance::init(1).unwrap();
        let seg = instance
            .elements
            .register(vec![Some(FuncRef::new(0, 1)), Some(FuncRef::new(1, 2))])
            .unwrap();
        instance.table_init(0, seg, 10, 0, 2).unwrap();
        assert_eq!(instance.call_indirect(0, 11, 1).map(|f| f.func_index), Ok(2));
        instance.elem_drop(seg).unwrap();
        assert_eq!(
            instance.table_init(0, seg, 0, 0, 1),
            Err(WasmTrap::TableOutOfBounds)
        );
    }

    #[test]
    fn table_copy_between_tables() {
        let mut instance = Instance::init(1).unwrap();
        let second = instance.add_table(4, 8).unwrap();
        instance.table_set(0, 5, Some(FuncRef::new(2, 9))).unwrap();
        instance.table_copy(second, 0, 1, 5, 1).unwrap();
        assert_eq!(instance.table_get(second, 1), Ok(Some(FuncRef::new(2, 9))));
        instance.table_copy(0, second, 0, 1, 1).unwrap();
        assert_eq!(instance.table_get(0, 0), Ok(Some(FuncRef::new(2, 9))));
        assert_eq!(
            instance.table_copy(second, 0, 3, 0, 2),
            Err(WasmTrap::TableOutOfBounds)
        );
        assert_eq!(
            instance.table_copy(7, 0, 0, 0, 0),
            Err(WasmTrap::TableOutOfBounds)
        );
    }

    #[test]
    fn table_fill_guest_abi() {
        let mut instance = Instance::init(1).unwrap();
        let f = Some(FuncRef::new(0, 0));
        instance.table_fill(0, 60, f, 4).unwrap();
        assert_eq!(instance.table_get(0, 63), Ok(f));
        assert_eq!(
            instance.table_fill(0, 62, f, 3),
            Err(WasmTrap::TableOutOfBounds)
        );
    }

    #[test]
    fn deterministic_profile_changes_nan_bits() {
        let native = Instance::init(1).unwrap();
        let det = Instance::with_config(RuntimeConfig {
            nan_profile: NanProfile::Deterministic,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let odd = f32::from_bits(0xFFC0_0001);
        assert_eq!(native.f32_min(odd, 1.0).to_bits(), 0xFFC0_0001);
        assert_eq!(det.f32_min(odd, 1.0).to_bits(), ops::CANONICAL_NAN_F32);
        assert_eq!(det.f64_div(0.0, 0.0).to_bits(), ops::CANONICAL_NAN_F64);
        assert_eq!(det.f64_sqrt(4.0), 2.0);
        assert_eq!(native.f64_max(1.0, 2.0), 2.0);
    }

    #[test]
    fn try_catch_restores_depth() {
        let mut instance = Instance::init(1).unwrap();
        let value = instance
            .try_catch(
                |inst| Err(inst.throw(5, &42i32.to_le_bytes())),
                |_, exception| {
                    assert_eq!(exception.tag, 5);
                    Ok(i32::from_le_bytes(exception.payload()[..4].try_into().unwrap()))
                },
            )
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(instance.exceptions.depth(), 0);
        assert_eq!(instance.exceptions.current_exception_tag(), None);
    }

    #[test]
    fn nested_rethrow_reaches_outer_handler() {
        let mut instance = Instance::init(1).unwrap();
        let caught = instance
            .try_catch(
                |inst| {
                    inst.try_catch(
                        |inst| -> ExecResult<u32> { Err(inst.throw(1, &[9, 9])) },
                        |inst, _| Err(inst.rethrow()),
                    )
                },
                |_, exception| Ok(exception.tag * 100 + exception.payload()[1] as u32),
            )
            .unwrap();
        assert_eq!(caught, 109);
        assert_eq!(instance.exceptions.depth(), 0);
    }

    #[test]
    fn uncaught_throw_is_a_trap() {
        let mut instance = Instance::init(1).unwrap();
        let result: ExecResult<()> = instance.try_catch(
            |inst| Err(inst.throw(2, &[])),
            |inst, _| Err(inst.throw(3, &[])),
        );
        assert_eq!(
            result,
            Err(Unwind::Trap(WasmTrap::UncaughtException { tag: 3 }))
        );
        assert_eq!(instance.exceptions.depth(), 0);
    }

    #[test]
    fn stray_exception_marker_becomes_a_trap() {
        let mut instance = Instance::init(1).unwrap();
        let escaped: ExecResult<()> = instance.try_catch(
            |inst| {
                // recorded in an inner frame that is abandoned without landing
                inst.exceptions.push_handler()?;
                Err(inst.throw(8, &[]))
            },
            |_, _| Ok(()),
        );
        assert_eq!(
            escaped,
            Err(Unwind::Trap(WasmTrap::UncaughtException { tag: 8 }))
        );
        assert_eq!(instance.exceptions.depth(), 0);

        let forged = instance.invoke(|_| -> ExecResult<i32> { Err(Unwind::Exception) });
        assert_eq!(forged, Err(WasmTrap::UncaughtException { tag: 0 }));
        assert_eq!(instance.invoke(|inst| Ok(inst.memory_size())), Ok(1));
    }

    #[test]
    fn traps_are_not_caught() {
        let mut instance = Instance::init(1).unwrap();
        let result: ExecResult<i32> = instance.try_catch(
            |inst| Ok(inst.memory.load_i32(70_000)?),
            |_, _| Ok(0),
        );
        assert_eq!(result, Err(Unwind::Trap(WasmTrap::OutOfBounds)));
    }
}
