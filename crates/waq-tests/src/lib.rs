//! Hand-lowered guest modules.
//!
//! Each submodule is the Rust the ahead-of-time compiler produces for one
//! small Wasm program: a `Module` owning its `Instance`, a `new()`
//! constructor that applies the data and element segments, and one method
//! per export. The tests and benchmarks in this crate drive them.

use waq_runtime::{ConstructionError, Instance};

/// Plain-Rust Fibonacci, the baseline for `fib::Module::fibo`.
pub fn fibo_orig(n: i32) -> i32 {
    if n <= 1 {
        n
    } else {
        let mut a: i32 = 0;
        let mut b: i32 = 1;
        for _ in 2..=n {
            let tmp = a.wrapping_add(b);
            a = b;
            b = tmp;
        }
        b
    }
}

/// Plain-Rust baseline for `memory_grow::Module::mem_fill_sort_sum`.
pub fn mem_fill_sort_sum_orig(n: i32, seed: i32) -> i32 {
    let mut values: Vec<i32> = Vec::with_capacity(n.max(0) as usize);
    let mut state = seed;
    for _ in 0..n {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        values.push(state >> 16);
    }
    values.sort_unstable();
    values.iter().fold(0i32, |acc, &v| acc.wrapping_add(v))
}

fn instance(pages: i32) -> Result<Instance, ConstructionError> {
    Instance::init(pages)
}

// ── fib ─────────────────────────────────────────────────────────────────
//
//   (func (export "fibo") (param $n i32) (result i32)
//     (local $a i32) (local $b i32) (local $i i32) (local $t i32) ...)

pub mod fib {
    use waq_runtime::{ConstructionError, WasmResult};

    /// No memory, tables or tags: nothing to hold.
    pub struct Module;

    pub fn new() -> Result<Module, ConstructionError> {
        Ok(Module)
    }

    impl Module {
        pub fn fibo(&mut self, n: i32) -> WasmResult<i32> {
            if n <= 1 {
                return Ok(n);
            }
            let mut a: i32 = 0;
            let mut b: i32 = 1;
            let mut i: i32 = 2;
            loop {
                if i > n {
                    break;
                }
                let t = a.wrapping_add(b);
                a = b;
                b = t;
                i = i.wrapping_add(1);
            }
            Ok(b)
        }
    }
}

// ── memory_grow ─────────────────────────────────────────────────────────
//
//   (memory 1 2)
//   (func (export "get_size") (result i32) memory.size)
//   (func (export "grow") (param i32) (result i32) local.get 0 memory.grow)
//   (func (export "store_and_load") (param $addr i32) (param $v i32) (result i32) ...)
//   (func (export "sum_array") (param $ptr i32) (param $len i32) (result i32) ...)
//   (func (export "mem_fill_sort_sum") (param $n i32) (param $seed i32) (result i32) ...)

pub mod memory_grow {
    use waq_runtime::{ConstructionError, Instance, RuntimeConfig, WasmResult};

    pub const MAX_PAGES: u32 = 2;

    pub struct Module {
        instance: Instance,
    }

    pub fn new() -> Result<Module, ConstructionError> {
        let instance = Instance::with_config(RuntimeConfig {
            initial_pages: 1,
            max_pages: MAX_PAGES,
            ..RuntimeConfig::default()
        })?;
        Ok(Module { instance })
    }

    #[inline]
    fn addr(base: i32, index: i32) -> u64 {
        u64::from((base as u32).wrapping_add((index as u32).wrapping_mul(4)))
    }

    impl Module {
        pub fn get_size(&mut self) -> WasmResult<i32> {
            Ok(self.instance.memory_size())
        }

        pub fn grow(&mut self, delta: i32) -> WasmResult<i32> {
            Ok(self.instance.memory_grow(delta))
        }

        pub fn store_and_load(&mut self, address: i32, value: i32) -> WasmResult<i32> {
            let ea = u64::from(address as u32);
            self.instance.memory.store_i32(ea, value)?;
            self.instance.memory.load_i32(ea)
        }

        pub fn sum_array(&mut self, ptr: i32, len: i32) -> WasmResult<i32> {
            let mut sum: i32 = 0;
            let mut i: i32 = 0;
            while i < len {
                sum = sum.wrapping_add(self.instance.memory.load_i32(addr(ptr, i))?);
                i = i.wrapping_add(1);
            }
            Ok(sum)
        }

        /// Fill `n` words from an LCG, insertion-sort them in place, sum them.
        pub fn mem_fill_sort_sum(&mut self, n: i32, seed: i32) -> WasmResult<i32> {
            let mem = &mut self.instance.memory;
            let mut state = seed;
            let mut i: i32 = 0;
            while i < n {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                mem.store_i32(addr(0, i), state >> 16)?;
                i = i.wrapping_add(1);
            }
            let mut i: i32 = 1;
            while i < n {
                let key = mem.load_i32(addr(0, i))?;
                let mut j = i - 1;
                while j >= 0 {
                    let v = mem.load_i32(addr(0, j))?;
                    if v <= key {
                        break;
                    }
                    mem.store_i32(addr(0, j + 1), v)?;
                    j -= 1;
                }
                mem.store_i32(addr(0, j + 1), key)?;
                i = i.wrapping_add(1);
            }
            self.sum_array(0, n)
        }
    }
}

// ── indirect_call ───────────────────────────────────────────────────────
//
//   (type $binop (func (param i32 i32) (result i32)))
//   (type $unop (func (param i32) (result i32)))
//   (table 4 funcref)
//   (elem (i32.const 0) $add $sub $mul $negate)
//   (func (export "dispatch_binop") (param i32 i32 i32) (result i32) ... call_indirect (type $binop))
//   (func (export "dispatch_unop") (param i32 i32) (result i32) ... call_indirect (type $unop))

pub mod indirect_call {
    use waq_runtime::{FuncRef, Instance, InstantiationError, WasmResult, WasmTrap};

    pub const TYPE_BINOP: u32 = 0;
    pub const TYPE_UNOP: u32 = 1;

    pub struct Module {
        instance: Instance,
    }

    /// Instantiate, running the active element segment.
    pub fn new() -> Result<Module, InstantiationError> {
        let mut instance = super::instance(1)?;
        let seg = instance.elements.register(vec![
            Some(FuncRef::new(TYPE_BINOP, 0)),
            Some(FuncRef::new(TYPE_BINOP, 1)),
            Some(FuncRef::new(TYPE_BINOP, 2)),
            Some(FuncRef::new(TYPE_UNOP, 3)),
        ])?;
        instance.table_init(0, seg, 0, 0, 4)?;
        instance.elem_drop(seg)?;
        Ok(Module { instance })
    }

    fn func_0(a: i32, b: i32) -> WasmResult<i32> {
        Ok(a.wrapping_add(b))
    }

    fn func_1(a: i32, b: i32) -> WasmResult<i32> {
        Ok(a.wrapping_sub(b))
    }

    fn func_2(a: i32, b: i32) -> WasmResult<i32> {
        Ok(a.wrapping_mul(b))
    }

    fn func_3(a: i32) -> WasmResult<i32> {
        Ok(a.wrapping_neg())
    }

    impl Module {
        pub fn dispatch_binop(&mut self, a: i32, b: i32, op: i32) -> WasmResult<i32> {
            let target = self.instance.call_indirect(0, op, TYPE_BINOP)?;
            match target.func_index {
                0 => func_0(a, b),
                1 => func_1(a, b),
                2 => func_2(a, b),
                _ => Err(WasmTrap::IndirectCallTypeMismatch),
            }
        }

        pub fn dispatch_unop(&mut self, a: i32, op: i32) -> WasmResult<i32> {
            let target = self.instance.call_indirect(0, op, TYPE_UNOP)?;
            match target.func_index {
                3 => func_3(a),
                _ => Err(WasmTrap::IndirectCallTypeMismatch),
            }
        }

        /// `table.set 0` from the guest side.
        pub fn install(&mut self, slot: i32, func_index: Option<u32>) -> WasmResult<()> {
            let entry = func_index.map(|index| {
                let ty = if index == 3 { TYPE_UNOP } else { TYPE_BINOP };
                FuncRef::new(ty, index)
            });
            self.instance.table_set(0, slot, entry)
        }
    }
}

// ── gc_list ─────────────────────────────────────────────────────────────
//
//   (type $node (struct (field $value i64) (field $next (ref null $node))))
//   (type $words (array (mut i64)))
//   (func (export "build") (param $n i32) (result (ref null $node)) ...)
//   (func (export "sum") (param (ref null $node)) (result i64) ...)
//   (func (export "head") (param (ref null $node)) (result i64) ...)
//   (func (export "squares") (param $n i32) (result i64) ...)

pub mod gc_list {
    use waq_runtime::{ConstructionError, GcRef, Instance, RuntimeConfig, WasmResult};

    pub const TYPE_NODE: u32 = 0;
    pub const TYPE_WORDS: u32 = 1;
    const FIELD_VALUE: u32 = 0;
    const FIELD_NEXT: u32 = 1;

    pub struct Module {
        instance: Instance,
    }

    pub fn new() -> Result<Module, ConstructionError> {
        Ok(Module {
            instance: super::instance(1)?,
        })
    }

    /// Module whose GC heap traps beyond `limit` bytes.
    pub fn with_heap_limit(limit: usize) -> Result<Module, ConstructionError> {
        let instance = Instance::with_config(RuntimeConfig {
            gc_heap_limit: Some(limit),
            ..RuntimeConfig::default()
        })?;
        Ok(Module { instance })
    }

    impl Module {
        pub fn cons(&mut self, value: i64, next: GcRef) -> WasmResult<GcRef> {
            self.instance
                .heap
                .struct_new_with_fields(TYPE_NODE, &[value, next.to_raw() as i64])
        }

        /// List `n, n-1, ..., 1`.
        pub fn build(&mut self, n: i32) -> WasmResult<GcRef> {
            let mut list = GcRef::NULL;
            let mut i: i32 = 1;
            while i <= n {
                list = self.cons(i64::from(i), list)?;
                i = i.wrapping_add(1);
            }
            Ok(list)
        }

        pub fn sum(&mut self, list: GcRef) -> WasmResult<i64> {
            let heap = &self.instance.heap;
            let mut total: i64 = 0;
            let mut cursor = list;
            while !cursor.is_null() {
                let node = heap.ref_cast(cursor, TYPE_NODE)?;
                total = total.wrapping_add(heap.struct_get(node, FIELD_VALUE)?);
                cursor = GcRef::from_raw(heap.struct_get(node, FIELD_NEXT)? as u64);
            }
            Ok(total)
        }

        /// `struct.get $node $value` without a null check.
        pub fn head(&mut self, list: GcRef) -> WasmResult<i64> {
            self.instance.heap.struct_get(list, FIELD_VALUE)
        }

        pub fn is_node(&self, r: GcRef) -> i32 {
            self.instance.heap.ref_test(r, TYPE_NODE)
        }

        /// Sum of `i*i` for `i < n`, staged through a GC array.
        pub fn squares(&mut self, n: i32) -> WasmResult<i64> {
            let heap = &mut self.instance.heap;
            let words = heap.array_new_default(TYPE_WORDS, n as u32)?;
            for i in 0..heap.array_len(words)? {
                heap.array_set(words, i, i64::from(i) * i64::from(i))?;
            }
            let mut total: i64 = 0;
            for i in 0..heap.array_len(words)? {
                total = total.wrapping_add(heap.array_get(words, i)?);
            }
            Ok(total)
        }

        pub fn objects(&self) -> usize {
            self.instance.heap.object_count()
        }
    }
}

// ── exceptions ──────────────────────────────────────────────────────────
//
//   (tag $div_zero (param i32))
//   (tag $relay (param i32))
//   (func (export "safe_div") (param $a i32) (param $b i32) (result i32)
//     (try_table (catch $div_zero 0) ... throw $div_zero ...) ... i32.const -1)
//   (func (export "checked_div") ...)      ;; throws with no handler
//   (func (export "relay") ...)            ;; inner catch rethrows to outer
//   (func (export "innermost") ...)        ;; nested try, reports catching layer

pub mod exceptions {
    use waq_runtime::ops;
    use waq_runtime::{ConstructionError, ExecResult, Instance};

    pub const TAG_DIV_ZERO: u32 = 0;
    pub const TAG_RELAY: u32 = 1;

    pub struct Module {
        instance: Instance,
    }

    pub fn new() -> Result<Module, ConstructionError> {
        Ok(Module {
            instance: super::instance(1)?,
        })
    }

    fn payload_i32(payload: &[u8]) -> i32 {
        let mut word = [0u8; 4];
        let n = payload.len().min(4);
        word[..n].copy_from_slice(&payload[..n]);
        i32::from_le_bytes(word)
    }

    fn div(instance: &mut Instance, a: i32, b: i32) -> ExecResult<i32> {
        if b == 0 {
            return Err(instance.throw(TAG_DIV_ZERO, &a.to_le_bytes()));
        }
        Ok(ops::i32_div_s(a, b)?)
    }

    impl Module {
        pub fn safe_div(&mut self, a: i32, b: i32) -> ExecResult<i32> {
            self.instance
                .try_catch(|inst| div(inst, a, b), |_, _caught| Ok(-1))
        }

        pub fn checked_div(&mut self, a: i32, b: i32) -> ExecResult<i32> {
            div(&mut self.instance, a, b)
        }

        /// Returns the tag and payload seen by the outer handler.
        pub fn relay(&mut self, value: i32) -> ExecResult<(u32, i32)> {
            self.instance.try_catch(
                |inst| {
                    inst.try_catch(
                        |inst| Err(inst.throw(TAG_RELAY, &value.to_le_bytes())),
                        |inst, _caught| Err(inst.rethrow()),
                    )
                },
                |_, caught| Ok((caught.tag, payload_i32(caught.payload()))),
            )
        }

        /// 1 when the inner handler caught, 2 when the outer one did.
        pub fn innermost(&mut self) -> ExecResult<i32> {
            self.instance.try_catch(
                |inst| inst.try_catch(|inst| Err(inst.throw(TAG_RELAY, &[])), |_, _| Ok(1)),
                |_, _| Ok(2),
            )
        }

        pub fn handler_depth(&self) -> usize {
            self.instance.exceptions.depth()
        }
    }
}

// ── wasi_hello ──────────────────────────────────────────────────────────
//
//   (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
//   (import "wasi_snapshot_preview1" "args_sizes_get" ...)
//   (import "wasi_snapshot_preview1" "args_get" ...)
//   (memory 1)
//   (data "Hello from WASI!\n")
//   (func (export "_start") ...)

pub mod wasi_hello {
    use waq_runtime::{ConstructionError, Instance, LinearMemory, WasmResult};
    use waq_wasi::WasiCtx;

    pub const GREETING: &[u8] = b"Hello from WASI!\n";
    const IOVEC_AT: i32 = 0;
    const TEXT_AT: i32 = 8;
    const NWRITTEN_AT: i32 = 100;
    const ARGC_AT: i32 = 200;
    const ARGV_BUF_SIZE_AT: i32 = 204;
    const ARGV_AT: i32 = 256;
    const ARGV_BUF_AT: i32 = 1024;

    pub struct Module {
        instance: Instance,
        greeting: u32,
    }

    pub fn new() -> Result<Module, ConstructionError> {
        let mut instance = super::instance(1)?;
        let greeting = instance.data.register(GREETING)?;
        Ok(Module { instance, greeting })
    }

    impl Module {
        /// `_start`: write the greeting to `fd`, return the errno.
        pub fn start(&mut self, wasi: &mut WasiCtx, fd: i32) -> WasmResult<i32> {
            let len = GREETING.len() as i32;
            self.instance.memory_init(self.greeting, TEXT_AT, 0, len)?;
            let mem = &mut self.instance.memory;
            mem.store_i32(IOVEC_AT as u64, TEXT_AT)?;
            mem.store_i32(IOVEC_AT as u64 + 4, len)?;
            Ok(wasi.fd_write(mem, fd, IOVEC_AT, 1, NWRITTEN_AT))
        }

        pub fn written(&self) -> WasmResult<u32> {
            self.instance.memory.load_u32(NWRITTEN_AT as u64)
        }

        /// Fetch the argument vector through `args_sizes_get` and `args_get`.
        pub fn argv(&mut self, wasi: &WasiCtx) -> Result<Vec<String>, i32> {
            let mem = &mut self.instance.memory;
            match wasi.args_sizes_get(mem, ARGC_AT, ARGV_BUF_SIZE_AT) {
                0 => {}
                errno => return Err(errno),
            }
            match wasi.args_get(mem, ARGV_AT, ARGV_BUF_AT) {
                0 => {}
                errno => return Err(errno),
            }
            let argc = load(mem, ARGC_AT)?;
            (0..argc)
                .map(|i| {
                    let ptr = load(mem, ARGV_AT + i as i32 * 4)?;
                    let bytes = mem
                        .as_slice()
                        .get(ptr as usize..)
                        .unwrap_or_default()
                        .iter()
                        .take_while(|&&b| b != 0)
                        .copied()
                        .collect::<Vec<u8>>();
                    Ok(String::from_utf8_lossy(&bytes).into_owned())
                })
                .collect()
        }

        pub fn memory_mut(&mut self) -> &mut LinearMemory {
            &mut self.instance.memory
        }
    }

    fn load(mem: &LinearMemory, at: i32) -> Result<u32, i32> {
        mem.load_u32(at as u64).map_err(|_| waq_wasi::Errno::Fault.raw())
    }
}
