//! Integration tests: hand-lowered guest code calling the runtime.
//!
//! Each module below is what the ahead-of-time compiler emits for a small
//! Wasm program. They check that the runtime API composes the way compiled
//! code uses it: state through `&mut Instance`, traps through `?`.

use waq_runtime::*;

// ═══════════════════════════════════════════════════════════════════════
// Example 1: Memory buffer: sum an array stored in linear memory
// ═══════════════════════════════════════════════════════════════════════
//
// Source Wasm:
//   (module
//     (memory (export "memory") 1)
//     (func (export "sum_array") (param $ptr i32) (param $len i32) (result i32)
//       ... loop: load i32 at ptr+i*4, add to sum ...))

mod memory_sum {
    use super::*;

    fn func_sum_array(instance: &Instance, ptr: i32, len: i32) -> WasmResult<i32> {
        let mut sum: i32 = 0;
        let mut i: i32 = 0;
        loop {
            if i >= len {
                break;
            }
            let offset = (ptr as u32).wrapping_add((i as u32).wrapping_mul(4));
            let val = instance.memory.load_i32(u64::from(offset))?;
            sum = sum.wrapping_add(val);
            i = i.wrapping_add(1);
        }
        Ok(sum)
    }

    #[test]
    fn test_sum_array() {
        let mut instance = Instance::init(1).unwrap();
        for (i, v) in [10, 20, 30, 40].into_iter().enumerate() {
            instance.memory.store_i32(i as u64 * 4, v).unwrap();
        }
        assert_eq!(func_sum_array(&instance, 0, 4), Ok(100));
        assert_eq!(func_sum_array(&instance, 4, 2), Ok(50));
        assert_eq!(func_sum_array(&instance, 0, 0), Ok(0));
    }

    #[test]
    fn test_sum_array_out_of_bounds() {
        let instance = Instance::init(1).unwrap();
        let result = func_sum_array(&instance, (PAGE_SIZE - 2) as i32, 1);
        assert_eq!(result, Err(WasmTrap::OutOfBounds));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Example 2: Indirect calls: function table dispatch
// ═══════════════════════════════════════════════════════════════════════
//
// Source Wasm:
//   (module
//     (type $binop (func (param i32 i32) (result i32)))
//     (table 2 funcref)
//     (elem (i32.const 0) $add $mul)
//     (func (export "apply") (param $op i32) (param $a i32) (param $b i32) (result i32)
//       local.get 1  local.get 2  local.get 0  call_indirect (type $binop)))

mod indirect_call {
    use super::*;

    const TYPE_BINOP: u32 = 0;

    fn new() -> Instance {
        let mut instance = Instance::init(1).unwrap();
        let seg = instance
            .elements
            .register(vec![
                Some(FuncRef::new(TYPE_BINOP, 0)),
                Some(FuncRef::new(TYPE_BINOP, 1)),
            ])
            .unwrap();
        instance.table_init(0, seg, 0, 0, 2).unwrap();
        instance.elem_drop(seg).unwrap();
        instance
    }

    fn func_add(a: i32, b: i32) -> WasmResult<i32> {
        Ok(a.wrapping_add(b))
    }

    fn func_mul(a: i32, b: i32) -> WasmResult<i32> {
        Ok(a.wrapping_mul(b))
    }

    fn export_apply(instance: &Instance, op: i32, a: i32, b: i32) -> WasmResult<i32> {
        let target = instance.call_indirect(0, op, TYPE_BINOP)?;
        match target.func_index {
            0 => func_add(a, b),
            1 => func_mul(a, b),
            _ => Err(WasmTrap::UndefinedElement),
        }
    }

    #[test]
    fn test_dispatch() {
        let instance = new();
        assert_eq!(export_apply(&instance, 0, 7, 3), Ok(10));
        assert_eq!(export_apply(&instance, 1, 7, 3), Ok(21));
    }

    #[test]
    fn test_null_and_out_of_range_slots() {
        let instance = new();
        assert_eq!(export_apply(&instance, 2, 1, 1), Err(WasmTrap::UndefinedElement));
        assert_eq!(export_apply(&instance, 64, 1, 1), Err(WasmTrap::TableOutOfBounds));
        assert_eq!(export_apply(&instance, -1, 1, 1), Err(WasmTrap::TableOutOfBounds));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Example 3: Growth: memory.grow then touch the new pages
// ═══════════════════════════════════════════════════════════════════════

mod growth {
    use super::*;

    #[test]
    fn test_grow_then_load_across_page_boundary() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(instance.memory_grow(2), 1);
        assert_eq!(instance.memory_size(), 3);
        assert_eq!(instance.memory.load_i32(65534), Ok(0));
        assert_eq!(
            instance.memory.load_i32(3 * PAGE_SIZE as u64 - 2),
            Err(WasmTrap::OutOfBounds)
        );
        assert_eq!(instance.memory.load_i32(3 * PAGE_SIZE as u64 - 4), Ok(0));
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Example 4: GC structs: a 2D point with a packed tag byte
// ═══════════════════════════════════════════════════════════════════════
//
// Source Wasm:
//   (type $point (struct (field $x (mut i32)) (field $y (mut i32)) (field $tag i8)))
//   (func (export "len2") (param $p (ref null $point)) (result i32)
//     x*x + y*y)

mod gc_point {
    use super::*;

    const TYPE_POINT: u32 = 0;

    fn func_make(instance: &mut Instance, x: i32, y: i32) -> WasmResult<GcRef> {
        instance
            .heap
            .struct_new_with_fields(TYPE_POINT, &[i64::from(x), i64::from(y), 0xFE])
    }

    fn func_len2(instance: &Instance, p: GcRef) -> WasmResult<i32> {
        let p = instance.heap.ref_cast(p, TYPE_POINT)?;
        let x = instance.heap.struct_get(p, 0)? as i32;
        let y = instance.heap.struct_get(p, 1)? as i32;
        Ok(x.wrapping_mul(x).wrapping_add(y.wrapping_mul(y)))
    }

    #[test]
    fn test_len2() {
        let mut instance = Instance::init(1).unwrap();
        let p = func_make(&mut instance, 3, -4).unwrap();
        assert_eq!(func_len2(&instance, p), Ok(25));
        assert_eq!(instance.heap.struct_get_s(p, 2, Packed::I8), Ok(-2));
        assert_eq!(instance.heap.struct_get_u(p, 2, Packed::I8), Ok(0xFE));
    }

    #[test]
    fn test_null_and_i31_are_rejected() {
        let instance = Instance::init(1).unwrap();
        assert_eq!(func_len2(&instance, GcRef::NULL), Err(WasmTrap::NullReference));
        assert_eq!(
            func_len2(&instance, gc::ref_i31(12)),
            Err(WasmTrap::CastFailure)
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Example 5: Exceptions: a checked division that throws on zero
// ═══════════════════════════════════════════════════════════════════════
//
// Source Wasm:
//   (tag $div_zero (param i32))
//   (func $div (param i32 i32) (result i32)
//     local.get 1  i32.eqz  if  local.get 0  throw $div_zero  end
//     local.get 0  local.get 1  i32.div_s)
//   (func (export "safe_div") (param i32 i32) (result i32)
//     try_table (catch $div_zero 0) ... call $div ... end  i32.const -1)

mod exceptions {
    use super::*;

    const TAG_DIV_ZERO: u32 = 0;

    fn func_div(instance: &mut Instance, a: i32, b: i32) -> ExecResult<i32> {
        if b == 0 {
            return Err(instance.throw(TAG_DIV_ZERO, &a.to_le_bytes()));
        }
        Ok(ops::i32_div_s(a, b)?)
    }

    fn export_safe_div(instance: &mut Instance, a: i32, b: i32) -> ExecResult<i32> {
        instance.try_catch(|inst| func_div(inst, a, b), |_, _| Ok(-1))
    }

    #[test]
    fn test_safe_div() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(export_safe_div(&mut instance, 9, 3), Ok(3));
        assert_eq!(export_safe_div(&mut instance, 9, 0), Ok(-1));
        assert_eq!(instance.exceptions.depth(), 0);
        assert_eq!(instance.exceptions.current_exception_tag(), None);
    }

    #[test]
    fn test_handler_sees_payload() {
        let mut instance = Instance::init(1).unwrap();
        let seen = instance.try_catch(
            |inst| func_div(inst, 9, 0),
            |inst, caught| {
                assert_eq!(inst.exceptions.current_exception_payload(), caught.payload());
                Ok(i32::from_le_bytes(caught.payload().try_into().unwrap()))
            },
        );
        assert_eq!(seen, Ok(9));
    }

    #[test]
    fn test_overflow_is_a_trap_not_an_exception() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(
            export_safe_div(&mut instance, i32::MIN, -1),
            Err(Unwind::Trap(WasmTrap::IntegerOverflow))
        );
    }

    #[test]
    fn test_throw_outside_try_is_fatal() {
        let mut instance = Instance::init(1).unwrap();
        assert_eq!(
            func_div(&mut instance, 1, 0),
            Err(Unwind::Trap(WasmTrap::UncaughtException { tag: TAG_DIV_ZERO }))
        );
    }
}
