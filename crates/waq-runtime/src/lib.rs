//! `waq-runtime`: host runtime linked against ahead-of-time compiled Wasm.
//!
//! It provides:
//! - `LinearMemory` for Wasm linear memory (growable, bounds-checked)
//! - `Table` plus data/element segment registries for bulk initialization
//! - `GcHeap` / `GcRef` for struct, array and i31 references
//! - `ExceptionStack` / `Unwind` for throw, catch and rethrow
//! - `ops` and `simd` for numeric intrinsics with exact Wasm semantics
//! - `Instance`, the owned execution context tying all of the above together
//! - `WasmTrap` / `WasmResult<T>` for trap handling

/// WebAssembly page size: 64 KiB.
pub const PAGE_SIZE: usize = 65536;

/// Hard cap on linear memory: 65536 pages (4 GiB).
pub const MAX_PAGES: u32 = 65536;

/// Hard cap on the number of slots in a table.
pub const MAX_TABLE_SIZE: u32 = 65536;

/// Maximum number of registered data or element segments.
pub const MAX_SEGMENTS: usize = 256;

mod memory;
pub use memory::LinearMemory;

mod segment;
pub use segment::{DataSegments, ElementSegments, SegmentTable};

mod table;
pub use table::{FuncRef, Table};

pub mod gc;
pub use gc::{GcHeap, GcRef, Packed};

mod exception;
pub use exception::{ExecResult, Exception, ExceptionStack, Landing, Unwind};

pub mod ops;
pub mod simd;

mod instance;
pub use instance::{Instance, NanProfile, RuntimeConfig};

/// Wasm execution faults. Each one terminates the guest; none is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WasmTrap {
    /// Memory access out of bounds.
    #[error("out of bounds memory access")]
    OutOfBounds,
    /// Integer division by zero.
    #[error("integer divide by zero")]
    DivisionByZero,
    /// Integer overflow (e.g. `i32.div_s` of `MIN / -1`, trapping truncation
    /// of an out-of-range float).
    #[error("integer overflow")]
    IntegerOverflow,
    /// NaN fed to a trapping float-to-int conversion.
    #[error("invalid conversion to integer")]
    InvalidConversion,
    /// Unreachable instruction executed.
    #[error("unreachable")]
    Unreachable,
    /// Indirect call type mismatch (`call_indirect` signature check).
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    /// Table access out of bounds.
    #[error("out of bounds table access")]
    TableOutOfBounds,
    /// Undefined element in table.
    #[error("uninitialized element")]
    UndefinedElement,
    /// Dereference of a null reference.
    #[error("null reference")]
    NullReference,
    /// `ref.cast` on a value of the wrong type.
    #[error("ref.cast failed")]
    CastFailure,
    /// GC array element index out of range.
    #[error("out of bounds array access")]
    ArrayOutOfBounds,
    /// More than `exception::MAX_HANDLERS` nested handler frames.
    #[error("exception handler stack overflow")]
    HandlerStackOverflow,
    /// A throw that no handler frame caught.
    #[error("unhandled exception (tag={tag})")]
    UncaughtException { tag: u32 },
    /// `rethrow` outside of a catch handler.
    #[error("rethrow with no exception")]
    RethrowWithoutException,
    /// Exception payload larger than `exception::MAX_PAYLOAD` bytes.
    #[error("exception payload too large")]
    PayloadTooLarge,
    /// The GC arena could not grow.
    #[error("out of memory")]
    OutOfMemory,
}

/// Result type for Wasm operations: `Result<T, WasmTrap>`.
pub type WasmResult<T> = Result<T, WasmTrap>;

/// Report a trap on the diagnostic stream and terminate the process.
///
/// This is the only place a trap turns into process exit; everything below
/// it propagates `WasmTrap` by value.
pub fn terminate(trap: WasmTrap) -> ! {
    tracing::error!(target: "waq::trap", %trap, "wasm trap");
    eprintln!("wasm trap: {trap}");
    std::process::exit(1)
}

/// Unwraps a `WasmResult`, terminating the process on a trap.
pub trait TrapExt<T> {
    fn or_terminate(self) -> T;
}

impl<T> TrapExt<T> for WasmResult<T> {
    #[inline]
    fn or_terminate(self) -> T {
        match self {
            Ok(value) => value,
            Err(trap) => terminate(trap),
        }
    }
}

// Entry points compiled code branches to when it detects a fault inline.

/// `unreachable` instruction.
#[cold]
pub fn trap_unreachable() -> WasmTrap {
    WasmTrap::Unreachable
}

/// Inlined divide-by-zero check failed.
#[cold]
pub fn trap_div_by_zero() -> WasmTrap {
    WasmTrap::DivisionByZero
}

/// Inlined signed-overflow check failed.
#[cold]
pub fn trap_integer_overflow() -> WasmTrap {
    WasmTrap::IntegerOverflow
}

/// Inlined NaN check on a trapping conversion failed.
#[cold]
pub fn trap_invalid_conversion() -> WasmTrap {
    WasmTrap::InvalidConversion
}

/// Inlined memory bounds check failed.
#[cold]
pub fn trap_out_of_bounds() -> WasmTrap {
    WasmTrap::OutOfBounds
}

/// Inlined null check failed.
#[cold]
pub fn trap_null_reference() -> WasmTrap {
    WasmTrap::NullReference
}

/// Errors that occur while constructing memories, tables and segments.
///
/// These are configuration errors of the embedding, not runtime Wasm traps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    /// Initial pages exceeds the maximum for memory.
    #[error("initial memory of {initial} pages exceeds maximum of {max}")]
    MemoryInitialPagesExceedsMax { initial: u32, max: u32 },
    /// Initial size exceeds the maximum for a table.
    #[error("initial table size {initial} exceeds maximum of {max}")]
    TableInitialSizeExceedsMax { initial: u32, max: u32 },
    /// More than `MAX_SEGMENTS` segments registered.
    #[error("segment table is full ({max} entries)")]
    TooManySegments { max: usize },
    /// The host could not allocate the initial memory.
    #[error("failed to allocate initial memory")]
    AllocationFailed,
}

/// Failure to bring up a module: either its configuration is invalid or an
/// active segment initializer trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InstantiationError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error("trap during instantiation: {0}")]
    Trap(#[from] WasmTrap),
}
