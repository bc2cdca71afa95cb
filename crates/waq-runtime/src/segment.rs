//! Passive data and element segments.
//!
//! Segments are registered once at instantiation and addressed by a small
//! integer id (at most `MAX_SEGMENTS`). `memory.init` / `table.init` read a
//! sub-range; `data.drop` / `elem.drop` release the contents. After a drop
//! every read of that id traps, as does any id that was never registered.

use crate::table::FuncRef;
use crate::{ConstructionError, WasmResult, WasmTrap, MAX_SEGMENTS};

struct Segment<T> {
    items: Box<[T]>,
    dropped: bool,
}

/// Fixed-capacity registry of droppable segments.
///
/// `trap` is the fault raised on any invalid access: `OutOfBounds` for data
/// segments, `TableOutOfBounds` for element segments.
pub struct SegmentTable<T> {
    segments: Vec<Segment<T>>,
    trap: WasmTrap,
}

/// Data segments feeding `memory.init`.
pub type DataSegments = SegmentTable<u8>;

/// Element segments feeding `table.init`.
pub type ElementSegments = SegmentTable<Option<FuncRef>>;

impl DataSegments {
    pub fn new() -> Self {
        Self::with_trap(WasmTrap::OutOfBounds)
    }
}

impl Default for DataSegments {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementSegments {
    pub fn new() -> Self {
        Self::with_trap(WasmTrap::TableOutOfBounds)
    }
}

impl Default for ElementSegments {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SegmentTable<T> {
    fn with_trap(trap: WasmTrap) -> Self {
        Self {
            segments: Vec::new(),
            trap,
        }
    }

    /// Register a segment and return its id.
    ///
    /// # Errors
    /// `TooManySegments` once `MAX_SEGMENTS` ids are in use.
    pub fn register(&mut self, items: impl Into<Box<[T]>>) -> Result<u32, ConstructionError> {
        if self.segments.len() >= MAX_SEGMENTS {
            return Err(ConstructionError::TooManySegments { max: MAX_SEGMENTS });
        }
        self.segments.push(Segment {
            items: items.into(),
            dropped: false,
        });
        Ok((self.segments.len() - 1) as u32)
    }

    /// Number of registered ids (dropped ones included).
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_dropped(&self, id: u32) -> bool {
        self.segments
            .get(id as usize)
            .is_some_and(|segment| segment.dropped)
    }

    /// Bounds-checked view of `len` items at `offset` inside segment `id`.
    ///
    /// Traps on an unknown id, a dropped segment, or a range that runs past
    /// the segment's end.
    pub fn slice(&self, id: u32, offset: u32, len: u32) -> WasmResult<&[T]> {
        let segment = self
            .segments
            .get(id as usize)
            .filter(|segment| !segment.dropped)
            .ok_or(self.trap)?;
        let start = offset as usize;
        let end = start.checked_add(len as usize).ok_or(self.trap)?;
        segment.items.get(start..end).ok_or(self.trap)
    }

    /// `data.drop` / `elem.drop`: free the contents. Dropping twice is a
    /// no-op; dropping an unknown id traps.
    pub fn drop_segment(&mut self, id: u32) -> WasmResult<()> {
        let segment = self.segments.get_mut(id as usize).ok_or(self.trap)?;
        segment.items = Box::default();
        segment.dropped = true;
        Ok(())
    }
}
