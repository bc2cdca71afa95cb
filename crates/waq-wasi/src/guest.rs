//! Marshalling between guest offsets and host values.
//!
//! Guest pointers arrive as `i32` and are reinterpreted as unsigned. Every
//! access is bounds-checked against the current memory size; an instance
//! without memory (zero pages) or a range past the end is `FAULT`.

use waq_runtime::LinearMemory;

use crate::Errno;

#[inline]
fn addr(ptr: i32) -> u64 {
    u64::from(ptr as u32)
}

fn ensure_memory(mem: &LinearMemory) -> Result<(), Errno> {
    if mem.active_size() == 0 {
        return Err(Errno::Fault);
    }
    Ok(())
}

pub(crate) fn read_u32(mem: &LinearMemory, ptr: i32) -> Result<u32, Errno> {
    ensure_memory(mem)?;
    Ok(mem.load_u32(addr(ptr))?)
}

pub(crate) fn write_u8(mem: &mut LinearMemory, ptr: i32, value: u8) -> Result<(), Errno> {
    ensure_memory(mem)?;
    Ok(mem.store_u8(addr(ptr), value)?)
}

pub(crate) fn write_u16(mem: &mut LinearMemory, ptr: i32, value: u16) -> Result<(), Errno> {
    ensure_memory(mem)?;
    Ok(mem.store_u16(addr(ptr), value)?)
}

pub(crate) fn write_u32(mem: &mut LinearMemory, ptr: i32, value: u32) -> Result<(), Errno> {
    ensure_memory(mem)?;
    Ok(mem.store_i32(addr(ptr), value as i32)?)
}

pub(crate) fn write_u64(mem: &mut LinearMemory, ptr: i32, value: u64) -> Result<(), Errno> {
    ensure_memory(mem)?;
    Ok(mem.store_i64(addr(ptr), value as i64)?)
}

pub(crate) fn read_bytes(mem: &LinearMemory, ptr: i32, len: u32) -> Result<&[u8], Errno> {
    ensure_memory(mem)?;
    Ok(mem.read_bytes(addr(ptr), u64::from(len))?)
}

pub(crate) fn bytes_mut(mem: &mut LinearMemory, ptr: i32, len: u32) -> Result<&mut [u8], Errno> {
    ensure_memory(mem)?;
    Ok(mem.bytes_mut(addr(ptr), u64::from(len))?)
}

pub(crate) fn write_bytes(mem: &mut LinearMemory, ptr: i32, data: &[u8]) -> Result<(), Errno> {
    ensure_memory(mem)?;
    Ok(mem.write_bytes(addr(ptr), data)?)
}

/// One `{buf: u32, buf_len: u32}` entry of an iovec array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IoVec {
    pub buf: i32,
    pub len: u32,
}

/// Decode `count` iovecs starting at `ptr`.
pub(crate) fn read_iovecs(mem: &LinearMemory, ptr: i32, count: i32) -> Result<Vec<IoVec>, Errno> {
    let count = u32::try_from(count).map_err(|_| Errno::Inval)?;
    let raw = read_bytes(mem, ptr, count.checked_mul(8).ok_or(Errno::Fault)?)?;
    Ok(raw
        .chunks_exact(8)
        .map(|entry| IoVec {
            buf: i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
            len: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
        })
        .collect())
}

/// Copy a guest path into an owned host string.
pub(crate) fn read_path(mem: &LinearMemory, ptr: i32, len: i32) -> Result<String, Errno> {
    let len = u32::try_from(len).map_err(|_| Errno::Inval)?;
    let bytes = read_bytes(mem, ptr, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Errno::Ilseq)
}
