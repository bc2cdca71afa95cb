//! `args_*` and `environ_*`.

use waq_runtime::LinearMemory;

use crate::guest;
use crate::{Errno, WasiCtx};

/// Write `(count, total bytes)` for a list of NUL-terminated strings.
fn sizes_get(
    mem: &mut LinearMemory,
    items: &[Vec<u8>],
    count_ptr: i32,
    size_ptr: i32,
) -> Result<(), Errno> {
    let total: usize = items.iter().map(Vec::len).sum();
    let count = u32::try_from(items.len()).map_err(|_| Errno::Overflow)?;
    let total = u32::try_from(total).map_err(|_| Errno::Overflow)?;
    guest::write_u32(mem, count_ptr, count)?;
    guest::write_u32(mem, size_ptr, total)
}

/// Write the pointer table at `ptrs` and the strings back to back at `buf`.
fn strings_get(
    mem: &mut LinearMemory,
    items: &[Vec<u8>],
    ptrs: i32,
    buf: i32,
) -> Result<(), Errno> {
    let mut cursor = buf as u32;
    for (index, item) in items.iter().enumerate() {
        let slot = (ptrs as u32)
            .checked_add(index as u32 * 4)
            .ok_or(Errno::Fault)?;
        guest::write_u32(mem, slot as i32, cursor)?;
        guest::write_bytes(mem, cursor as i32, item)?;
        cursor = cursor.checked_add(item.len() as u32).ok_or(Errno::Fault)?;
    }
    Ok(())
}

impl WasiCtx {
    pub fn args_sizes_get(&self, mem: &mut LinearMemory, argc_ptr: i32, size_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", argc = self.args.len(), "args_sizes_get");
        Errno::from_result(sizes_get(mem, &self.args, argc_ptr, size_ptr))
    }

    pub fn args_get(&self, mem: &mut LinearMemory, argv_ptr: i32, buf_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", "args_get");
        Errno::from_result(strings_get(mem, &self.args, argv_ptr, buf_ptr))
    }

    pub fn environ_sizes_get(&self, mem: &mut LinearMemory, count_ptr: i32, size_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", count = self.env.len(), "environ_sizes_get");
        Errno::from_result(sizes_get(mem, &self.env, count_ptr, size_ptr))
    }

    pub fn environ_get(&self, mem: &mut LinearMemory, environ_ptr: i32, buf_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", "environ_get");
        Errno::from_result(strings_get(mem, &self.env, environ_ptr, buf_ptr))
    }
}

#[cfg(test)]
mod tests {
    use crate::WasiConfig;

    use super::*;

    fn cstr_at(mem: &LinearMemory, ptr: u32) -> String {
        let bytes = mem.as_slice()[ptr as usize..]
            .iter()
            .take_while(|&&b| b != 0)
            .copied()
            .collect::<Vec<u8>>();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn args_round_trip() {
        let ctx = WasiConfig::new()
            .inherit_cwd(false)
            .args(["prog", "-x", "input.txt"])
            .build()
            .unwrap();
        let mut mem = LinearMemory::try_new(1).unwrap();

        assert_eq!(ctx.args_sizes_get(&mut mem, 0, 4), 0);
        assert_eq!(mem.load_u32(0).unwrap(), 3);
        assert_eq!(mem.load_u32(4).unwrap(), 5 + 3 + 10);

        assert_eq!(ctx.args_get(&mut mem, 64, 128), 0);
        let args: Vec<String> = (0..3)
            .map(|i| cstr_at(&mem, mem.load_u32(64 + i * 4).unwrap()))
            .collect();
        assert_eq!(args, ["prog", "-x", "input.txt"]);
        assert_eq!(mem.load_u32(64).unwrap(), 128);
    }

    #[test]
    fn environ_is_key_equals_value() {
        let ctx = WasiConfig::new()
            .inherit_cwd(false)
            .env("HOME", "/home/guest")
            .build()
            .unwrap();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.environ_sizes_get(&mut mem, 0, 4), 0);
        assert_eq!(mem.load_u32(0).unwrap(), 1);
        assert_eq!(mem.load_u32(4).unwrap(), 17);
        assert_eq!(ctx.environ_get(&mut mem, 16, 32), 0);
        assert_eq!(cstr_at(&mem, 32), "HOME=/home/guest");
    }

    #[test]
    fn out_of_range_buffers_fault() {
        let ctx = WasiConfig::new().inherit_cwd(false).arg("prog").build().unwrap();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.args_get(&mut mem, 0, 65534), Errno::Fault.raw());
        let mut empty = LinearMemory::try_new(0).unwrap();
        assert_eq!(ctx.args_sizes_get(&mut empty, 0, 4), Errno::Fault.raw());
    }
}
