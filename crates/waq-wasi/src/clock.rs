//! Clocks, randomness, process control and the unsupported calls.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use waq_runtime::LinearMemory;

use crate::guest;
use crate::{clockid, Errno, WasiCtx};

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(unix)]
fn host_clock(id: u32) -> Result<libc::clockid_t, Errno> {
    match id {
        clockid::REALTIME => Ok(libc::CLOCK_REALTIME),
        clockid::MONOTONIC => Ok(libc::CLOCK_MONOTONIC),
        clockid::PROCESS_CPUTIME_ID => Ok(libc::CLOCK_PROCESS_CPUTIME_ID),
        clockid::THREAD_CPUTIME_ID => Ok(libc::CLOCK_THREAD_CPUTIME_ID),
        _ => Err(Errno::Inval),
    }
}

#[cfg(unix)]
fn timespec_nanos(ts: &libc::timespec) -> u64 {
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

#[cfg(unix)]
fn host_time(id: u32, resolution: bool) -> Result<u64, Errno> {
    let clock = host_clock(id)?;
    // SAFETY: an all-zero timespec is a valid value; `ts` stays writable for
    // the duration of the call.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        if resolution {
            libc::clock_getres(clock, &mut ts)
        } else {
            libc::clock_gettime(clock, &mut ts)
        }
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(timespec_nanos(&ts))
}

#[cfg(not(unix))]
fn host_time(id: u32, resolution: bool) -> Result<u64, Errno> {
    match id {
        clockid::REALTIME | clockid::MONOTONIC if resolution => Ok(1),
        clockid::PROCESS_CPUTIME_ID | clockid::THREAD_CPUTIME_ID => Err(Errno::Notsup),
        _ => Err(Errno::Inval),
    }
}

impl WasiCtx {
    fn clock_now(&self, id: u32) -> Result<u64, Errno> {
        match id {
            clockid::REALTIME => Ok(as_nanos(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| Errno::Overflow)?,
            )),
            clockid::MONOTONIC => Ok(as_nanos(self.epoch.elapsed())),
            clockid::PROCESS_CPUTIME_ID | clockid::THREAD_CPUTIME_ID => host_time(id, false),
            _ => Err(Errno::Inval),
        }
    }

    fn clock_resolution(id: u32) -> Result<u64, Errno> {
        host_time(id, true).map(|res| res.max(1))
    }

    pub fn clock_res_get(&self, mem: &mut LinearMemory, id: i32, resolution_ptr: i32) -> i32 {
        let result = Self::clock_resolution(id as u32)
            .and_then(|res| guest::write_u64(mem, resolution_ptr, res));
        Errno::from_result(result)
    }

    /// `precision` is accepted and ignored.
    pub fn clock_time_get(&self, mem: &mut LinearMemory, id: i32, _precision: i64, time_ptr: i32) -> i32 {
        let result = self
            .clock_now(id as u32)
            .and_then(|now| guest::write_u64(mem, time_ptr, now));
        Errno::from_result(result)
    }

    pub fn random_get(&mut self, mem: &mut LinearMemory, buf: i32, buf_len: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", buf_len, "random_get");
        let result = u32::try_from(buf_len)
            .map_err(|_| Errno::Inval)
            .and_then(|len| guest::bytes_mut(mem, buf, len))
            .and_then(|bytes| OsRng.try_fill_bytes(bytes).map_err(|_| Errno::Io));
        Errno::from_result(result)
    }

    pub fn sched_yield(&mut self) -> i32 {
        std::thread::yield_now();
        Errno::Success.raw()
    }

    /// Terminate the host process with `code`.
    pub fn proc_exit(&mut self, code: i32) -> ! {
        tracing::debug!(target: "waq::wasi", code, "proc_exit");
        std::process::exit(code)
    }

    pub fn proc_raise(&mut self, signal: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", signal, "proc_raise unsupported");
        Errno::Nosys.raw()
    }

    pub fn poll_oneoff(&mut self, _mem: &mut LinearMemory, _in_ptr: i32, _out_ptr: i32, _nsubscriptions: i32, _nevents_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", "poll_oneoff unsupported");
        Errno::Nosys.raw()
    }

    pub fn sock_accept(&mut self, _mem: &mut LinearMemory, _fd: i32, _flags: i32, _fd_ptr: i32) -> i32 {
        Errno::Nosys.raw()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sock_recv(
        &mut self,
        _mem: &mut LinearMemory,
        _fd: i32,
        _ri_data: i32,
        _ri_data_len: i32,
        _ri_flags: i32,
        _ro_datalen_ptr: i32,
        _ro_flags_ptr: i32,
    ) -> i32 {
        Errno::Nosys.raw()
    }

    pub fn sock_send(
        &mut self,
        _mem: &mut LinearMemory,
        _fd: i32,
        _si_data: i32,
        _si_data_len: i32,
        _si_flags: i32,
        _so_datalen_ptr: i32,
    ) -> i32 {
        Errno::Nosys.raw()
    }

    pub fn sock_shutdown(&mut self, _fd: i32, _how: i32) -> i32 {
        Errno::Nosys.raw()
    }
}

#[cfg(test)]
mod tests {
    use crate::WasiConfig;

    use super::*;

    fn ctx() -> WasiCtx {
        WasiConfig::new().inherit_cwd(false).build().unwrap()
    }

    #[test]
    fn monotonic_clock_advances() {
        let ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.clock_time_get(&mut mem, clockid::MONOTONIC as i32, 0, 0), 0);
        let first = mem.load_i64(0).unwrap() as u64;
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(ctx.clock_time_get(&mut mem, clockid::MONOTONIC as i32, 0, 0), 0);
        assert!(mem.load_i64(0).unwrap() as u64 > first);
    }

    #[test]
    fn realtime_is_after_2020() {
        let ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.clock_time_get(&mut mem, clockid::REALTIME as i32, 1, 8), 0);
        assert!(mem.load_i64(8).unwrap() > 1_577_836_800_000_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn resolution_comes_from_the_host() {
        let ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        for (id, host) in [
            (clockid::REALTIME, libc::CLOCK_REALTIME),
            (clockid::MONOTONIC, libc::CLOCK_MONOTONIC),
        ] {
            let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
            assert_eq!(unsafe { libc::clock_getres(host, &mut ts) }, 0);
            let expected = timespec_nanos(&ts).max(1);
            assert_eq!(ctx.clock_res_get(&mut mem, id as i32, 16), 0);
            assert_eq!(mem.load_i64(16).unwrap() as u64, expected);
        }
    }

    #[cfg(unix)]
    #[test]
    fn cpu_clocks_report() {
        let ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.clock_res_get(&mut mem, clockid::PROCESS_CPUTIME_ID as i32, 0), 0);
        assert!(mem.load_i64(0).unwrap() > 0);
        assert_eq!(ctx.clock_time_get(&mut mem, clockid::THREAD_CPUTIME_ID as i32, 0, 8), 0);
    }

    #[test]
    fn unknown_clock_is_inval() {
        let ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.clock_time_get(&mut mem, 9, 0, 0), Errno::Inval.raw());
        assert_eq!(ctx.clock_res_get(&mut mem, -1, 0), Errno::Inval.raw());
    }

    #[test]
    fn random_fills_buffer() {
        let mut ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.random_get(&mut mem, 100, 64), 0);
        assert!(mem.as_slice()[100..164].iter().any(|&b| b != 0));
        assert_eq!(ctx.random_get(&mut mem, 65530, 64), Errno::Fault.raw());
    }

    #[test]
    fn unsupported_calls_are_nosys() {
        let mut ctx = ctx();
        let mut mem = LinearMemory::try_new(1).unwrap();
        assert_eq!(ctx.proc_raise(6), Errno::Nosys.raw());
        assert_eq!(ctx.poll_oneoff(&mut mem, 0, 64, 1, 128), Errno::Nosys.raw());
        assert_eq!(ctx.sock_shutdown(3, 0), Errno::Nosys.raw());
        assert_eq!(ctx.sched_yield(), 0);
    }
}
