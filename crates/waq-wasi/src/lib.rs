//! `waq-wasi`: WASI Preview-1 host functions for `waq-runtime` guests.
//!
//! Every call takes the guest's `LinearMemory` plus integer arguments (guest
//! offsets and small values) and returns an `errno` as `i32`. Results are
//! written into guest memory at the offsets the guest supplied. Host errors
//! never terminate the process; only `proc_exit` does.
//!
//! ```no_run
//! use waq_runtime::Instance;
//! use waq_wasi::WasiConfig;
//!
//! let mut instance = Instance::init(1)?;
//! let mut wasi = WasiConfig::new().arg("app").arg("--verbose").build()?;
//! let errno = wasi.fd_write(&mut instance.memory, 1, 0, 0, 8);
//! assert_eq!(errno, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

mod args;
mod clock;
mod dir;
mod errno;
mod fd_table;
mod fs;
mod guest;

pub use errno::Errno;
pub use fd_table::MAX_FDS;

use dir::Dir;
use fd_table::{FdEntry, FdTable};

/// `rights` bits.
pub mod rights {
    pub const FD_DATASYNC: u64 = 1 << 0;
    pub const FD_READ: u64 = 1 << 1;
    pub const FD_SEEK: u64 = 1 << 2;
    pub const FD_FDSTAT_SET_FLAGS: u64 = 1 << 3;
    pub const FD_SYNC: u64 = 1 << 4;
    pub const FD_TELL: u64 = 1 << 5;
    pub const FD_WRITE: u64 = 1 << 6;
    pub const FD_ADVISE: u64 = 1 << 7;
    pub const FD_ALLOCATE: u64 = 1 << 8;
    pub const PATH_CREATE_DIRECTORY: u64 = 1 << 9;
    pub const PATH_CREATE_FILE: u64 = 1 << 10;
    pub const PATH_LINK_SOURCE: u64 = 1 << 11;
    pub const PATH_LINK_TARGET: u64 = 1 << 12;
    pub const PATH_OPEN: u64 = 1 << 13;
    pub const FD_READDIR: u64 = 1 << 14;
    pub const PATH_READLINK: u64 = 1 << 15;
    pub const PATH_RENAME_SOURCE: u64 = 1 << 16;
    pub const PATH_RENAME_TARGET: u64 = 1 << 17;
    pub const PATH_FILESTAT_GET: u64 = 1 << 18;
    pub const PATH_FILESTAT_SET_SIZE: u64 = 1 << 19;
    pub const PATH_FILESTAT_SET_TIMES: u64 = 1 << 20;
    pub const FD_FILESTAT_GET: u64 = 1 << 21;
    pub const FD_FILESTAT_SET_SIZE: u64 = 1 << 22;
    pub const FD_FILESTAT_SET_TIMES: u64 = 1 << 23;
    pub const PATH_SYMLINK: u64 = 1 << 24;
    pub const PATH_REMOVE_DIRECTORY: u64 = 1 << 25;
    pub const PATH_UNLINK_FILE: u64 = 1 << 26;
    pub const POLL_FD_READWRITE: u64 = 1 << 27;
    pub const SOCK_SHUTDOWN: u64 = 1 << 28;
    pub const SOCK_ACCEPT: u64 = 1 << 29;

    /// Rights a regular file may carry.
    pub const FILE_BASE: u64 = FD_DATASYNC
        | FD_READ
        | FD_SEEK
        | FD_FDSTAT_SET_FLAGS
        | FD_SYNC
        | FD_TELL
        | FD_WRITE
        | FD_ADVISE
        | FD_ALLOCATE
        | FD_FILESTAT_GET
        | FD_FILESTAT_SET_SIZE
        | FD_FILESTAT_SET_TIMES
        | POLL_FD_READWRITE;

    /// Rights a directory may carry.
    pub const DIRECTORY_BASE: u64 = FD_FDSTAT_SET_FLAGS
        | FD_SYNC
        | FD_ADVISE
        | PATH_CREATE_DIRECTORY
        | PATH_CREATE_FILE
        | PATH_LINK_SOURCE
        | PATH_LINK_TARGET
        | PATH_OPEN
        | FD_READDIR
        | PATH_READLINK
        | PATH_RENAME_SOURCE
        | PATH_RENAME_TARGET
        | PATH_FILESTAT_GET
        | PATH_FILESTAT_SET_SIZE
        | PATH_FILESTAT_SET_TIMES
        | FD_FILESTAT_GET
        | FD_FILESTAT_SET_TIMES
        | PATH_SYMLINK
        | PATH_REMOVE_DIRECTORY
        | PATH_UNLINK_FILE;
}

/// `filetype` values.
pub mod filetype {
    pub const UNKNOWN: u8 = 0;
    pub const BLOCK_DEVICE: u8 = 1;
    pub const CHARACTER_DEVICE: u8 = 2;
    pub const DIRECTORY: u8 = 3;
    pub const REGULAR_FILE: u8 = 4;
    pub const SOCKET_DGRAM: u8 = 5;
    pub const SOCKET_STREAM: u8 = 6;
    pub const SYMBOLIC_LINK: u8 = 7;
}

/// `oflags` bits for `path_open`.
pub mod oflags {
    pub const CREAT: u16 = 1 << 0;
    pub const DIRECTORY: u16 = 1 << 1;
    pub const EXCL: u16 = 1 << 2;
    pub const TRUNC: u16 = 1 << 3;
}

/// `fdflags` bits.
pub mod fdflags {
    pub const APPEND: u16 = 1 << 0;
    pub const DSYNC: u16 = 1 << 1;
    pub const NONBLOCK: u16 = 1 << 2;
    pub const RSYNC: u16 = 1 << 3;
    pub const SYNC: u16 = 1 << 4;
}

/// `lookupflags` bits.
pub mod lookupflags {
    pub const SYMLINK_FOLLOW: u32 = 1 << 0;
}

/// `whence` values for `fd_seek`.
pub mod whence {
    pub const SET: u8 = 0;
    pub const CUR: u8 = 1;
    pub const END: u8 = 2;
}

/// `clockid` values.
pub mod clockid {
    pub const REALTIME: u32 = 0;
    pub const MONOTONIC: u32 = 1;
    pub const PROCESS_CPUTIME_ID: u32 = 2;
    pub const THREAD_CPUTIME_ID: u32 = 3;
}

/// Failure to assemble a `WasiCtx`.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("cannot preopen {path}: {source}")]
    Preopen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("argument or environment entry contains a NUL byte")]
    InteriorNul,
    #[error("descriptor table is full")]
    TooManyDescriptors,
}

/// Builder for a `WasiCtx`.
#[derive(Debug, Clone)]
pub struct WasiConfig {
    args: Vec<String>,
    env: Vec<(String, String)>,
    preopens: Vec<(PathBuf, String)>,
    inherit_cwd: bool,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WasiConfig {
    /// No arguments, no environment, the working directory preopened as `.`.
    pub fn new() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            preopens: Vec::new(),
            inherit_cwd: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Copy the host process environment.
    pub fn inherit_env(mut self) -> Self {
        self.env.extend(std::env::vars());
        self
    }

    /// Expose host directory `host` to the guest under `guest_name`.
    pub fn preopen_dir(mut self, host: impl AsRef<Path>, guest_name: impl Into<String>) -> Self {
        self.preopens
            .push((host.as_ref().to_path_buf(), guest_name.into()));
        self
    }

    /// Whether the working directory is preopened as `.` at descriptor 3.
    pub fn inherit_cwd(mut self, inherit: bool) -> Self {
        self.inherit_cwd = inherit;
        self
    }

    pub fn build(self) -> Result<WasiCtx, SetupError> {
        let args = nul_terminated(self.args)?;
        let env = nul_terminated(
            self.env
                .into_iter()
                .map(|(key, value)| format!("{key}={value}")),
        )?;

        let mut fds = FdTable::with_stdio();
        if self.inherit_cwd {
            match std::env::current_dir().and_then(|cwd| Dir::open(&cwd)) {
                Ok(cwd) => {
                    fds.insert(FdEntry::preopened_dir(cwd, ".".to_owned()))
                        .map_err(|_| SetupError::TooManyDescriptors)?;
                }
                Err(err) => {
                    tracing::warn!(target: "waq::wasi", %err, "working directory unavailable, not preopened");
                }
            }
        }
        for (host, name) in self.preopens {
            let meta = std::fs::metadata(&host).map_err(|source| SetupError::Preopen {
                path: host.clone(),
                source,
            })?;
            if !meta.is_dir() {
                return Err(SetupError::NotADirectory(host));
            }
            let dir = Dir::open(&host).map_err(|source| SetupError::Preopen {
                path: host.clone(),
                source,
            })?;
            let fd = fds
                .insert(FdEntry::preopened_dir(dir, name))
                .map_err(|_| SetupError::TooManyDescriptors)?;
            tracing::debug!(target: "waq::wasi", fd, path = %host.display(), "directory preopened");
        }

        Ok(WasiCtx {
            args,
            env,
            fds,
            epoch: Instant::now(),
        })
    }
}

fn nul_terminated<I, S>(items: I) -> Result<Vec<Vec<u8>>, SetupError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items
        .into_iter()
        .map(|item| {
            let mut bytes = item.into().into_bytes();
            if bytes.contains(&0) {
                return Err(SetupError::InteriorNul);
            }
            bytes.push(0);
            Ok(bytes)
        })
        .collect()
}

/// Host-side WASI state for one guest: arguments, environment and the
/// descriptor table.
///
/// The host function families live in separate modules: `args` (argument
/// and environment vectors), `fs` (descriptors and paths), `clock` (time,
/// randomness, process control and unsupported calls).
#[derive(Debug)]
pub struct WasiCtx {
    args: Vec<Vec<u8>>,
    env: Vec<Vec<u8>>,
    fds: FdTable,
    epoch: Instant,
}

impl WasiCtx {
    /// Default context: no arguments, working directory preopened.
    pub fn new() -> Result<Self, SetupError> {
        WasiConfig::new().build()
    }

    /// Number of descriptors currently open (standard streams included).
    pub fn open_descriptors(&self) -> usize {
        self.fds.open_count()
    }
}
