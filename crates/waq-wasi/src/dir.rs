//! Directory handles and descriptor-relative path lookup.
//!
//! A guest path is never handed to the host kernel as a whole. `Dir::lookup`
//! walks it one component at a time starting from an open directory
//! descriptor: each intermediate directory is opened with
//! `openat(O_DIRECTORY | O_NOFOLLOW)`, `..` steps back to the handle it came
//! from, and symlinks are read and expanded here. A walk can never step
//! above the handle it started from, and an absolute symlink target is
//! refused, so the final `*at` call on the leaf always lands inside the tree
//! of the starting directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::fs::Filestat;
use crate::Errno;

/// Symlink expansions allowed in one lookup before `LOOP`.
pub(crate) const MAX_SYMLINK_HOPS: usize = 32;

/// One directory entry as listed by `Dir::entries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub name: Vec<u8>,
    pub ino: u64,
    pub filetype: u8,
}

#[cfg(unix)]
fn escape(path: &str) -> Errno {
    tracing::warn!(target: "waq::wasi", path, "path escapes preopened directory");
    Errno::Notcapable
}

/// Non-empty components of a `/`-separated path.
#[cfg(unix)]
fn components(path: &[u8]) -> impl DoubleEndedIterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|part| !part.is_empty())
}

/// Whether `..` components alone take `path` above where it starts.
#[cfg(unix)]
fn climbs_out(path: &[u8]) -> bool {
    let mut depth = 0usize;
    for part in components(path) {
        match part {
            b"." => {}
            b".." if depth == 0 => return true,
            b".." => depth -= 1,
            _ => depth += 1,
        }
    }
    false
}

#[cfg(unix)]
mod imp {
    use std::collections::VecDeque;
    use std::ffi::{CStr, CString, OsStr};
    use std::fs::{Metadata, OpenOptions};
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

    use super::*;
    use crate::filetype;

    fn cvt(rc: libc::c_int) -> Result<libc::c_int, Errno> {
        if rc < 0 {
            Err(io::Error::last_os_error().into())
        } else {
            Ok(rc)
        }
    }

    fn kind_of_mode(mode: libc::mode_t) -> u8 {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => filetype::DIRECTORY,
            libc::S_IFREG => filetype::REGULAR_FILE,
            libc::S_IFLNK => filetype::SYMBOLIC_LINK,
            libc::S_IFCHR => filetype::CHARACTER_DEVICE,
            libc::S_IFBLK => filetype::BLOCK_DEVICE,
            libc::S_IFSOCK => filetype::SOCKET_STREAM,
            _ => filetype::UNKNOWN,
        }
    }

    fn kind_of_dirent(d_type: u8) -> u8 {
        match d_type {
            libc::DT_DIR => filetype::DIRECTORY,
            libc::DT_REG => filetype::REGULAR_FILE,
            libc::DT_LNK => filetype::SYMBOLIC_LINK,
            libc::DT_CHR => filetype::CHARACTER_DEVICE,
            libc::DT_BLK => filetype::BLOCK_DEVICE,
            libc::DT_SOCK => filetype::SOCKET_STREAM,
            _ => filetype::UNKNOWN,
        }
    }

    fn nanos(secs: i64, nsecs: i64) -> u64 {
        (secs.max(0) as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(nsecs.max(0) as u64)
    }

    #[allow(clippy::unnecessary_cast)]
    fn filestat_of(st: &libc::stat) -> Filestat {
        Filestat {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            filetype: kind_of_mode(st.st_mode),
            nlink: st.st_nlink as u64,
            size: st.st_size.max(0) as u64,
            atim: nanos(st.st_atime as i64, st.st_atime_nsec as i64),
            mtim: nanos(st.st_mtime as i64, st.st_mtime_nsec as i64),
            ctim: nanos(st.st_ctime as i64, st.st_ctime_nsec as i64),
        }
    }

    /// An open host directory. `path` is only used for logging; every
    /// lookup goes through the descriptor.
    #[derive(Debug)]
    pub(crate) struct Dir {
        file: File,
        path: PathBuf,
    }

    impl Dir {
        pub(crate) fn open(path: &Path) -> io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_DIRECTORY | libc::O_CLOEXEC)
                .open(path)?;
            Ok(Self {
                file,
                path: path.to_path_buf(),
            })
        }

        pub(crate) fn metadata(&self) -> Result<Metadata, Errno> {
            Ok(self.file.metadata()?)
        }

        pub(crate) fn sync(&self) -> Result<(), Errno> {
            Ok(self.file.sync_all()?)
        }

        fn raw(&self) -> RawFd {
            self.file.as_raw_fd()
        }

        fn try_clone(&self) -> Result<Self, Errno> {
            Ok(Self {
                file: self.file.try_clone()?,
                path: self.path.clone(),
            })
        }

        /// Open subdirectory `name` without following a symlink.
        fn subdir(&self, name: &CStr) -> Result<Self, Errno> {
            // SAFETY: `name` is NUL-terminated and outlives the call.
            let fd = cvt(unsafe {
                libc::openat(
                    self.raw(),
                    name.as_ptr(),
                    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
                )
            })?;
            // SAFETY: `fd` was just returned by `openat` and has no other owner.
            let file = unsafe { File::from_raw_fd(fd) };
            Ok(Self {
                file,
                path: self.path.join(OsStr::from_bytes(name.to_bytes())),
            })
        }

        fn read_link_at(&self, name: &CStr) -> io::Result<Vec<u8>> {
            let mut buf = vec![0u8; libc::PATH_MAX as usize];
            // SAFETY: `buf` is writable for `buf.len()` bytes.
            let n = unsafe {
                libc::readlinkat(self.raw(), name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            buf.truncate(n as usize);
            Ok(buf)
        }

        /// Symlink target of `name`, or `None` when `name` is not a symlink
        /// or does not exist yet.
        fn symlink_target(&self, name: &CStr) -> Result<Option<Vec<u8>>, Errno> {
            match self.read_link_at(name) {
                Ok(target) => Ok(Some(target)),
                Err(err) if matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOENT)) => Ok(None),
                Err(err) => Err(err.into()),
            }
        }

        /// Resolve `path` to its parent directory handle and final component.
        ///
        /// Intermediate symlinks are always expanded; a symlink in the final
        /// component only when `follow` is set. `.` and `..` at the end name
        /// the directory reached so far.
        pub(crate) fn lookup(&self, path: &str, follow: bool) -> Result<Lookup, Errno> {
            if path.is_empty() {
                return Err(Errno::Noent);
            }
            if path.starts_with('/') || climbs_out(path.as_bytes()) {
                return Err(escape(path));
            }
            let mut pending: VecDeque<Vec<u8>> = components(path.as_bytes()).map(<[u8]>::to_vec).collect();
            let mut current = self.try_clone()?;
            let mut ancestors: Vec<Dir> = Vec::new();
            let mut hops = 0usize;

            while let Some(part) = pending.pop_front() {
                match part.as_slice() {
                    b"." => continue,
                    b".." => {
                        current = ancestors.pop().ok_or_else(|| escape(path))?;
                        continue;
                    }
                    _ => {}
                }
                let name = CString::new(part).map_err(|_| Errno::Ilseq)?;
                let is_leaf = pending.is_empty();
                if !is_leaf || follow {
                    if let Some(target) = current.symlink_target(&name)? {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(Errno::Loop);
                        }
                        if target.starts_with(b"/") {
                            return Err(escape(path));
                        }
                        for part in components(&target).rev() {
                            pending.push_front(part.to_vec());
                        }
                        continue;
                    }
                }
                if is_leaf {
                    return Ok(Lookup { dir: current, leaf: name });
                }
                let child = current.subdir(&name)?;
                ancestors.push(std::mem::replace(&mut current, child));
            }
            let leaf = CString::new(".").map_err(|_| Errno::Ilseq)?;
            Ok(Lookup { dir: current, leaf })
        }

        /// Entries other than `.` and `..`, in host order.
        pub(crate) fn entries(&self) -> Result<Vec<Entry>, Errno> {
            // `fdopendir` takes ownership of the descriptor it is given.
            let fd = cvt(unsafe { libc::dup(self.raw()) })?;
            // SAFETY: `fd` is a fresh directory descriptor; on success the
            // stream owns it and `closedir` releases both.
            let stream = unsafe { libc::fdopendir(fd) };
            if stream.is_null() {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err.into());
            }
            let mut entries = Vec::new();
            unsafe {
                libc::rewinddir(stream);
                loop {
                    let raw = libc::readdir(stream);
                    if raw.is_null() {
                        break;
                    }
                    let raw = &*raw;
                    let name = CStr::from_ptr(raw.d_name.as_ptr()).to_bytes();
                    if name == b"." || name == b".." {
                        continue;
                    }
                    entries.push(Entry {
                        name: name.to_vec(),
                        ino: raw.d_ino as u64,
                        filetype: kind_of_dirent(raw.d_type),
                    });
                }
                libc::closedir(stream);
            }
            Ok(entries)
        }
    }

    /// The result of a lookup: the directory holding the final component,
    /// and that component's name.
    #[derive(Debug)]
    pub(crate) struct Lookup {
        dir: Dir,
        leaf: CString,
    }

    impl Lookup {
        /// Host path, for logging.
        pub(crate) fn host_path(&self) -> PathBuf {
            self.dir.path.join(OsStr::from_bytes(self.leaf.to_bytes()))
        }

        /// `fstatat` on the final component, never following it.
        pub(crate) fn filestat(&self) -> Result<Filestat, Errno> {
            // SAFETY: all-zero is a valid `stat`; it is only read after the
            // call filled it in.
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            cvt(unsafe {
                libc::fstatat(self.dir.raw(), self.leaf.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW)
            })?;
            Ok(filestat_of(&st))
        }

        /// Open the final component as a file. A symlink there is `LOOP`.
        pub(crate) fn open_file(&self, read: bool, write: bool, create: bool, exclusive: bool, truncate: bool) -> Result<File, Errno> {
            let mut flags = match (read, write) {
                (true, true) => libc::O_RDWR,
                (false, true) => libc::O_WRONLY,
                _ => libc::O_RDONLY,
            };
            flags |= libc::O_NOFOLLOW | libc::O_CLOEXEC;
            if create {
                flags |= libc::O_CREAT;
            }
            if create && exclusive {
                flags |= libc::O_EXCL;
            }
            if truncate {
                flags |= libc::O_TRUNC;
            }
            let mode: libc::c_uint = 0o666;
            // SAFETY: `leaf` is NUL-terminated; `mode` is only read with O_CREAT.
            let fd = cvt(unsafe { libc::openat(self.dir.raw(), self.leaf.as_ptr(), flags, mode) })?;
            // SAFETY: `fd` was just returned by `openat` and has no other owner.
            Ok(unsafe { File::from_raw_fd(fd) })
        }

        pub(crate) fn open_dir(&self) -> Result<Dir, Errno> {
            self.dir.subdir(&self.leaf)
        }

        pub(crate) fn create_dir(&self) -> Result<(), Errno> {
            cvt(unsafe { libc::mkdirat(self.dir.raw(), self.leaf.as_ptr(), 0o777) })?;
            Ok(())
        }

        pub(crate) fn unlink_file(&self) -> Result<(), Errno> {
            cvt(unsafe { libc::unlinkat(self.dir.raw(), self.leaf.as_ptr(), 0) })?;
            Ok(())
        }

        pub(crate) fn remove_dir(&self) -> Result<(), Errno> {
            cvt(unsafe { libc::unlinkat(self.dir.raw(), self.leaf.as_ptr(), libc::AT_REMOVEDIR) })?;
            Ok(())
        }

        pub(crate) fn rename_to(&self, to: &Lookup) -> Result<(), Errno> {
            cvt(unsafe {
                libc::renameat(self.dir.raw(), self.leaf.as_ptr(), to.dir.raw(), to.leaf.as_ptr())
            })?;
            Ok(())
        }

        pub(crate) fn read_link(&self) -> Result<Vec<u8>, Errno> {
            Ok(self.dir.read_link_at(&self.leaf)?)
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::fs::Metadata;

    use super::*;

    /// Descriptor-relative lookup needs `openat`; without it no directory
    /// can be preopened.
    #[derive(Debug)]
    pub(crate) struct Dir {
        _private: (),
    }

    impl Dir {
        pub(crate) fn open(_path: &Path) -> io::Result<Self> {
            Err(io::ErrorKind::Unsupported.into())
        }

        pub(crate) fn metadata(&self) -> Result<Metadata, Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn sync(&self) -> Result<(), Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn lookup(&self, _path: &str, _follow: bool) -> Result<Lookup, Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn entries(&self) -> Result<Vec<Entry>, Errno> {
            Err(Errno::Notsup)
        }
    }

    #[derive(Debug)]
    pub(crate) struct Lookup {
        path: PathBuf,
    }

    impl Lookup {
        pub(crate) fn host_path(&self) -> PathBuf {
            self.path.clone()
        }

        pub(crate) fn filestat(&self) -> Result<Filestat, Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn open_file(&self, _read: bool, _write: bool, _create: bool, _exclusive: bool, _truncate: bool) -> Result<File, Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn open_dir(&self) -> Result<Dir, Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn create_dir(&self) -> Result<(), Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn unlink_file(&self) -> Result<(), Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn remove_dir(&self) -> Result<(), Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn rename_to(&self, _to: &Lookup) -> Result<(), Errno> {
            Err(Errno::Notsup)
        }

        pub(crate) fn read_link(&self) -> Result<Vec<u8>, Errno> {
            Err(Errno::Notsup)
        }
    }
}

pub(crate) use imp::{Dir, Lookup};
