//! `fd_*` and `path_*`.
//!
//! Paths are looked up relative to the directory descriptor they name, one
//! component at a time (see `dir`). Absolute paths, `..` that climbs above
//! that directory and symlinks that lead out of it are refused with
//! `NOTCAPABLE`.

use std::fs::{self, File, Metadata};
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use waq_runtime::LinearMemory;

use crate::dir::{Dir, Lookup};
use crate::fd_table::{FdEntry, HostHandle};
use crate::guest::{self, IoVec};
use crate::{fdflags, filetype, lookupflags, oflags, rights, whence, Errno, WasiCtx};

const FILESTAT_SIZE: usize = 64;
const FDSTAT_SIZE: usize = 24;
const DIRENT_HEADER_SIZE: usize = 24;
const PRESTAT_TAG_DIR: u8 = 0;
const ADVICE_NOREUSE_MAX: i32 = 5;
const KNOWN_FDFLAGS: u16 =
    fdflags::APPEND | fdflags::DSYNC | fdflags::NONBLOCK | fdflags::RSYNC | fdflags::SYNC;

// ── Layouts ──────────────────────────────────────────────────────────────

/// Guest `filestat` record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: u8,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

fn nanos(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn filetype_of(file_type: fs::FileType) -> u8 {
    if file_type.is_dir() {
        return filetype::DIRECTORY;
    }
    if file_type.is_file() {
        return filetype::REGULAR_FILE;
    }
    if file_type.is_symlink() {
        return filetype::SYMBOLIC_LINK;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_char_device() {
            return filetype::CHARACTER_DEVICE;
        }
        if file_type.is_block_device() {
            return filetype::BLOCK_DEVICE;
        }
        if file_type.is_socket() {
            return filetype::SOCKET_STREAM;
        }
    }
    filetype::UNKNOWN
}

impl Filestat {
    pub(crate) fn from_metadata(meta: &Metadata) -> Self {
        let mut stat = Filestat {
            dev: 0,
            ino: 0,
            filetype: filetype_of(meta.file_type()),
            nlink: 1,
            size: meta.len(),
            atim: nanos(meta.accessed()),
            mtim: nanos(meta.modified()),
            ctim: nanos(meta.modified()),
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            stat.dev = meta.dev();
            stat.ino = meta.ino();
            stat.nlink = meta.nlink();
            stat.ctim = (meta.ctime() as u64)
                .saturating_mul(1_000_000_000)
                .saturating_add(meta.ctime_nsec() as u64);
        }
        stat
    }

    pub(crate) fn encode(&self) -> [u8; FILESTAT_SIZE] {
        let mut out = [0u8; FILESTAT_SIZE];
        out[0..8].copy_from_slice(&self.dev.to_le_bytes());
        out[8..16].copy_from_slice(&self.ino.to_le_bytes());
        out[16] = self.filetype;
        out[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        out[32..40].copy_from_slice(&self.size.to_le_bytes());
        out[40..48].copy_from_slice(&self.atim.to_le_bytes());
        out[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        out[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        out
    }
}

fn encode_fdstat(entry: &FdEntry) -> [u8; FDSTAT_SIZE] {
    let mut out = [0u8; FDSTAT_SIZE];
    out[0] = entry.filetype;
    out[2..4].copy_from_slice(&entry.flags.to_le_bytes());
    out[8..16].copy_from_slice(&entry.rights_base.to_le_bytes());
    out[16..24].copy_from_slice(&entry.rights_inheriting.to_le_bytes());
    out
}

fn push_dirent(out: &mut Vec<u8>, next: u64, ino: u64, kind: u8, name: &[u8]) {
    let mut header = [0u8; DIRENT_HEADER_SIZE];
    header[0..8].copy_from_slice(&next.to_le_bytes());
    header[8..16].copy_from_slice(&ino.to_le_bytes());
    header[16..20].copy_from_slice(&(name.len() as u32).to_le_bytes());
    header[20] = kind;
    out.extend_from_slice(&header);
    out.extend_from_slice(name);
}

// ── Directory listing ────────────────────────────────────────────────────

/// `.` and `..` followed by the entries of `dir` in name order. A cookie is
/// an index into this listing.
fn dir_listing(dir: &Dir) -> Result<Vec<(Vec<u8>, u64, u8)>, Errno> {
    let mut entries: Vec<_> = dir
        .entries()?
        .into_iter()
        .map(|entry| (entry.name, entry.ino, entry.filetype))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut listing = vec![
        (b".".to_vec(), 0, filetype::DIRECTORY),
        (b"..".to_vec(), 0, filetype::DIRECTORY),
    ];
    listing.extend(entries);
    Ok(listing)
}

fn whence_to_seek(offset: i64, whence_value: i32) -> Result<SeekFrom, Errno> {
    match u8::try_from(whence_value).map_err(|_| Errno::Inval)? {
        whence::SET => u64::try_from(offset)
            .map(SeekFrom::Start)
            .map_err(|_| Errno::Inval),
        whence::CUR => Ok(SeekFrom::Current(offset)),
        whence::END => Ok(SeekFrom::End(offset)),
        _ => Err(Errno::Inval),
    }
}

fn io_buffers<'m>(mem: &'m LinearMemory, iovs: &[IoVec]) -> Result<Vec<&'m [u8]>, Errno> {
    iovs.iter()
        .map(|iov| guest::read_bytes(mem, iov.buf, iov.len))
        .collect()
}

/// Read into each guest buffer in turn, stopping at the first short read.
fn scatter_read(
    mem: &mut LinearMemory,
    iovs: &[IoVec],
    mut read: impl FnMut(&mut [u8]) -> Result<usize, Errno>,
) -> Result<u32, Errno> {
    io_buffers(mem, iovs)?;
    let mut total = 0u32;
    for iov in iovs {
        let buf = guest::bytes_mut(mem, iov.buf, iov.len)?;
        let wanted = buf.len();
        let n = read(buf)?;
        total = total.saturating_add(n as u32);
        if n < wanted {
            break;
        }
    }
    Ok(total)
}

/// Write each guest buffer in turn, stopping at the first short write.
fn gather_write(
    mem: &LinearMemory,
    iovs: &[IoVec],
    mut write: impl FnMut(&[u8]) -> Result<usize, Errno>,
) -> Result<u32, Errno> {
    let mut total = 0u32;
    for buf in io_buffers(mem, iovs)? {
        let n = write(buf)?;
        total = total.saturating_add(n as u32);
        if n < buf.len() {
            break;
        }
    }
    Ok(total)
}

/// Run `op` at `offset`, leaving the file cursor where it was.
fn at_offset<T>(
    file: &mut File,
    offset: i64,
    op: impl FnOnce(&mut File) -> Result<T, Errno>,
) -> Result<T, Errno> {
    let offset = u64::try_from(offset).map_err(|_| Errno::Inval)?;
    let saved = file.stream_position()?;
    file.seek(SeekFrom::Start(offset))?;
    let result = op(&mut *file);
    file.seek(SeekFrom::Start(saved))?;
    result
}

// ── Descriptor calls ─────────────────────────────────────────────────────

impl WasiCtx {
    fn read_fd(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, nread: i32) -> Result<(), Errno> {
        let entry = self.fds.get_with_rights(fd, rights::FD_READ)?;
        let iovs = guest::read_iovecs(mem, iovs, iovs_len)?;
        let total = scatter_read(mem, &iovs, |buf| entry.handle.read(buf))?;
        guest::write_u32(mem, nread, total)
    }

    pub fn fd_read(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, nread_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, iovs_len, "fd_read");
        Errno::from_result(self.read_fd(mem, fd, iovs, iovs_len, nread_ptr))
    }

    fn write_fd(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, nwritten: i32) -> Result<(), Errno> {
        let entry = self.fds.get_with_rights(fd, rights::FD_WRITE)?;
        let iovs = guest::read_iovecs(mem, iovs, iovs_len)?;
        let append = entry.is_append();
        let total = gather_write(mem, &iovs, |buf| entry.handle.write(buf, append))?;
        guest::write_u32(mem, nwritten, total)
    }

    pub fn fd_write(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, nwritten_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, iovs_len, "fd_write");
        Errno::from_result(self.write_fd(mem, fd, iovs, iovs_len, nwritten_ptr))
    }

    fn pread_fd(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, offset: i64, nread: i32) -> Result<(), Errno> {
        let file = self
            .fds
            .get_with_rights(fd, rights::FD_READ | rights::FD_SEEK)?
            .handle
            .file()?;
        let iovs = guest::read_iovecs(mem, iovs, iovs_len)?;
        let total = at_offset(file, offset, |file| {
            scatter_read(mem, &iovs, |buf| Ok(file.read(buf)?))
        })?;
        guest::write_u32(mem, nread, total)
    }

    pub fn fd_pread(
        &mut self,
        mem: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        offset: i64,
        nread_ptr: i32,
    ) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, offset, "fd_pread");
        Errno::from_result(self.pread_fd(mem, fd, iovs, iovs_len, offset, nread_ptr))
    }

    fn pwrite_fd(&mut self, mem: &mut LinearMemory, fd: i32, iovs: i32, iovs_len: i32, offset: i64, nwritten: i32) -> Result<(), Errno> {
        let file = self
            .fds
            .get_with_rights(fd, rights::FD_WRITE | rights::FD_SEEK)?
            .handle
            .file()?;
        let iovs = guest::read_iovecs(mem, iovs, iovs_len)?;
        let total = at_offset(file, offset, |file| {
            gather_write(mem, &iovs, |buf| Ok(file.write(buf)?))
        })?;
        guest::write_u32(mem, nwritten, total)
    }

    pub fn fd_pwrite(
        &mut self,
        mem: &mut LinearMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        offset: i64,
        nwritten_ptr: i32,
    ) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, offset, "fd_pwrite");
        Errno::from_result(self.pwrite_fd(mem, fd, iovs, iovs_len, offset, nwritten_ptr))
    }

    fn seek_fd(&mut self, mem: &mut LinearMemory, fd: i32, offset: i64, whence_value: i32, newoffset: i32) -> Result<(), Errno> {
        let target = whence_to_seek(offset, whence_value)?;
        let file = self.fds.get_with_rights(fd, rights::FD_SEEK)?.handle.file()?;
        let position = file.seek(target)?;
        guest::write_u64(mem, newoffset, position)
    }

    pub fn fd_seek(&mut self, mem: &mut LinearMemory, fd: i32, offset: i64, whence: i32, newoffset_ptr: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, offset, whence, "fd_seek");
        Errno::from_result(self.seek_fd(mem, fd, offset, whence, newoffset_ptr))
    }

    fn tell_fd(&mut self, mem: &mut LinearMemory, fd: i32, offset: i32) -> Result<(), Errno> {
        let file = self.fds.get_with_rights(fd, rights::FD_TELL)?.handle.file()?;
        let position = file.stream_position()?;
        guest::write_u64(mem, offset, position)
    }

    pub fn fd_tell(&mut self, mem: &mut LinearMemory, fd: i32, offset_ptr: i32) -> i32 {
        Errno::from_result(self.tell_fd(mem, fd, offset_ptr))
    }

    fn sync_fd(&mut self, fd: i32, required: u64, data_only: bool) -> Result<(), Errno> {
        match &mut self.fds.get_with_rights(fd, required)?.handle {
            HostHandle::File(file) if data_only => Ok(file.sync_data()?),
            HostHandle::File(file) => Ok(file.sync_all()?),
            HostHandle::Stdout => Ok(std::io::stdout().flush()?),
            HostHandle::Stderr => Ok(std::io::stderr().flush()?),
            HostHandle::Dir(dir) => dir.sync(),
            HostHandle::Stdin => Ok(()),
        }
    }

    pub fn fd_sync(&mut self, fd: i32) -> i32 {
        Errno::from_result(self.sync_fd(fd, rights::FD_SYNC, false))
    }

    pub fn fd_datasync(&mut self, fd: i32) -> i32 {
        Errno::from_result(self.sync_fd(fd, rights::FD_DATASYNC, true))
    }

    pub fn fd_close(&mut self, fd: i32) -> i32 {
        let result = self.fds.remove(fd).map(|entry| {
            tracing::debug!(target: "waq::wasi", fd, preopen = ?entry.preopen, "descriptor closed");
        });
        Errno::from_result(result)
    }

    pub fn fd_renumber(&mut self, from: i32, to: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", from, to, "fd_renumber");
        Errno::from_result(self.fds.renumber(from, to))
    }

    fn advise_fd(&mut self, fd: i32, offset: i64, len: i64, advice: i32) -> Result<(), Errno> {
        self.fds.get_with_rights(fd, rights::FD_ADVISE)?;
        if offset < 0 || len < 0 || !(0..=ADVICE_NOREUSE_MAX).contains(&advice) {
            return Err(Errno::Inval);
        }
        Ok(())
    }

    /// Advisory only; validated and otherwise ignored.
    pub fn fd_advise(&mut self, fd: i32, offset: i64, len: i64, advice: i32) -> i32 {
        Errno::from_result(self.advise_fd(fd, offset, len, advice))
    }

    fn allocate_fd(&mut self, fd: i32, offset: i64, len: i64) -> Result<(), Errno> {
        let file = self.fds.get_with_rights(fd, rights::FD_ALLOCATE)?.handle.file()?;
        let offset = u64::try_from(offset).map_err(|_| Errno::Inval)?;
        let len = u64::try_from(len).map_err(|_| Errno::Inval)?;
        let end = offset.checked_add(len).ok_or(Errno::Fbig)?;
        if end > file.metadata()?.len() {
            file.set_len(end)?;
        }
        Ok(())
    }

    pub fn fd_allocate(&mut self, fd: i32, offset: i64, len: i64) -> i32 {
        Errno::from_result(self.allocate_fd(fd, offset, len))
    }

    fn fdstat_fd(&mut self, mem: &mut LinearMemory, fd: i32, buf: i32) -> Result<(), Errno> {
        let stat = encode_fdstat(self.fds.get(fd)?);
        guest::write_bytes(mem, buf, &stat)
    }

    pub fn fd_fdstat_get(&mut self, mem: &mut LinearMemory, fd: i32, buf_ptr: i32) -> i32 {
        Errno::from_result(self.fdstat_fd(mem, fd, buf_ptr))
    }

    fn set_flags_fd(&mut self, fd: i32, flags: i32) -> Result<(), Errno> {
        let flags = u16::try_from(flags).map_err(|_| Errno::Inval)?;
        if flags & !KNOWN_FDFLAGS != 0 {
            return Err(Errno::Inval);
        }
        self.fds.get_with_rights(fd, rights::FD_FDSTAT_SET_FLAGS)?.flags = flags;
        Ok(())
    }

    pub fn fd_fdstat_set_flags(&mut self, fd: i32, flags: i32) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, flags, "fd_fdstat_set_flags");
        Errno::from_result(self.set_flags_fd(fd, flags))
    }

    fn filestat_fd(&mut self, mem: &mut LinearMemory, fd: i32, buf: i32) -> Result<(), Errno> {
        let entry = self.fds.get_with_rights(fd, rights::FD_FILESTAT_GET)?;
        let stat = match &entry.handle {
            HostHandle::File(file) => Filestat::from_metadata(&file.metadata()?),
            HostHandle::Dir(dir) => Filestat::from_metadata(&dir.metadata()?),
            HostHandle::Stdin | HostHandle::Stdout | HostHandle::Stderr => Filestat {
                filetype: filetype::CHARACTER_DEVICE,
                ..Filestat::default()
            },
        };
        guest::write_bytes(mem, buf, &stat.encode())
    }

    pub fn fd_filestat_get(&mut self, mem: &mut LinearMemory, fd: i32, buf_ptr: i32) -> i32 {
        Errno::from_result(self.filestat_fd(mem, fd, buf_ptr))
    }

    fn set_size_fd(&mut self, fd: i32, size: i64) -> Result<(), Errno> {
        let size = u64::try_from(size).map_err(|_| Errno::Inval)?;
        let file = self
            .fds
            .get_with_rights(fd, rights::FD_FILESTAT_SET_SIZE)?
            .handle
            .file()?;
        Ok(file.set_len(size)?)
    }

    pub fn fd_filestat_set_size(&mut self, fd: i32, size: i64) -> i32 {
        Errno::from_result(self.set_size_fd(fd, size))
    }

    fn prestat_fd(&mut self, mem: &mut LinearMemory, fd: i32, buf: i32) -> Result<(), Errno> {
        let name = self.fds.get(fd)?.preopen.as_ref().ok_or(Errno::Badf)?;
        let mut prestat = [0u8; 8];
        prestat[0] = PRESTAT_TAG_DIR;
        prestat[4..8].copy_from_slice(&(name.len() as u32).to_le_bytes());
        guest::write_bytes(mem, buf, &prestat)
    }

    pub fn fd_prestat_get(&mut self, mem: &mut LinearMemory, fd: i32, buf_ptr: i32) -> i32 {
        Errno::from_result(self.prestat_fd(mem, fd, buf_ptr))
    }

    fn prestat_name_fd(&mut self, mem: &mut LinearMemory, fd: i32, path: i32, path_len: i32) -> Result<(), Errno> {
        let name = self.fds.get(fd)?.preopen.as_ref().ok_or(Errno::Badf)?;
        let capacity = usize::try_from(path_len).map_err(|_| Errno::Inval)?;
        if name.len() > capacity {
            return Err(Errno::Nametoolong);
        }
        guest::write_bytes(mem, path, name.as_bytes())
    }

    pub fn fd_prestat_dir_name(&mut self, mem: &mut LinearMemory, fd: i32, path_ptr: i32, path_len: i32) -> i32 {
        Errno::from_result(self.prestat_name_fd(mem, fd, path_ptr, path_len))
    }

    fn readdir_fd(&mut self, mem: &mut LinearMemory, fd: i32, buf: i32, buf_len: i32, cookie: i64, bufused: i32) -> Result<(), Errno> {
        let capacity = u32::try_from(buf_len).map_err(|_| Errno::Inval)?;
        let cookie = usize::try_from(cookie).map_err(|_| Errno::Inval)?;
        guest::read_bytes(mem, buf, capacity)?;
        let capacity = capacity as usize;
        let entry = self.fds.get_with_rights(fd, rights::FD_READDIR)?;
        let HostHandle::Dir(dir) = &entry.handle else {
            return Err(Errno::Notdir);
        };
        let mut out = Vec::new();
        for (index, (name, ino, kind)) in dir_listing(dir)?.into_iter().enumerate().skip(cookie) {
            if out.len() >= capacity {
                break;
            }
            push_dirent(&mut out, index as u64 + 1, ino, kind, &name);
        }
        out.truncate(capacity);
        guest::write_bytes(mem, buf, &out)?;
        guest::write_u32(mem, bufused, out.len() as u32)
    }

    /// Fill `buf` with dirents starting at `cookie`. A full buffer means the
    /// last entry may be truncated; the guest resumes from the last complete
    /// entry's `d_next`.
    pub fn fd_readdir(
        &mut self,
        mem: &mut LinearMemory,
        fd: i32,
        buf: i32,
        buf_len: i32,
        cookie: i64,
        bufused_ptr: i32,
    ) -> i32 {
        tracing::trace!(target: "waq::wasi", fd, cookie, "fd_readdir");
        Errno::from_result(self.readdir_fd(mem, fd, buf, buf_len, cookie, bufused_ptr))
    }
}

// ── Path calls ───────────────────────────────────────────────────────────

impl WasiCtx {
    /// Look up `path` relative to directory descriptor `dirfd`.
    fn resolve(&mut self, dirfd: i32, path: &str, required: u64, follow: bool) -> Result<Lookup, Errno> {
        let entry = self.fds.get_with_rights(dirfd, required)?;
        let HostHandle::Dir(dir) = &entry.handle else {
            return Err(Errno::Notdir);
        };
        dir.lookup(path, follow)
    }

    fn resolve_guest(
        &mut self,
        mem: &LinearMemory,
        dirfd: i32,
        path_ptr: i32,
        path_len: i32,
        required: u64,
        follow: bool,
    ) -> Result<Lookup, Errno> {
        let path = guest::read_path(mem, path_ptr, path_len)?;
        self.resolve(dirfd, &path, required, follow)
    }

    #[allow(clippy::too_many_arguments)]
    fn open_path(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        dirflags: i32,
        path_ptr: i32,
        path_len: i32,
        open_flags: i32,
        rights_base: i64,
        rights_inheriting: i64,
        fd_flags: i32,
        fd_ptr: i32,
    ) -> Result<(), Errno> {
        let open_flags = u16::try_from(open_flags).map_err(|_| Errno::Inval)?;
        let fd_flags = u16::try_from(fd_flags).map_err(|_| Errno::Inval)?;
        if fd_flags & !KNOWN_FDFLAGS != 0 {
            return Err(Errno::Inval);
        }
        let follow = dirflags as u32 & lookupflags::SYMLINK_FOLLOW != 0;
        let create = open_flags & oflags::CREAT != 0;
        let want_dir = open_flags & oflags::DIRECTORY != 0;
        if want_dir && create {
            return Err(Errno::Inval);
        }

        let mut required = rights::PATH_OPEN;
        if create {
            required |= rights::PATH_CREATE_FILE;
        }
        let target = self.resolve_guest(mem, dirfd, path_ptr, path_len, required, follow)?;
        let inherited = self.fds.get(dirfd)?.rights_inheriting;
        let rights_base = rights_base as u64 & inherited;
        let rights_inheriting = rights_inheriting as u64 & inherited;

        let truncate = open_flags & oflags::TRUNC != 0;
        let write = rights_base & rights::FD_WRITE != 0 || truncate || create;
        let existing = target.filestat().ok();

        let entry = match &existing {
            Some(stat) if stat.filetype == filetype::DIRECTORY => {
                if write {
                    return Err(Errno::Isdir);
                }
                FdEntry {
                    handle: HostHandle::Dir(target.open_dir()?),
                    filetype: filetype::DIRECTORY,
                    flags: fd_flags,
                    rights_base: rights_base & rights::DIRECTORY_BASE,
                    rights_inheriting,
                    preopen: None,
                }
            }
            _ if want_dir => {
                return Err(if existing.is_some() { Errno::Notdir } else { Errno::Noent });
            }
            _ => {
                let read = rights_base & rights::FD_READ != 0 || !write;
                let exclusive = open_flags & oflags::EXCL != 0;
                let file = target.open_file(read, write, create, exclusive, truncate)?;
                let kind = filetype_of(file.metadata()?.file_type());
                FdEntry {
                    handle: HostHandle::File(file),
                    filetype: kind,
                    flags: fd_flags,
                    rights_base: rights_base & rights::FILE_BASE,
                    rights_inheriting: 0,
                    preopen: None,
                }
            }
        };

        let fd = self.fds.insert(entry)?;
        if let Err(errno) = guest::write_u32(mem, fd_ptr, fd) {
            self.fds.remove(fd as i32)?;
            return Err(errno);
        }
        tracing::debug!(target: "waq::wasi", fd, path = %target.host_path().display(), "path opened");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_open(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        dirflags: i32,
        path_ptr: i32,
        path_len: i32,
        oflags: i32,
        rights_base: i64,
        rights_inheriting: i64,
        fdflags: i32,
        fd_ptr: i32,
    ) -> i32 {
        tracing::trace!(target: "waq::wasi", dirfd, oflags, "path_open");
        Errno::from_result(self.open_path(
            mem,
            dirfd,
            dirflags,
            path_ptr,
            path_len,
            oflags,
            rights_base,
            rights_inheriting,
            fdflags,
            fd_ptr,
        ))
    }

    pub fn path_create_directory(&mut self, mem: &mut LinearMemory, dirfd: i32, path_ptr: i32, path_len: i32) -> i32 {
        let result = self
            .resolve_guest(mem, dirfd, path_ptr, path_len, rights::PATH_CREATE_DIRECTORY, false)
            .and_then(|target| target.create_dir());
        Errno::from_result(result)
    }

    fn unlink_path(&mut self, mem: &LinearMemory, dirfd: i32, path_ptr: i32, path_len: i32) -> Result<(), Errno> {
        let target = self.resolve_guest(mem, dirfd, path_ptr, path_len, rights::PATH_UNLINK_FILE, false)?;
        if target.filestat()?.filetype == filetype::DIRECTORY {
            return Err(Errno::Isdir);
        }
        target.unlink_file()
    }

    pub fn path_unlink_file(&mut self, mem: &mut LinearMemory, dirfd: i32, path_ptr: i32, path_len: i32) -> i32 {
        Errno::from_result(self.unlink_path(mem, dirfd, path_ptr, path_len))
    }

    pub fn path_remove_directory(&mut self, mem: &mut LinearMemory, dirfd: i32, path_ptr: i32, path_len: i32) -> i32 {
        let result = self
            .resolve_guest(mem, dirfd, path_ptr, path_len, rights::PATH_REMOVE_DIRECTORY, false)
            .and_then(|target| target.remove_dir());
        Errno::from_result(result)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_rename(
        &mut self,
        mem: &mut LinearMemory,
        old_fd: i32,
        old_ptr: i32,
        old_len: i32,
        new_fd: i32,
        new_ptr: i32,
        new_len: i32,
    ) -> i32 {
        let result = self
            .resolve_guest(mem, old_fd, old_ptr, old_len, rights::PATH_RENAME_SOURCE, false)
            .and_then(|from| {
                let to = self.resolve_guest(mem, new_fd, new_ptr, new_len, rights::PATH_RENAME_TARGET, false)?;
                from.rename_to(&to)
            });
        Errno::from_result(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn filestat_path(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        dirflags: i32,
        path_ptr: i32,
        path_len: i32,
        buf: i32,
    ) -> Result<(), Errno> {
        let follow = dirflags as u32 & lookupflags::SYMLINK_FOLLOW != 0;
        let target = self.resolve_guest(mem, dirfd, path_ptr, path_len, rights::PATH_FILESTAT_GET, follow)?;
        let stat = target.filestat()?;
        guest::write_bytes(mem, buf, &stat.encode())
    }

    pub fn path_filestat_get(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        dirflags: i32,
        path_ptr: i32,
        path_len: i32,
        buf_ptr: i32,
    ) -> i32 {
        Errno::from_result(self.filestat_path(mem, dirfd, dirflags, path_ptr, path_len, buf_ptr))
    }

    #[allow(clippy::too_many_arguments)]
    fn readlink_path(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        path_ptr: i32,
        path_len: i32,
        buf: i32,
        buf_len: i32,
        bufused: i32,
    ) -> Result<(), Errno> {
        let capacity = usize::try_from(buf_len).map_err(|_| Errno::Inval)?;
        let target = self.resolve_guest(mem, dirfd, path_ptr, path_len, rights::PATH_READLINK, false)?;
        let link = target.read_link()?;
        let used = link.len().min(capacity);
        guest::write_bytes(mem, buf, &link[..used])?;
        guest::write_u32(mem, bufused, used as u32)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_readlink(
        &mut self,
        mem: &mut LinearMemory,
        dirfd: i32,
        path_ptr: i32,
        path_len: i32,
        buf: i32,
        buf_len: i32,
        bufused_ptr: i32,
    ) -> i32 {
        Errno::from_result(self.readlink_path(mem, dirfd, path_ptr, path_len, buf, buf_len, bufused_ptr))
    }
}
