//! Guest file descriptors.
//!
//! A fixed table of `MAX_FDS` slots, each `None` or an open host handle with
//! its WASI rights. Slots 0–2 are the standard streams; preopened
//! directories follow from 3. New descriptors take the lowest free slot at
//! or above 3.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use crate::dir::Dir;
use crate::{fdflags, filetype, rights, Errno};

pub const MAX_FDS: usize = 1024;

/// First descriptor handed out by `path_open`.
const FIRST_DYNAMIC_FD: usize = 3;

#[derive(Debug)]
pub(crate) enum HostHandle {
    Stdin,
    Stdout,
    Stderr,
    File(File),
    Dir(Dir),
}

impl HostHandle {
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        match self {
            HostHandle::Stdin => Ok(io::stdin().read(buf)?),
            HostHandle::File(file) => Ok(file.read(buf)?),
            HostHandle::Dir(_) => Err(Errno::Isdir),
            HostHandle::Stdout | HostHandle::Stderr => Err(Errno::Badf),
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8], append: bool) -> Result<usize, Errno> {
        match self {
            HostHandle::Stdout => Ok(io::stdout().write(buf)?),
            HostHandle::Stderr => Ok(io::stderr().write(buf)?),
            HostHandle::File(file) => {
                if append {
                    file.seek(SeekFrom::End(0))?;
                }
                Ok(file.write(buf)?)
            }
            HostHandle::Dir(_) => Err(Errno::Isdir),
            HostHandle::Stdin => Err(Errno::Badf),
        }
    }

    /// The open file, or `SPIPE` for streams and `ISDIR` for directories.
    pub(crate) fn file(&mut self) -> Result<&mut File, Errno> {
        match self {
            HostHandle::File(file) => Ok(file),
            HostHandle::Dir(_) => Err(Errno::Isdir),
            _ => Err(Errno::Spipe),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FdEntry {
    pub handle: HostHandle,
    pub filetype: u8,
    pub flags: u16,
    pub rights_base: u64,
    pub rights_inheriting: u64,
    /// Guest-visible name when this is a preopened directory.
    pub preopen: Option<String>,
}

impl FdEntry {
    fn stdio(handle: HostHandle, rights_base: u64) -> Self {
        Self {
            handle,
            filetype: filetype::CHARACTER_DEVICE,
            flags: 0,
            rights_base,
            rights_inheriting: 0,
            preopen: None,
        }
    }

    pub(crate) fn preopened_dir(dir: Dir, name: String) -> Self {
        Self {
            handle: HostHandle::Dir(dir),
            filetype: filetype::DIRECTORY,
            flags: 0,
            rights_base: rights::DIRECTORY_BASE,
            rights_inheriting: rights::DIRECTORY_BASE | rights::FILE_BASE,
            preopen: Some(name),
        }
    }

    pub(crate) fn is_append(&self) -> bool {
        self.flags & fdflags::APPEND != 0
    }
}

#[derive(Debug)]
pub(crate) struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    /// A table holding only the standard streams.
    pub(crate) fn with_stdio() -> Self {
        let mut slots: Vec<Option<FdEntry>> = Vec::with_capacity(MAX_FDS);
        slots.resize_with(MAX_FDS, || None);
        let stream = rights::FD_FDSTAT_SET_FLAGS | rights::FD_FILESTAT_GET | rights::POLL_FD_READWRITE;
        slots[0] = Some(FdEntry::stdio(HostHandle::Stdin, stream | rights::FD_READ));
        slots[1] = Some(FdEntry::stdio(HostHandle::Stdout, stream | rights::FD_WRITE));
        slots[2] = Some(FdEntry::stdio(HostHandle::Stderr, stream | rights::FD_WRITE));
        Self { slots }
    }

    /// Place `entry` in the lowest free dynamic slot.
    pub(crate) fn insert(&mut self, entry: FdEntry) -> Result<u32, Errno> {
        let (fd, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .skip(FIRST_DYNAMIC_FD)
            .find(|(_, slot)| slot.is_none())
            .ok_or(Errno::Mfile)?;
        *slot = Some(entry);
        Ok(fd as u32)
    }

    fn slot(&self, fd: i32) -> Result<&Option<FdEntry>, Errno> {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.slots.get(fd))
            .ok_or(Errno::Badf)
    }

    fn slot_mut(&mut self, fd: i32) -> Result<&mut Option<FdEntry>, Errno> {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.slots.get_mut(fd))
            .ok_or(Errno::Badf)
    }

    pub(crate) fn get(&self, fd: i32) -> Result<&FdEntry, Errno> {
        self.slot(fd)?.as_ref().ok_or(Errno::Badf)
    }

    /// The entry for `fd`, provided it carries every bit of `required`.
    pub(crate) fn get_with_rights(&mut self, fd: i32, required: u64) -> Result<&mut FdEntry, Errno> {
        let entry = self.slot_mut(fd)?.as_mut().ok_or(Errno::Badf)?;
        if entry.rights_base & required != required {
            return Err(Errno::Notcapable);
        }
        Ok(entry)
    }

    pub(crate) fn remove(&mut self, fd: i32) -> Result<FdEntry, Errno> {
        self.slot_mut(fd)?.take().ok_or(Errno::Badf)
    }

    /// Move `from` onto `to`, closing whatever `to` held.
    pub(crate) fn renumber(&mut self, from: i32, to: i32) -> Result<(), Errno> {
        self.get(to)?;
        let entry = self.remove(from)?;
        *self.slot_mut(to)? = Some(entry);
        Ok(())
    }

    pub(crate) fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
