use log::warn;

use crate::cfg::fs_cfg::MAX_OPEN_FILES;
use crate::fs::FsError;

/// Index of an open file in its volume's handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(u8);

impl Fd {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

/// Open file state. `size` is authoritative while the handle is writable;
/// flash only learns it at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub header: u32,
    pub data: u32,
    pub size: u32,
    pub cursor: u32,
    pub access: Access,
    /// Data offset of the record this one replaces once finalized.
    pub supersedes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Reserved { writer: bool },
    Open(Handle),
}

/// Fixed arena of handles plus the volume-wide writer bit. Admission of a
/// writer and allocation of its slot happen under the same lock.
#[derive(Debug)]
pub struct HandleTable {
    slots: [Slot; MAX_OPEN_FILES],
    writer: bool,
    exclusive: bool,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::Free; MAX_OPEN_FILES],
            writer: false,
            exclusive: false,
        }
    }

    /// Claim a free slot, and the writer bit when `writer` is set.
    pub fn reserve(&mut self, writer: bool) -> Result<Fd, FsError> {
        if self.exclusive || (writer && self.writer) {
            return Err(FsError::Busy);
        }
        let index = self
            .slots
            .iter()
            .position(|slot| *slot == Slot::Free)
            .ok_or_else(|| {
                warn!("All {MAX_OPEN_FILES} file handles in use");
                FsError::TooManyOpenFiles
            })?;
        self.slots[index] = Slot::Reserved { writer };
        self.writer |= writer;
        Ok(Fd(index as u8))
    }

    /// Complete a reservation. A reservation that claimed the writer bit but
    /// ended up read-only gives the bit back.
    pub fn install(&mut self, fd: Fd, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(fd.index()) {
            if let Slot::Reserved { writer } = *slot {
                if writer && !handle.access.write {
                    self.writer = false;
                }
                *slot = Slot::Open(handle);
            }
        }
    }

    /// Drop a reservation whose open failed.
    pub fn abandon(&mut self, fd: Fd) {
        if let Some(slot) = self.slots.get_mut(fd.index()) {
            if let Slot::Reserved { writer } = *slot {
                if writer {
                    self.writer = false;
                }
                *slot = Slot::Free;
            }
        }
    }

    pub fn get(&self, fd: Fd) -> Result<Handle, FsError> {
        match self.slots.get(fd.index()) {
            Some(Slot::Open(handle)) => Ok(*handle),
            _ => Err(FsError::BadHandle),
        }
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut Handle, FsError> {
        match self.slots.get_mut(fd.index()) {
            Some(Slot::Open(handle)) => Ok(handle),
            _ => Err(FsError::BadHandle),
        }
    }

    pub fn release(&mut self, fd: Fd) -> Result<Handle, FsError> {
        let handle = self.get(fd)?;
        self.slots[fd.index()] = Slot::Free;
        if handle.access.write {
            self.writer = false;
        }
        Ok(handle)
    }

    /// The handle currently holding the writer bit, if it is open.
    pub fn writer(&self) -> Option<Handle> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Open(handle) if handle.access.write => Some(*handle),
            _ => None,
        })
    }

    pub fn is_writing(&self) -> bool {
        self.writer
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| **slot != Slot::Free).count()
    }

    /// Take the writer bit without a handle (fsck repair).
    pub fn claim_writer(&mut self) -> Result<(), FsError> {
        if self.exclusive || self.writer {
            return Err(FsError::Busy);
        }
        self.writer = true;
        Ok(())
    }

    pub fn release_writer(&mut self) {
        self.writer = false;
    }

    /// Lock out every open (format). Fails while any handle is in use.
    pub fn claim_exclusive(&mut self) -> Result<(), FsError> {
        if self.exclusive || self.writer || self.open_count() > 0 {
            return Err(FsError::Busy);
        }
        self.exclusive = true;
        Ok(())
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn release_exclusive(&mut self) {
        self.exclusive = false;
    }
}
