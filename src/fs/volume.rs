use core::cell::RefCell;
use core::cmp::min;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, error, info, warn};

use crate::cfg::fs_cfg::{VolumeConfig, END_RESERVE, SCAN_CHUNK};
use crate::fs::dir::DirEntry;
use crate::fs::handle::{Access, Fd, Handle, HandleTable};
use crate::fs::record::{
    self, encode_header, header_len, validate_name, Entry, LogEnd, Lookup, Record, MAX_HEADER,
};
use crate::fs::{FsError, OpenFlags, SeekFrom};
use crate::mem::flash::{FlashAdapter, Medium};

/// Space accounting: `used` is where the next record would go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total: u32,
    pub used: u32,
}

/// One mounted volume. The flash window and the handle table sit behind
/// separate locks; the writer bit in the handle table serializes every
/// mutation of the log tail.
pub struct Volume<R: RawMutex, M: Medium> {
    config: VolumeConfig,
    flash: Mutex<R, RefCell<FlashAdapter<M>>>,
    handles: Mutex<R, RefCell<HandleTable>>,
}

impl<R: RawMutex, M: Medium> Volume<R, M> {
    pub fn mount(medium: M, config: VolumeConfig) -> Result<Self, FsError> {
        let flash = FlashAdapter::new(medium, &config)?;
        let volume = Self {
            config,
            flash: Mutex::new(RefCell::new(flash)),
            handles: Mutex::new(RefCell::new(HandleTable::new())),
        };
        match volume.log_end() {
            Ok(end) => info!(
                "{} Mounted 0x{:08X}+0x{:X}, log ends at 0x{:08X}{}",
                volume.tag(),
                config.base,
                config.max_size,
                end.offset,
                if end.pending { " (unfinalized)" } else { "" }
            ),
            Err(e) => warn!("{} Mounted with damaged log: {:?}, run fsck", volume.tag(), e),
        }
        Ok(volume)
    }

    /// Give the medium back. Open handles are dropped without finalizing,
    /// exactly like a power cut.
    pub fn unmount(self) -> M {
        let tag = self.tag();
        let open = self.handles.into_inner().into_inner().open_count();
        if open > 0 {
            warn!("{} Unmounting with {} open handles", tag, open);
        }
        self.flash.into_inner().into_inner().into_medium()
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub(crate) fn tag(&self) -> &'static str {
        if self.config.is_write_once() {
            "[WOFS]"
        } else {
            "[ROMFS]"
        }
    }

    pub(crate) fn with_flash<T>(&self, f: impl FnOnce(&mut FlashAdapter<M>) -> T) -> T {
        self.flash.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub(crate) fn with_handles<T>(&self, f: impl FnOnce(&mut HandleTable) -> T) -> T {
        self.handles.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub(crate) fn decode_at(&self, offset: u32) -> Result<Entry, FsError> {
        let kind = self.config.kind;
        self.with_flash(|flash| record::decode(flash, kind, offset))
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<Lookup, FsError> {
        record::scan_for_name(self.config.kind, name, |offset| self.decode_at(offset))
    }

    pub(crate) fn log_end(&self) -> Result<LogEnd, FsError> {
        record::first_free(self.config.kind, |offset| self.decode_at(offset))
    }

    /// Offset past which no record byte may be written.
    fn data_limit(&self) -> u32 {
        self.config.max_size.saturating_sub(END_RESERVE)
    }

    pub fn open(&self, name: &str, flags: OpenFlags) -> Result<Fd, FsError> {
        validate_name(name)?;
        let write = flags.writable();
        // CREATE alone only writes when the name is not there yet
        let mut create = write;
        if flags.contains(OpenFlags::CREATE) && !write {
            create = matches!(self.lookup(name)?, Lookup::Missing(_));
        }

        loop {
            if !self.config.is_write_once() && create {
                warn!("{} {} is read-only", self.tag(), name);
                return Err(FsError::ReadOnly);
            }
            let fd = self.with_handles(|table| table.reserve(create))?;
            match self.prepare(name, flags, create) {
                Ok(handle) => {
                    debug!(
                        "{} Opened {} as fd {} at 0x{:08X}",
                        self.tag(),
                        name,
                        fd.index(),
                        handle.data
                    );
                    self.with_handles(|table| table.install(fd, handle));
                    return Ok(fd);
                }
                Err(e) => {
                    self.with_handles(|table| table.abandon(fd));
                    // Unlinked between the lookup and the reservation
                    if e == FsError::NotFound && flags.contains(OpenFlags::CREATE) && !create {
                        create = true;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Build the handle for `name`. `claimed` says whether the writer slot
    /// is held, which anything that programs flash needs.
    fn prepare(&self, name: &str, flags: OpenFlags, claimed: bool) -> Result<Handle, FsError> {
        let access = Access {
            read: flags.readable(),
            write: flags.writable(),
            append: flags.contains(OpenFlags::APPEND),
        };
        match self.lookup(name)? {
            Lookup::Found(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) => {
                Err(FsError::AlreadyExists)
            }
            Lookup::Found(record) if !access.write => Ok(Handle {
                header: record.offset,
                data: record.data,
                size: record.size,
                cursor: 0,
                access,
                supersedes: None,
            }),
            Lookup::Found(record) => {
                let end = self.log_end()?;
                let carried = if flags.contains(OpenFlags::TRUNC) {
                    0
                } else {
                    record.size
                };
                self.create(record.name.as_str(), end, access, Some((&record, carried)))
            }
            Lookup::Missing(_) if !flags.contains(OpenFlags::CREATE) || !claimed => {
                Err(FsError::NotFound)
            }
            Lookup::Missing(end) => {
                let handle = self.create(name, end, access, None)?;
                if access.write {
                    return Ok(handle);
                }
                // Read-only create: the record is empty and final right away
                self.with_flash(|flash| {
                    record::finalize_size(flash, self.config.kind, handle.data, 0)
                })?;
                Ok(handle)
            }
        }
    }

    /// Start a new record at the end of the log. `previous` is the record
    /// being replaced and how many of its bytes carry over.
    fn create(
        &self,
        name: &str,
        end: LogEnd,
        access: Access,
        previous: Option<(&Record, u32)>,
    ) -> Result<Handle, FsError> {
        if end.pending {
            error!(
                "{} Unfinalized record at 0x{:08X} blocks the log, run fsck",
                self.tag(),
                end.offset
            );
            return Err(FsError::CorruptionDetected);
        }
        let kind = self.config.kind;
        let carried = previous.map_or(0, |(_, len)| len);
        let data = end.offset + header_len(kind, end.offset, name.len());
        if data as u64 + carried as u64 > self.data_limit() as u64 {
            warn!(
                "{} No room for {} at 0x{:08X} ({} of {} bytes used)",
                self.tag(),
                name,
                end.offset,
                end.offset,
                self.config.max_size
            );
            return Err(FsError::OutOfSpace);
        }

        let mut header = [0u8; MAX_HEADER];
        let len = encode_header(kind, end.offset, name, None, &mut header);
        self.with_flash(|flash| flash.program(end.offset, &header[..len]))?;

        let mut supersedes = None;
        if let Some((old, carried)) = previous {
            if let Err(e) = self.copy_data(old.data, data, carried) {
                error!(
                    "{} Copying {} into 0x{:08X} failed: {:?}",
                    self.tag(),
                    name,
                    end.offset,
                    e
                );
                self.discard(data, carried);
                return Err(e);
            }
            supersedes = Some(old.data);
        }
        info!(
            "{} Created {} at 0x{:08X}{}",
            self.tag(),
            name,
            end.offset,
            if supersedes.is_some() {
                " (replacing)"
            } else {
                ""
            }
        );
        Ok(Handle {
            header: end.offset,
            data,
            size: carried,
            cursor: if access.append { carried } else { 0 },
            access,
            supersedes,
        })
    }

    fn copy_data(&self, from: u32, to: u32, len: u32) -> Result<(), FsError> {
        let mut buf = [0u8; SCAN_CHUNK];
        let mut done = 0;
        while done < len {
            let n = min(SCAN_CHUNK as u32, len - done) as usize;
            self.with_flash(|flash| {
                flash.read(from + done, &mut buf[..n])?;
                flash.program(to + done, &buf[..n])
            })?;
            done += n as u32;
        }
        Ok(())
    }

    /// Close off a record that will never be finished, so it does not
    /// block the log. The old version stays live.
    fn discard(&self, data: u32, size: u32) {
        let kind = self.config.kind;
        let result = self.with_flash(|flash| {
            record::finalize_size(flash, kind, data, size)?;
            record::mark_deleted(flash, kind, data)
        });
        if let Err(e) = result {
            warn!(
                "{} Could not retire record at 0x{:08X}: {:?}, run fsck",
                self.tag(),
                data,
                e
            );
        }
    }

    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, FsError> {
        let handle = self.with_handles(|table| table.get(fd))?;
        if !handle.access.read {
            return Err(FsError::AccessDenied);
        }
        let n = min(buf.len() as u32, handle.size.saturating_sub(handle.cursor)) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.with_flash(|flash| flash.read(handle.data + handle.cursor, &mut buf[..n]))?;
        self.with_handles(|table| table.get_mut(fd).map(|h| h.cursor += n as u32))?;
        Ok(n)
    }

    /// Append `data` to the record. Returns 0 when the cursor is not at the
    /// end of the record.
    pub fn write(&self, fd: Fd, data: &[u8]) -> Result<usize, FsError> {
        let handle = self.with_handles(|table| {
            let handle = table.get_mut(fd)?;
            if handle.access.append {
                handle.cursor = handle.size;
            }
            Ok::<_, FsError>(*handle)
        })?;
        if !handle.access.write {
            return Err(FsError::AccessDenied);
        }
        if handle.cursor != handle.size {
            debug!(
                "{} fd {} cursor {} is behind size {}, nothing written",
                self.tag(),
                fd.index(),
                handle.cursor,
                handle.size
            );
            return Ok(0);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let at = handle.data + handle.size;
        let room = self.data_limit().saturating_sub(at);
        if room == 0 {
            warn!("{} Volume full at 0x{:08X}", self.tag(), at);
            return Err(FsError::OutOfSpace);
        }
        let n = min(room as usize, data.len());
        if let Err(e) = self.with_flash(|flash| flash.program(at, &data[..n])) {
            error!("{} Program at 0x{:08X} failed: {:?}", self.tag(), at, e);
            return Err(e);
        }
        self.with_handles(|table| {
            table.get_mut(fd).map(|h| {
                h.size += n as u32;
                h.cursor = h.size;
            })
        })?;
        Ok(n)
    }

    pub fn seek(&self, fd: Fd, pos: SeekFrom) -> Result<u32, FsError> {
        self.with_handles(|table| {
            let handle = table.get_mut(fd)?;
            let target = match pos {
                SeekFrom::Start(p) => Some(p as i64),
                SeekFrom::Current(delta) => (handle.cursor as i64).checked_add(delta),
                SeekFrom::End(delta) => (handle.size as i64).checked_add(delta),
            };
            match target {
                Some(t) if t >= 0 && t <= handle.size as i64 => {
                    handle.cursor = t as u32;
                    Ok(handle.cursor)
                }
                _ => Err(FsError::InvalidSeek),
            }
        })
    }

    /// Finalize a written record and release the handle. The slot is freed
    /// even when finalizing fails.
    pub fn close(&self, fd: Fd) -> Result<(), FsError> {
        let handle = self.with_handles(|table| table.get(fd))?;
        let result = if handle.access.write {
            self.finalize(&handle)
        } else {
            Ok(())
        };
        self.with_handles(|table| table.release(fd))?;
        result
    }

    fn finalize(&self, handle: &Handle) -> Result<(), FsError> {
        let kind = self.config.kind;
        let result = self.with_flash(|flash| {
            record::finalize_size(flash, kind, handle.data, handle.size)?;
            if let Some(old) = handle.supersedes {
                record::mark_deleted(flash, kind, old)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => info!(
                "{} Finalized record at 0x{:08X}, {} bytes ✓",
                self.tag(),
                handle.header,
                handle.size
            ),
            Err(e) => error!(
                "{} Finalizing record at 0x{:08X} failed: {:?} ✗",
                self.tag(),
                handle.header,
                e
            ),
        }
        result
    }

    /// Mark the live record called `name` deleted. Its space stays used
    /// until the next format.
    pub fn unlink(&self, name: &str) -> Result<(), FsError> {
        validate_name(name)?;
        if !self.config.is_write_once() {
            return Err(FsError::ReadOnly);
        }
        // Held across the lookup so a format cannot erase the record under us
        self.handles.lock(|cell| {
            let table = cell.borrow();
            if table.is_exclusive() {
                return Err(FsError::Busy);
            }
            // A writer bit with no open writer is an open still copying its record
            let writer = table.writer();
            let rewriting = |data| match writer {
                Some(handle) => handle.supersedes == Some(data),
                None => table.is_writing(),
            };
            match self.lookup(name)? {
                Lookup::Found(found) if rewriting(found.data) => {
                    warn!("{} {} is being rewritten", self.tag(), name);
                    Err(FsError::Busy)
                }
                Lookup::Found(found) => {
                    let kind = self.config.kind;
                    self.with_flash(|flash| record::mark_deleted(flash, kind, found.data))?;
                    info!("{} Deleted {} at 0x{:08X}", self.tag(), name, found.offset);
                    Ok(())
                }
                Lookup::Missing(_) => Err(FsError::NotFound),
            }
        })
    }

    pub fn stat(&self, name: &str) -> Result<DirEntry, FsError> {
        validate_name(name)?;
        match self.lookup(name)? {
            Lookup::Found(record) => Ok(DirEntry {
                name: record.name,
                size: record.size,
            }),
            Lookup::Missing(_) => Err(FsError::NotFound),
        }
    }

    /// Current length of an open file.
    pub fn size(&self, fd: Fd) -> Result<u32, FsError> {
        self.with_handles(|table| table.get(fd)).map(|h| h.size)
    }

    /// Zero-copy view of an open file's data. Only mapped volumes have one.
    pub fn address_of(&self, fd: Fd) -> Result<&'static [u8], FsError> {
        let handle = self.with_handles(|table| table.get(fd))?;
        self.with_flash(|flash| flash.address_of(handle.data, handle.size))
            .ok_or(FsError::Unsupported)
    }

    pub fn usage(&self) -> Result<Usage, FsError> {
        let end = self.log_end()?;
        let mut used = end.offset;
        if end.pending {
            if let Some(writer) = self.with_handles(|table| table.writer()) {
                if writer.header == end.offset {
                    used = writer.data + writer.size;
                }
            }
        }
        Ok(Usage {
            total: self.config.max_size,
            used,
        })
    }

    /// Offset of the end-of-log marker.
    pub fn first_free(&self) -> Result<u32, FsError> {
        self.log_end().map(|end| end.offset)
    }
}
