//! Flash adapter: translates offsets inside a volume window into physical
//! flash operations, or into plain memory reads for a mapped image.

use embedded_storage::nor_flash::{MultiwriteNorFlash, NorFlashErrorKind};
use log::error;

use crate::cfg::fs_cfg::{VolumeConfig, MAX_WRITE_UNIT};
use crate::fs::record::ERASED;
use crate::fs::FsError;

/// Physical medium behind a volume. Addresses are absolute on the medium.
pub trait Medium {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FsError>;
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FsError>;
    fn erase_sector(&mut self, index: u32) -> Result<(), FsError>;
    fn sector_size(&self) -> u32;
    fn capacity(&self) -> u32;

    /// Zero-copy view of `len` bytes at `addr`, for memory-mapped media only.
    fn mapped(&self, _addr: u32, _len: u32) -> Option<&'static [u8]> {
        None
    }
}

/// Any `embedded-storage` NOR flash driver as a medium. Sizes and sentinels
/// are programmed over bytes already written, so the driver must allow
/// multiple writes per unit.
pub struct Nor<F> {
    flash: F,
}

impl<F: MultiwriteNorFlash> Nor<F> {
    pub fn new(flash: F) -> Result<Self, FsError> {
        if F::READ_SIZE != 1
            || F::WRITE_SIZE > MAX_WRITE_UNIT
            || !F::WRITE_SIZE.is_power_of_two()
        {
            error!(
                "Unsupported flash geometry: read {} write {} bytes",
                F::READ_SIZE,
                F::WRITE_SIZE
            );
            return Err(FsError::InvalidConfig);
        }
        Ok(Self { flash })
    }

    pub fn inner(&self) -> &F {
        &self.flash
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: MultiwriteNorFlash> Medium for Nor<F> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FsError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.flash.read(addr, buf).map_err(FsError::io)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FsError> {
        if data.is_empty() {
            return Ok(());
        }
        let unit = F::WRITE_SIZE as u32;
        if unit == 1 {
            return self.flash.write(addr, data).map_err(FsError::io);
        }
        // Pad partial units with erased bytes; the unit may be written again later
        let mut buf = [ERASED; MAX_WRITE_UNIT];
        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let start = addr - addr % unit;
            let skip = (addr - start) as usize;
            let take = core::cmp::min(unit as usize - skip, rest.len());
            buf.fill(ERASED);
            buf[skip..skip + take].copy_from_slice(&rest[..take]);
            self.flash
                .write(start, &buf[..unit as usize])
                .map_err(FsError::io)?;
            addr += take as u32;
            rest = &rest[take..];
        }
        Ok(())
    }

    fn erase_sector(&mut self, index: u32) -> Result<(), FsError> {
        let from = index
            .checked_mul(F::ERASE_SIZE as u32)
            .ok_or(FsError::PhysicalIo(NorFlashErrorKind::OutOfBounds))?;
        self.flash
            .erase(from, from + F::ERASE_SIZE as u32)
            .map_err(FsError::io)
    }

    fn sector_size(&self) -> u32 {
        F::ERASE_SIZE as u32
    }

    fn capacity(&self) -> u32 {
        self.flash.capacity() as u32
    }
}

/// Execute-in-place flash image, read through the CPU's memory map.
pub struct Mapped {
    image: &'static [u8],
    sector_size: u32,
}

impl Mapped {
    pub const fn new(image: &'static [u8], sector_size: u32) -> Self {
        Self { image, sector_size }
    }
}

impl Medium for Mapped {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FsError> {
        let view = self
            .mapped(addr, buf.len() as u32)
            .ok_or(FsError::PhysicalIo(NorFlashErrorKind::OutOfBounds))?;
        buf.copy_from_slice(view);
        Ok(())
    }

    fn program(&mut self, _addr: u32, _data: &[u8]) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn erase_sector(&mut self, _index: u32) -> Result<(), FsError> {
        Err(FsError::ReadOnly)
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn capacity(&self) -> u32 {
        self.image.len() as u32
    }

    fn mapped(&self, addr: u32, len: u32) -> Option<&'static [u8]> {
        let start = addr as usize;
        let end = start.checked_add(len as usize)?;
        self.image.get(start..end)
    }
}

/// A volume's view of its medium: offsets are relative to the window base
/// and every access is bounds checked against the window.
pub struct FlashAdapter<M> {
    medium: M,
    base: u32,
    max_size: u32,
}

impl<M: Medium> FlashAdapter<M> {
    pub fn new(medium: M, config: &VolumeConfig) -> Result<Self, FsError> {
        if config.max_size == 0 || config.end() > medium.capacity() as u64 {
            error!(
                "Window 0x{:08X}+0x{:X} exceeds medium capacity 0x{:X}",
                config.base,
                config.max_size,
                medium.capacity()
            );
            return Err(FsError::InvalidConfig);
        }
        let sector = medium.sector_size();
        if config.is_write_once()
            && (sector == 0 || config.base % sector != 0 || config.max_size % sector != 0)
        {
            error!(
                "Window 0x{:08X}+0x{:X} is not aligned to {} byte sectors",
                config.base, config.max_size, sector
            );
            return Err(FsError::InvalidConfig);
        }
        Ok(Self {
            medium,
            base: config.base,
            max_size: config.max_size,
        })
    }

    fn physical(&self, offset: u32, len: usize) -> Result<u32, FsError> {
        if offset as u64 + len as u64 > self.max_size as u64 {
            return Err(FsError::PhysicalIo(NorFlashErrorKind::OutOfBounds));
        }
        Ok(self.base + offset)
    }

    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FsError> {
        let addr = self.physical(offset, buf.len())?;
        self.medium.read(addr, buf)
    }

    pub fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FsError> {
        let addr = self.physical(offset, data.len())?;
        self.medium.program(addr, data)
    }

    /// Erase one medium sector by absolute index; it must lie in the window.
    pub fn erase(&mut self, sector: u32) -> Result<(), FsError> {
        let size = self.medium.sector_size();
        let first = self.base / size;
        let last = (self.base + self.max_size - 1) / size;
        if sector < first || sector > last {
            return Err(FsError::PhysicalIo(NorFlashErrorKind::OutOfBounds));
        }
        self.medium.erase_sector(sector)
    }

    /// Absolute index of the sector holding `offset`.
    pub fn sector_of(&self, offset: u32) -> u32 {
        (self.base + offset) / self.medium.sector_size()
    }

    pub fn sector_size(&self) -> u32 {
        self.medium.sector_size()
    }

    pub fn address_of(&self, offset: u32, len: u32) -> Option<&'static [u8]> {
        let addr = self.physical(offset, len as usize).ok()?;
        self.medium.mapped(addr, len)
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn into_medium(self) -> M {
        self.medium
    }
}
