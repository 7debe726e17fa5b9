use embedded_hal::spi::{Operation, SpiDevice};
use embedded_storage::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use log::{debug, error, info, warn};

#[allow(dead_code)]
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum SpiCommand {
    WriteEnable = 0x06,
    WriteDisable = 0x04,
    ReadStatusReg1 = 0x05,
    ReadJedecId = 0x9F,
    ReadData = 0x03,
    PageProgram = 0x02,
    SectorErase4Kb = 0x20,
    BlockErase64Kb = 0xD8,
    ChipErase = 0xC7,
    PowerDown = 0xB9,
    ReleasePowerDown = 0xAB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExFlashError {
    AddressInvalid,
    LenInvalid,
    SpiError,
    WriteEnableFailed,
    PageBoundaryViolation,
    Unaligned,
    Timeout,
}

impl NorFlashError for ExFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            ExFlashError::AddressInvalid | ExFlashError::LenInvalid => {
                NorFlashErrorKind::OutOfBounds
            }
            ExFlashError::PageBoundaryViolation | ExFlashError::Unaligned => {
                NorFlashErrorKind::NotAligned
            }
            _ => NorFlashErrorKind::Other,
        }
    }
}

// Status Register 1 bits
const BUSY_BIT: u8 = 0x01;
const WEL_BIT: u8 = 0x02;

pub const PAGE_SIZE: usize = 256;
pub const SECTOR_SIZE: usize = 4096;
pub const BLOCK_SIZE: usize = 64 * 1024;
pub const FLASH_CAPACITY: u32 = 16 * 1024 * 1024; // 16MB for W25Q128FV
pub const JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

// A 64KiB block erase takes up to 2s; a status poll is a few microseconds
const MAX_BUSY_POLLS: u32 = 10_000_000;

/// W25Q128FV serial NOR flash on a blocking SPI device. Chip select is owned
/// by the `SpiDevice`.
#[derive(Debug)]
pub struct W25Q128FVSG<SPI> {
    spi: SPI,
    capacity: u32,
}

#[allow(dead_code)]
impl<SPI: SpiDevice> W25Q128FVSG<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self::with_capacity(spi, FLASH_CAPACITY)
    }

    /// Smaller members of the W25Q family share the command set.
    pub fn with_capacity(spi: SPI, capacity: u32) -> Self {
        Self { spi, capacity }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    pub fn init(&mut self) -> Result<(), ExFlashError> {
        // Release from power-down if needed
        self.release_power_down()?;
        let id = self.read_id()?;
        if id == JEDEC_ID {
            info!("[W25Q] ✓ W25Q128FV detected");
        } else {
            warn!("[W25Q] Unexpected JEDEC ID {id:02x?}, expected {JEDEC_ID:02x?}");
        }
        Ok(())
    }

    fn validate_address(&self, address: u32) -> Result<(), ExFlashError> {
        if address >= self.capacity {
            return Err(ExFlashError::AddressInvalid);
        }
        Ok(())
    }

    fn validate_address_range(&self, address: u32, length: usize) -> Result<(), ExFlashError> {
        self.validate_address(address)?;
        if address as u64 + length as u64 > self.capacity as u64 {
            return Err(ExFlashError::LenInvalid);
        }
        Ok(())
    }

    fn address_command(command: SpiCommand, address: u32) -> [u8; 4] {
        [
            command as u8,
            (address >> 16) as u8,
            (address >> 8) as u8,
            address as u8,
        ]
    }

    fn command(&mut self, command: SpiCommand) -> Result<(), ExFlashError> {
        self.spi
            .write(&[command as u8])
            .map_err(|_| ExFlashError::SpiError)
    }

    /// Read JEDEC ID (Manufacturer ID + Device ID)
    pub fn read_id(&mut self) -> Result<[u8; 3], ExFlashError> {
        let mut id = [0u8; 3];
        self.spi
            .transaction(&mut [
                Operation::Write(&[SpiCommand::ReadJedecId as u8]),
                Operation::Read(&mut id),
            ])
            .map_err(|_| ExFlashError::SpiError)?;
        Ok(id)
    }

    pub fn read_status_reg1(&mut self) -> Result<u8, ExFlashError> {
        let mut status = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[SpiCommand::ReadStatusReg1 as u8]),
                Operation::Read(&mut status),
            ])
            .map_err(|_| ExFlashError::SpiError)?;
        Ok(status[0])
    }

    pub fn is_busy(&mut self) -> Result<bool, ExFlashError> {
        let status = self.read_status_reg1()?;
        Ok((status & BUSY_BIT) != 0)
    }

    pub fn wait_ready(&mut self) -> Result<(), ExFlashError> {
        for _ in 0..MAX_BUSY_POLLS {
            if !self.is_busy()? {
                return Ok(());
            }
        }
        error!("[W25Q] ✗ Device still busy after {MAX_BUSY_POLLS} polls");
        Err(ExFlashError::Timeout)
    }

    pub fn is_write_enabled(&mut self) -> Result<bool, ExFlashError> {
        let status = self.read_status_reg1()?;
        Ok((status & WEL_BIT) != 0)
    }

    pub fn write_enable(&mut self) -> Result<(), ExFlashError> {
        self.command(SpiCommand::WriteEnable)?;
        if !self.is_write_enabled()? {
            return Err(ExFlashError::WriteEnableFailed);
        }
        Ok(())
    }

    pub fn write_disable(&mut self) -> Result<(), ExFlashError> {
        self.command(SpiCommand::WriteDisable)
    }

    pub fn read_data(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), ExFlashError> {
        self.validate_address_range(address, buffer.len())?;
        if buffer.is_empty() {
            return Err(ExFlashError::LenInvalid);
        }
        let command = Self::address_command(SpiCommand::ReadData, address);
        self.spi
            .transaction(&mut [Operation::Write(&command), Operation::Read(buffer)])
            .map_err(|_| ExFlashError::SpiError)
    }

    /// Page program. The data must not cross a 256 byte page boundary.
    pub fn write_data(&mut self, address: u32, data: &[u8]) -> Result<(), ExFlashError> {
        self.validate_address(address)?;
        if data.is_empty() {
            return Err(ExFlashError::LenInvalid);
        }
        let page_offset = address as usize % PAGE_SIZE;
        if data.len() > PAGE_SIZE - page_offset {
            return Err(ExFlashError::PageBoundaryViolation);
        }
        self.validate_address_range(address, data.len())?;

        self.wait_ready()?;
        self.write_enable()?;
        let command = Self::address_command(SpiCommand::PageProgram, address);
        self.spi
            .transaction(&mut [Operation::Write(&command), Operation::Write(data)])
            .map_err(|_| ExFlashError::SpiError)?;
        self.wait_ready()
    }

    fn erase_at(&mut self, command: SpiCommand, address: u32) -> Result<(), ExFlashError> {
        self.wait_ready()?;
        self.write_enable()?;
        let command = Self::address_command(command, address);
        self.spi
            .write(&command)
            .map_err(|_| ExFlashError::SpiError)?;
        self.wait_ready()
    }

    /// Erase 4KB sector
    pub fn erase_sector(&mut self, address: u32) -> Result<(), ExFlashError> {
        self.validate_address(address)?;
        let aligned_address = address & !(SECTOR_SIZE as u32 - 1);
        self.erase_at(SpiCommand::SectorErase4Kb, aligned_address)
    }

    /// Erase 64KB block
    pub fn erase_block_64kb(&mut self, address: u32) -> Result<(), ExFlashError> {
        self.validate_address(address)?;
        let aligned_address = address & !(BLOCK_SIZE as u32 - 1);
        self.erase_at(SpiCommand::BlockErase64Kb, aligned_address)
    }

    pub fn erase_chip(&mut self) -> Result<(), ExFlashError> {
        self.wait_ready()?;
        self.write_enable()?;
        self.command(SpiCommand::ChipErase)?;
        self.wait_ready()
    }

    pub fn power_down(&mut self) -> Result<(), ExFlashError> {
        self.command(SpiCommand::PowerDown)
    }

    pub fn release_power_down(&mut self) -> Result<(), ExFlashError> {
        self.command(SpiCommand::ReleasePowerDown)
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    pub fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }
}

impl<SPI: SpiDevice> ErrorType for W25Q128FVSG<SPI> {
    type Error = ExFlashError;
}

impl<SPI: SpiDevice> ReadNorFlash for W25Q128FVSG<SPI> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.read_data(offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl<SPI: SpiDevice> NorFlash for W25Q128FVSG<SPI> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    /// Uses 64KiB block erases where the range allows and 4KiB sector
    /// erases for the rest.
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to || to > self.capacity {
            return Err(ExFlashError::AddressInvalid);
        }
        if from % SECTOR_SIZE as u32 != 0 || to % SECTOR_SIZE as u32 != 0 {
            return Err(ExFlashError::Unaligned);
        }
        let block = BLOCK_SIZE as u32;
        let mut addr = from;
        while addr < to {
            if addr % block == 0 && to - addr >= block {
                debug!("[W25Q] Erasing 64KiB block at 0x{addr:08X}");
                self.erase_block_64kb(addr)?;
                addr += block;
            } else {
                debug!("[W25Q] Erasing sector at 0x{addr:08X}");
                self.erase_sector(addr)?;
                addr += SECTOR_SIZE as u32;
            }
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.validate_address_range(offset, bytes.len())?;
        let mut written = 0;
        while written < bytes.len() {
            let current_addr = offset + written as u32;
            let page_offset = current_addr as usize % PAGE_SIZE;
            let chunk_size = core::cmp::min(PAGE_SIZE - page_offset, bytes.len() - written);
            self.write_data(current_addr, &bytes[written..written + chunk_size])
                .inspect_err(|e| {
                    error!("[W25Q] ✗ Failed to write at 0x{current_addr:08X}: {e:?}");
                })?;
            written += chunk_size;
        }
        Ok(())
    }
}

// Page program only clears bits
impl<SPI: SpiDevice> MultiwriteNorFlash for W25Q128FVSG<SPI> {}
