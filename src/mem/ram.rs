use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, MultiwriteNorFlash, NorFlash,
    NorFlashErrorKind, ReadNorFlash,
};

pub const RAM_SECTOR_SIZE: usize = 4096;

/// NOR flash simulated in RAM: erase sets bytes to `0xFF`, program can only
/// clear bits. `fail_after` cuts power after a number of programmed bytes.
pub struct RamFlash<B> {
    mem: B,
    program_budget: Option<usize>,
    erases: usize,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> RamFlash<B> {
    /// Wrap `mem` as a freshly erased chip.
    pub fn new(mut mem: B) -> Self {
        mem.as_mut().fill(0xFF);
        Self::from_image(mem)
    }

    /// Wrap `mem` keeping its current contents.
    pub fn from_image(mem: B) -> Self {
        Self {
            mem,
            program_budget: None,
            erases: 0,
        }
    }

    /// Let only `bytes` more bytes be programmed; the write that crosses the
    /// budget is applied partially and fails.
    pub fn fail_after(&mut self, bytes: usize) {
        self.program_budget = Some(bytes);
    }

    pub fn restore_power(&mut self) {
        self.program_budget = None;
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.mem.as_ref()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.mem.as_mut()
    }

    pub fn into_inner(self) -> B {
        self.mem
    }
}

impl<B> ErrorType for RamFlash<B> {
    type Error = NorFlashErrorKind;
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> ReadNorFlash for RamFlash<B> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.mem.as_ref()[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.as_ref().len()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> NorFlash for RamFlash<B> {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = RAM_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.mem.as_mut()[from as usize..to as usize].fill(0xFF);
        self.erases += (to - from) as usize / RAM_SECTOR_SIZE;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let (len, result) = match self.program_budget {
            Some(budget) if budget < bytes.len() => {
                self.program_budget = Some(0);
                (budget, Err(NorFlashErrorKind::Other))
            }
            Some(budget) => {
                self.program_budget = Some(budget - bytes.len());
                (bytes.len(), Ok(()))
            }
            None => (bytes.len(), Ok(())),
        };
        let start = offset as usize;
        for (cell, byte) in self.mem.as_mut()[start..start + len]
            .iter_mut()
            .zip(bytes.iter())
        {
            *cell &= *byte;
        }
        result
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> MultiwriteNorFlash for RamFlash<B> {}
