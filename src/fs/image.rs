use core::cmp::min;

use log::{debug, warn};

use crate::cfg::fs_cfg::VolumeKind;
use crate::fs::record::{
    encode_header, parse, scan_for_name, validate_name, Lookup, ERASED, MAX_HEADER,
};
use crate::fs::FsError;

/// Lays out a ROMFS image (packed records, no delete sentinels) in a
/// caller-provided buffer, ready to be flashed and mounted as `Mapped`.
pub struct ImageBuilder<'a> {
    buf: &'a mut [u8],
    offset: u32,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        buf.fill(ERASED);
        Self { buf, offset: 0 }
    }

    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<&mut Self, FsError> {
        validate_name(name)?;
        let image_len = self.buf.len() as u32;
        let image = &self.buf[..];
        let existing = scan_for_name(VolumeKind::Romfs, name, |offset| {
            let start = min(offset, image_len) as usize;
            let end = min(start + MAX_HEADER, image.len());
            Ok(parse(&image[start..end], VolumeKind::Romfs, offset, image_len))
        })?;
        if let Lookup::Found(_) = existing {
            return Err(FsError::AlreadyExists);
        }

        let mut header = [0u8; MAX_HEADER];
        let size = Some(data.len() as u32);
        let len = encode_header(VolumeKind::Romfs, self.offset, name, size, &mut header);
        let start = self.offset as usize;
        let end = start + len + data.len();
        // the end-of-log marker needs one erased byte after the last record
        if end >= self.buf.len() {
            warn!("[ROMFS] Image full, {} ({} bytes) does not fit", name, data.len());
            return Err(FsError::OutOfSpace);
        }
        self.buf[start..start + len].copy_from_slice(&header[..len]);
        self.buf[start + len..end].copy_from_slice(data);
        self.offset = end as u32;
        debug!("[ROMFS] Packed {} at 0x{:08X}", name, start);
        Ok(self)
    }

    /// Image length including the end-of-log marker.
    pub fn finish(self) -> usize {
        self.offset as usize + 1
    }
}
