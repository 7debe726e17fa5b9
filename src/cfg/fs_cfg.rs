use log::error;
use serde::{Deserialize, Serialize};

use crate::fs::FsError;

// Record format constants
pub const MAX_NAME_LEN: usize = 32;
pub const RECORD_ALIGN: u32 = 4;
// One byte for the end marker plus up to 3 alignment bytes
pub const END_RESERVE: u32 = 4;

// Handle table
pub const MAX_OPEN_FILES: usize = 8;

/// Length of the erased (`0xFF`) run that fsck takes as the end of an
/// unfinalized record's data. A file whose real content ends in at least
/// this many `0xFF` bytes is truncated by repair.
pub const ERASED_RUN_THRESHOLD: u32 = 256;

// Flash adapter
pub const MAX_WRITE_UNIT: usize = 16;
pub const SCAN_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Write-once log on raw NOR flash.
    Wofs,
    /// Read-only image served from memory-mapped flash.
    Romfs,
}

/// Address window and format of one mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub kind: VolumeKind,
    pub base: u32,
    pub max_size: u32,
}

impl VolumeConfig {
    pub const fn wofs(base: u32, max_size: u32) -> Self {
        Self {
            kind: VolumeKind::Wofs,
            base,
            max_size,
        }
    }

    pub const fn romfs(base: u32, max_size: u32) -> Self {
        Self {
            kind: VolumeKind::Romfs,
            base,
            max_size,
        }
    }

    /// Parse a mount table entry such as
    /// `{"kind":"wofs","base":3145728,"max_size":262144}`.
    pub fn from_json(raw: &[u8]) -> Result<Self, FsError> {
        match serde_json_core::from_slice::<VolumeConfig>(raw) {
            Ok((config, _)) => Ok(config),
            Err(e) => {
                error!("Invalid volume config: {e:?}");
                Err(FsError::InvalidConfig)
            }
        }
    }

    pub const fn is_write_once(&self) -> bool {
        matches!(self.kind, VolumeKind::Wofs)
    }

    /// Absolute end of the window (exclusive).
    pub const fn end(&self) -> u64 {
        self.base as u64 + self.max_size as u64
    }
}
