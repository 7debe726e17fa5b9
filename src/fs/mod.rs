//! Write-once log filesystem (WOFS) and its read-only mapped sibling (ROMFS).

pub mod dir;
pub mod error;
pub mod format;
pub mod fsck;
pub mod handle;
pub mod image;
pub mod record;
pub mod volume;

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::mem::flash::{Mapped, Nor};

pub use dir::{Dir, DirEntry};
pub use error::FsError;
pub use fsck::{FsckReport, FsckStatus, Problem};
pub use handle::Fd;
pub use image::ImageBuilder;
pub use record::Name;
pub use volume::{Usage, Volume};

bitflags! {
    /// Open flags, numerically compatible with newlib's `O_*` values.
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR = 1 << 1;
        const APPEND = 1 << 3;
        const CREATE = 1 << 9;
        const TRUNC = 1 << 10;
        const EXCL = 1 << 11;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR | OpenFlags::APPEND)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i64),
    End(i64),
}

/// Write-once volume shared between threads.
pub type Wofs<F> = Volume<CriticalSectionRawMutex, Nor<F>>;

/// Read-only mapped volume shared between threads.
pub type Romfs = Volume<CriticalSectionRawMutex, Mapped>;
