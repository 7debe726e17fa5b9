#![cfg_attr(not(test), no_std)]

// Declare modules at the crate root
pub mod cfg;
pub mod fs;
pub mod mem;

// Re-export the types a mount table needs
pub use cfg::fs_cfg::{VolumeConfig, VolumeKind};
pub use fs::{FsError, OpenFlags, SeekFrom, Volume};
pub use mem::flash::{Mapped, Medium, Nor};
