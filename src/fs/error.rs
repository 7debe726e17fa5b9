use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

use crate::mem::ex_flash::ExFlashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    /// Write or create attempted on a read-only mapped volume.
    ReadOnly,
    /// Another handle already holds the volume's single writer slot.
    Busy,
    TooManyOpenFiles,
    OutOfSpace,
    InvalidSeek,
    CorruptionDetected,
    PhysicalIo(NorFlashErrorKind),
    InvalidName,
    BadHandle,
    AccessDenied,
    Unsupported,
    InvalidConfig,
}

impl FsError {
    pub fn io<E: NorFlashError>(err: E) -> Self {
        FsError::PhysicalIo(err.kind())
    }

    /// POSIX errno reported by the dispatch layer for this error.
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => 2,           // ENOENT
            FsError::PhysicalIo(_) => 5,      // EIO
            FsError::BadHandle => 9,          // EBADF
            FsError::AccessDenied => 13,      // EACCES
            FsError::Busy => 16,              // EBUSY
            FsError::AlreadyExists => 17,     // EEXIST
            FsError::InvalidSeek => 22,       // EINVAL
            FsError::InvalidConfig => 22,     // EINVAL
            FsError::TooManyOpenFiles => 24,  // EMFILE
            FsError::OutOfSpace => 28,        // ENOSPC
            FsError::ReadOnly => 30,          // EROFS
            FsError::InvalidName => 36,       // ENAMETOOLONG
            FsError::Unsupported => 95,       // EOPNOTSUPP
            FsError::CorruptionDetected => 117, // EUCLEAN
        }
    }
}

impl From<NorFlashErrorKind> for FsError {
    fn from(kind: NorFlashErrorKind) -> Self {
        FsError::PhysicalIo(kind)
    }
}

impl From<ExFlashError> for FsError {
    fn from(err: ExFlashError) -> Self {
        FsError::io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_errors_keep_their_kind() {
        assert_eq!(
            FsError::from(ExFlashError::AddressInvalid),
            FsError::PhysicalIo(NorFlashErrorKind::OutOfBounds)
        );
        assert_eq!(
            FsError::from(NorFlashErrorKind::NotAligned).to_errno(),
            5
        );
    }

    #[test]
    fn logical_errors_map_to_distinct_errno() {
        assert_eq!(FsError::Busy.to_errno(), 16);
        assert_eq!(FsError::ReadOnly.to_errno(), 30);
        assert_eq!(FsError::OutOfSpace.to_errno(), 28);
    }
}
