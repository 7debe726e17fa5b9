use embassy_sync::blocking_mutex::raw::RawMutex;
use log::error;

use crate::fs::record::{Entry, Name};
use crate::fs::{FsError, Volume};
use crate::mem::flash::Medium;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Name,
    pub size: u32,
}

/// Directory cursor. It holds no volume state, so dropping it is enough to
/// close it.
#[derive(Debug, Clone)]
pub struct Dir {
    offset: u32,
    done: bool,
}

impl<R: RawMutex, M: Medium> Volume<R, M> {
    pub fn opendir(&self) -> Dir {
        Dir {
            offset: 0,
            done: false,
        }
    }

    /// Next live record, or `None` once the log ends. An unfinalized record
    /// ends the listing like erased flash does.
    pub fn readdir(&self, dir: &mut Dir) -> Result<Option<DirEntry>, FsError> {
        let kind = self.config().kind;
        while !dir.done {
            match self.decode_at(dir.offset)? {
                Entry::EndOfLog | Entry::Unfinalized(_) => dir.done = true,
                Entry::Deleted(record) => dir.offset = record.next(kind),
                Entry::Live(record) => {
                    dir.offset = record.next(kind);
                    return Ok(Some(DirEntry {
                        name: record.name,
                        size: record.size,
                    }));
                }
                Entry::Corrupt(fault) => {
                    error!(
                        "{} Listing stopped at 0x{:08X}: {:?}",
                        self.tag(),
                        dir.offset,
                        fault
                    );
                    dir.done = true;
                    return Err(FsError::CorruptionDetected);
                }
            }
        }
        Ok(None)
    }

    pub fn closedir(&self, dir: Dir) {
        drop(dir);
    }

    pub fn entries(&self) -> Entries<'_, R, M> {
        Entries {
            volume: self,
            dir: self.opendir(),
        }
    }
}

pub struct Entries<'a, R: RawMutex, M: Medium> {
    volume: &'a Volume<R, M>,
    dir: Dir,
}

impl<R: RawMutex, M: Medium> Iterator for Entries<'_, R, M> {
    type Item = Result<DirEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.volume.readdir(&mut self.dir).transpose()
    }
}
