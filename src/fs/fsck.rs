//! Consistency check and crash repair.
//!
//! A record whose writer lost power keeps the `0xFFFF_FFFF` size
//! placeholder. Repair scans its data for a run of `ERASED_RUN_THRESHOLD`
//! erased bytes and takes the last programmed byte before that run as the
//! end of the file.

use core::cmp::min;

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{error, info, warn};

use crate::cfg::fs_cfg::{ERASED_RUN_THRESHOLD, SCAN_CHUNK};
use crate::fs::record::{self, next_offset, Entry, Lookup, Malformed, ERASED};
use crate::fs::{FsError, Volume};
use crate::mem::flash::Medium;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsckStatus {
    Ok,
    Repaired,
    CorruptionDetected,
}

/// First fault that stopped the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    Malformed { offset: u32, reason: Malformed },
    Unfinalized { offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsckReport {
    pub status: FsckStatus,
    pub live: u32,
    pub deleted: u32,
    pub repaired: u32,
    /// Offset where the walk stopped.
    pub used: u32,
    pub problem: Option<Problem>,
}

impl<R: RawMutex, M: Medium> Volume<R, M> {
    /// Validate every record. With `repair` set, finalize records left open
    /// by a power loss; this needs the writer slot and fails with `Busy`
    /// while a file is open for writing.
    pub fn fsck(&self, repair: bool) -> Result<FsckReport, FsError> {
        let repair = repair && self.config().is_write_once();
        if repair {
            self.with_handles(|table| table.claim_writer())?;
        }
        let result = self.check(repair);
        if repair {
            self.with_handles(|table| table.release_writer());
        }

        match &result {
            Ok(report) if report.status == FsckStatus::CorruptionDetected => error!(
                "[FSCK] {:?} after {} live, {} deleted records ✗",
                report.problem, report.live, report.deleted
            ),
            Ok(report) => info!(
                "[FSCK] {} live, {} deleted, {} repaired, 0x{:X} bytes used ✓",
                report.live, report.deleted, report.repaired, report.used
            ),
            Err(e) => error!("[FSCK] Aborted: {:?} ✗", e),
        }
        result
    }

    fn check(&self, repair: bool) -> Result<FsckReport, FsError> {
        let kind = self.config().kind;
        // A writer's own placeholder is expected while it is open
        let writing = self
            .with_handles(|table| table.writer())
            .map(|handle| handle.header);
        let mut report = FsckReport {
            status: FsckStatus::Ok,
            live: 0,
            deleted: 0,
            repaired: 0,
            used: 0,
            problem: None,
        };

        let mut offset = 0;
        loop {
            match self.decode_at(offset)? {
                Entry::EndOfLog => break,
                Entry::Live(record) => {
                    report.live += 1;
                    offset = record.next(kind);
                }
                Entry::Deleted(record) => {
                    report.deleted += 1;
                    offset = record.next(kind);
                }
                Entry::Unfinalized(pending) if writing == Some(pending.offset) => break,
                Entry::Unfinalized(pending) if repair => {
                    let size = self.recover_size(pending.data)?;
                    self.with_flash(|flash| {
                        record::finalize_size(flash, kind, pending.data, size)
                    })?;
                    warn!(
                        "[FSCK] Finalized {} at 0x{:08X} with {} recovered bytes",
                        pending.name, pending.offset, size
                    );
                    // Finish the interrupted close of a rewrite: retire the older version
                    if let Lookup::Found(old) = self.lookup(&pending.name)? {
                        if old.offset != pending.offset {
                            self.with_flash(|flash| {
                                record::mark_deleted(flash, kind, old.data)
                            })?;
                            report.live -= 1;
                            report.deleted += 1;
                        }
                    }
                    report.repaired += 1;
                    report.live += 1;
                    offset = next_offset(kind, pending.data + size);
                }
                Entry::Unfinalized(pending) => {
                    report.problem = Some(Problem::Unfinalized {
                        offset: pending.offset,
                    });
                    break;
                }
                Entry::Corrupt(reason) => {
                    report.problem = Some(Problem::Malformed { offset, reason });
                    break;
                }
            }
        }

        report.used = offset;
        report.status = if report.problem.is_some() {
            FsckStatus::CorruptionDetected
        } else if report.repaired > 0 {
            FsckStatus::Repaired
        } else {
            FsckStatus::Ok
        };
        Ok(report)
    }

    /// Length of the data at `data`: up to the last programmed byte before
    /// the first erased run, or before the end of the volume.
    fn recover_size(&self, data: u32) -> Result<u32, FsError> {
        let limit = self.config().max_size;
        let mut buf = [0u8; SCAN_CHUNK];
        let mut offset = data;
        let mut end = data;
        let mut run = 0u32;
        while offset < limit {
            let n = min(SCAN_CHUNK as u32, limit - offset) as usize;
            self.with_flash(|flash| flash.read(offset, &mut buf[..n]))?;
            for (i, byte) in buf[..n].iter().enumerate() {
                if *byte != ERASED {
                    run = 0;
                    end = offset + i as u32 + 1;
                    continue;
                }
                run += 1;
                if run >= ERASED_RUN_THRESHOLD {
                    return Ok(end - data);
                }
            }
            offset += n as u32;
        }
        Ok(end - data)
    }
}
