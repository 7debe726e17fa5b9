use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{info, warn};

use crate::fs::{FsError, Volume};
use crate::mem::flash::Medium;

impl<R: RawMutex, M: Medium> Volume<R, M> {
    /// Erase the log. Erasing is the only way to reclaim space.
    ///
    /// A partial format erases from the first sector through the one holding
    /// the end-of-log marker, which drops every record, live or deleted. If
    /// the end of the log cannot be trusted the whole window is erased.
    pub fn format(&self, full: bool) -> Result<(), FsError> {
        if !self.config().is_write_once() {
            return Err(FsError::ReadOnly);
        }
        self.with_handles(|table| table.claim_exclusive())?;
        let result = self.erase_log(full);
        self.with_handles(|table| table.release_exclusive());
        result
    }

    fn erase_log(&self, full: bool) -> Result<(), FsError> {
        let max_size = self.config().max_size;
        let last_offset = if full {
            max_size - 1
        } else {
            match self.log_end() {
                Ok(end) if !end.pending => end.offset.min(max_size - 1),
                Ok(_) | Err(FsError::CorruptionDetected) => {
                    warn!("{} Log end unknown, erasing the whole window", self.tag());
                    max_size - 1
                }
                Err(e) => return Err(e),
            }
        };

        let (first, last) =
            self.with_flash(|flash| (flash.sector_of(0), flash.sector_of(last_offset)));
        info!(
            "{} Erasing sectors {}..={} ({})",
            self.tag(),
            first,
            last,
            if full { "full" } else { "partial" }
        );
        for sector in first..=last {
            self.with_flash(|flash| flash.erase(sector))?;
        }
        info!("{} Format complete ✓", self.tag());
        Ok(())
    }
}
