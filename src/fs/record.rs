//! On-flash record format.
//!
//! ```text
//! name[1..=32] \0 pad(4)   [sentinel:4]   size:4 (LE)   data[size]   [pad(4)]
//!                          (wofs only)                               (wofs only)
//! ```
//!
//! A first name byte of `0xFF` marks the end of the log and a size of
//! `0xFFFF_FFFF` marks a record whose writer never closed it. Padding is
//! computed from the record's offset inside the volume window.

use log::error;

use crate::cfg::fs_cfg::{VolumeKind, MAX_NAME_LEN, RECORD_ALIGN};
use crate::fs::FsError;
use crate::mem::flash::{FlashAdapter, Medium};

pub const ERASED: u8 = 0xFF;
pub const UNFINALIZED: u32 = 0xFFFF_FFFF;
pub const DELETE_MARK: u8 = 0x00;

const LIVE_SENTINEL: [u8; 4] = [ERASED; 4];
const DELETED_SENTINEL: [u8; 4] = [DELETE_MARK, ERASED, ERASED, ERASED];
const SENTINEL_LEN: u32 = 4;
const SIZE_LEN: u32 = 4;

/// Longest possible header: name, terminator, worst-case padding, sentinel and size.
pub const MAX_HEADER: usize = MAX_NAME_LEN + 1 + 3 + 8;

pub type Name = heapless::String<MAX_NAME_LEN>;

pub const fn align(offset: u32) -> u32 {
    (offset + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

fn is_name_byte(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

pub fn validate_name(name: &str) -> Result<(), FsError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_NAME_LEN || !bytes.iter().all(|b| is_name_byte(*b)) {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

fn sentinel_len(kind: VolumeKind) -> u32 {
    match kind {
        VolumeKind::Wofs => SENTINEL_LEN,
        VolumeKind::Romfs => 0,
    }
}

/// Bytes from a record's offset to the first data byte.
pub fn header_len(kind: VolumeKind, offset: u32, name_len: usize) -> u32 {
    let name_end = align(offset + name_len as u32 + 1) - offset;
    name_end + sentinel_len(kind) + SIZE_LEN
}

/// Offset of the record following one whose data ends at `end`.
pub fn next_offset(kind: VolumeKind, end: u32) -> u32 {
    match kind {
        VolumeKind::Wofs => align(end),
        VolumeKind::Romfs => end,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u32,
    pub name: Name,
    pub data: u32,
    pub size: u32,
}

impl Record {
    pub fn next(&self, kind: VolumeKind) -> u32 {
        next_offset(kind, self.data + self.size)
    }
}

/// Header of a record whose size was never finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub offset: u32,
    pub name: Name,
    pub data: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    EmptyName,
    BadNameByte,
    Unterminated,
    BadSentinel,
    SizeOutOfRange,
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Live(Record),
    Deleted(Record),
    Unfinalized(Pending),
    EndOfLog,
    Corrupt(Malformed),
}

/// Read and decode the record at `offset` with one batched read.
pub fn decode<M: Medium>(
    flash: &mut FlashAdapter<M>,
    kind: VolumeKind,
    offset: u32,
) -> Result<Entry, FsError> {
    let max_size = flash.max_size();
    if offset >= max_size {
        return Ok(Entry::EndOfLog);
    }
    let avail = core::cmp::min(MAX_HEADER as u32, max_size - offset) as usize;
    let mut raw = [ERASED; MAX_HEADER];
    flash.read(offset, &mut raw[..avail])?;
    Ok(parse(&raw[..avail], kind, offset, max_size))
}

/// Decode a header from `raw`, the bytes at `offset` up to `MAX_HEADER` or
/// the end of the volume.
pub fn parse(raw: &[u8], kind: VolumeKind, offset: u32, max_size: u32) -> Entry {
    match raw.first() {
        None | Some(&ERASED) => return Entry::EndOfLog,
        Some(_) => {}
    }

    let bound = core::cmp::min(raw.len(), MAX_NAME_LEN + 1);
    let name_len = match raw[..bound].iter().position(|b| *b == 0) {
        Some(0) => return Entry::Corrupt(Malformed::EmptyName),
        Some(len) => len,
        None if raw.len() <= MAX_NAME_LEN => return Entry::Corrupt(Malformed::Truncated),
        None => return Entry::Corrupt(Malformed::Unterminated),
    };
    if !raw[..name_len].iter().all(|b| is_name_byte(*b)) {
        return Entry::Corrupt(Malformed::BadNameByte);
    }
    let name = match core::str::from_utf8(&raw[..name_len])
        .ok()
        .and_then(|s| Name::try_from(s).ok())
    {
        Some(name) => name,
        None => return Entry::Corrupt(Malformed::BadNameByte),
    };

    let mut at = (align(offset + name_len as u32 + 1) - offset) as usize;
    let mut deleted = false;
    if kind == VolumeKind::Wofs {
        let Some(field) = raw.get(at..at + SENTINEL_LEN as usize) else {
            return Entry::Corrupt(Malformed::Truncated);
        };
        if field == DELETED_SENTINEL {
            deleted = true;
        } else if field != LIVE_SENTINEL {
            return Entry::Corrupt(Malformed::BadSentinel);
        }
        at += SENTINEL_LEN as usize;
    }
    let Some(field) = raw.get(at..at + SIZE_LEN as usize) else {
        return Entry::Corrupt(Malformed::Truncated);
    };
    let size = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    let data = offset + at as u32 + SIZE_LEN;

    if size == UNFINALIZED {
        return Entry::Unfinalized(Pending { offset, name, data });
    }
    if data as u64 + size as u64 > max_size as u64 {
        return Entry::Corrupt(Malformed::SizeOutOfRange);
    }
    let record = Record {
        offset,
        name,
        data,
        size,
    };
    if deleted {
        Entry::Deleted(record)
    } else {
        Entry::Live(record)
    }
}

/// Where the log stops: either erased flash, or an unfinalized record that
/// blocks everything after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEnd {
    pub offset: u32,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Record),
    Missing(LogEnd),
}

fn walk<F, S>(kind: VolumeKind, mut decode_at: F, mut stop: S) -> Result<Lookup, FsError>
where
    F: FnMut(u32) -> Result<Entry, FsError>,
    S: FnMut(&Record) -> bool,
{
    let mut offset = 0;
    loop {
        match decode_at(offset)? {
            Entry::EndOfLog => {
                return Ok(Lookup::Missing(LogEnd {
                    offset,
                    pending: false,
                }))
            }
            Entry::Unfinalized(_) => {
                return Ok(Lookup::Missing(LogEnd {
                    offset,
                    pending: true,
                }))
            }
            Entry::Live(record) if stop(&record) => return Ok(Lookup::Found(record)),
            Entry::Live(record) | Entry::Deleted(record) => offset = record.next(kind),
            Entry::Corrupt(fault) => {
                error!("Corrupt record at 0x{offset:08X}: {fault:?}");
                return Err(FsError::CorruptionDetected);
            }
        }
    }
}

/// Find the live record called `name`, ignoring ASCII case.
pub fn scan_for_name<F>(kind: VolumeKind, name: &str, decode_at: F) -> Result<Lookup, FsError>
where
    F: FnMut(u32) -> Result<Entry, FsError>,
{
    walk(kind, decode_at, |record| record.name.eq_ignore_ascii_case(name))
}

pub fn first_free<F>(kind: VolumeKind, decode_at: F) -> Result<LogEnd, FsError>
where
    F: FnMut(u32) -> Result<Entry, FsError>,
{
    match walk(kind, decode_at, |_| false)? {
        Lookup::Missing(end) => Ok(end),
        Lookup::Found(record) => Ok(LogEnd {
            offset: record.next(kind),
            pending: false,
        }),
    }
}

/// Encode a header into `out` and return its length. `size: None` writes
/// the unfinalized placeholder.
pub fn encode_header(
    kind: VolumeKind,
    offset: u32,
    name: &str,
    size: Option<u32>,
    out: &mut [u8; MAX_HEADER],
) -> usize {
    let name = name.as_bytes();
    let len = header_len(kind, offset, name.len()) as usize;
    out[..len].fill(0);
    out[..name.len()].copy_from_slice(name);
    let size_at = len - SIZE_LEN as usize;
    if kind == VolumeKind::Wofs {
        out[size_at - SENTINEL_LEN as usize..size_at].copy_from_slice(&LIVE_SENTINEL);
    }
    out[size_at..len].copy_from_slice(&size.unwrap_or(UNFINALIZED).to_le_bytes());
    len
}

// Field positions are fixed relative to the data start, so the write-side
// helpers take the record's data offset.

/// Flip a record's sentinel from live to deleted.
pub fn mark_deleted<M: Medium>(
    flash: &mut FlashAdapter<M>,
    kind: VolumeKind,
    data: u32,
) -> Result<(), FsError> {
    if kind != VolumeKind::Wofs {
        return Err(FsError::ReadOnly);
    }
    flash.program(data - SIZE_LEN - SENTINEL_LEN, &DELETED_SENTINEL)
}

/// Replace the unfinalized size placeholder with `size`.
pub fn finalize_size<M: Medium>(
    flash: &mut FlashAdapter<M>,
    kind: VolumeKind,
    data: u32,
    size: u32,
) -> Result<(), FsError> {
    if kind != VolumeKind::Wofs {
        return Err(FsError::ReadOnly);
    }
    flash.program(data - SIZE_LEN, &size.to_le_bytes())
}
