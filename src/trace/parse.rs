//! Decoding of the per-CPU trace file format.
//!
//! A trace file starts with a fixed [`FileHeader`], followed by one
//! [`CpuSection`] descriptor per CPU and the record sections themselves.
//! Every record is a 24-byte [`RecordHeader`] followed by `payload_len` bytes.
//! All integers are little-endian.

use std::collections::TryReserveError;
use std::io::Read;

use thiserror::Error;

use super::event::RawRecord;

/// File magic.
pub const MAGIC: [u8; 8] = *b"KTRACE\0\0";

/// Only supported format version.
pub const VERSION: u32 = 1;

/// File header size in bytes.
pub const FILE_HEADER_SIZE: usize = 16;

/// CPU section descriptor size in bytes.
pub const CPU_SECTION_SIZE: usize = 16;

/// Record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Errors that can occur while decoding a trace file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace truncated: {size} bytes")]
    Truncated { size: usize },

    #[error("allocating the cpu table: {0}")]
    Alloc(#[from] TryReserveError),

    #[error("bad magic {found:02x?}")]
    BadMagic { found: [u8; 8] },

    #[error("unsupported format version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("cpu {cpu} section [{offset}, +{len}) lies outside the {file_len}-byte file")]
    SectionOutOfBounds {
        cpu: usize,
        offset: u64,
        len: u64,
        file_len: u64,
    },

    #[error("record at offset {offset}: header truncated")]
    RecordTruncated { offset: u64 },

    #[error("record at offset {offset}: payload of {payload_len} bytes overruns its section")]
    PayloadOverrun { offset: u64, payload_len: u16 },

    #[error("no record at offset {offset}")]
    NoRecord { offset: u64 },

    #[error("trace source is closed")]
    Closed,
}

/// Fixed header at the start of a trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub cpu_count: u32,
}

/// Location of one CPU's record section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSection {
    pub offset: u64,
    pub len: u64,
}

impl CpuSection {
    /// Offset one past the section's last byte.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub timestamp_ns: u64,
    pub pid: i32,
    pub kind: u16,
    pub payload_len: u16,
    pub missed: u32,
    pub flags: u8,
    pub preempt_count: u8,
}

impl RecordHeader {
    /// Total encoded size of the record, header included.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + u64::from(self.payload_len)
    }
}

/// Parse the fixed file header.
pub fn parse_file_header(data: &[u8]) -> Result<FileHeader, ParseError> {
    let (Some(magic), Some(version), Some(cpu_count)) = (
        read_fixed::<8>(data, 0),
        read_u32_le(data, 8),
        read_u32_le(data, 12),
    ) else {
        return Err(ParseError::Truncated { size: data.len() });
    };

    if magic != MAGIC {
        return Err(ParseError::BadMagic { found: magic });
    }
    if version != VERSION {
        return Err(ParseError::UnsupportedVersion { version });
    }

    Ok(FileHeader { version, cpu_count })
}

/// Byte length of the CPU table declared by `header`, checked against the
/// `file_len` bytes actually present.
pub fn cpu_table_len(header: &FileHeader, file_len: u64) -> Result<usize, ParseError> {
    let table_len = u64::from(header.cpu_count) * CPU_SECTION_SIZE as u64;
    let size = usize::try_from(file_len).unwrap_or(usize::MAX);
    if table_len.saturating_add(FILE_HEADER_SIZE as u64) > file_len {
        return Err(ParseError::Truncated { size });
    }
    usize::try_from(table_len).map_err(|_| ParseError::Truncated { size })
}

/// Parse the CPU section table that follows the file header.
///
/// Every section is checked against `file_len`.
pub fn parse_cpu_table(
    data: &[u8],
    cpu_count: usize,
    file_len: u64,
) -> Result<Vec<CpuSection>, ParseError> {
    if cpu_count
        .checked_mul(CPU_SECTION_SIZE)
        .map_or(true, |len| len > data.len())
    {
        return Err(ParseError::Truncated { size: data.len() });
    }

    let mut sections = Vec::new();
    sections.try_reserve_exact(cpu_count)?;

    for cpu in 0..cpu_count {
        let base = cpu * CPU_SECTION_SIZE;
        let (Some(offset), Some(len)) = (read_u64_le(data, base), read_u64_le(data, base + 8))
        else {
            return Err(ParseError::Truncated { size: data.len() });
        };

        let section = CpuSection { offset, len };
        if offset.checked_add(len).map_or(true, |end| end > file_len) {
            return Err(ParseError::SectionOutOfBounds {
                cpu,
                offset,
                len,
                file_len,
            });
        }
        sections.push(section);
    }

    Ok(sections)
}

/// Parse a record header. `offset` is only used for error reporting.
pub fn parse_record_header(data: &[u8], offset: u64) -> Result<RecordHeader, ParseError> {
    if data.len() < RECORD_HEADER_SIZE {
        return Err(ParseError::RecordTruncated { offset });
    }

    let header = (|| {
        Some(RecordHeader {
            timestamp_ns: read_u64_le(data, 0)?,
            pid: read_u32_le(data, 8)? as i32,
            kind: read_u16_le(data, 12)?,
            payload_len: read_u16_le(data, 14)?,
            missed: read_u32_le(data, 16)?,
            flags: read_u8(data, 20)?,
            preempt_count: read_u8(data, 21)?,
            // pad[2] at 22-23
        })
    })();

    header.ok_or(ParseError::RecordTruncated { offset })
}

/// Read one record whose header starts at `offset`; the record must end at or
/// before `section_end`.
pub fn read_record<R: Read>(
    reader: &mut R,
    offset: u64,
    section_end: u64,
) -> Result<RawRecord, ParseError> {
    if section_end.saturating_sub(offset) < RECORD_HEADER_SIZE as u64 {
        return Err(ParseError::RecordTruncated { offset });
    }

    let mut head = [0u8; RECORD_HEADER_SIZE];
    reader
        .read_exact(&mut head)
        .map_err(|_| ParseError::RecordTruncated { offset })?;
    let header = parse_record_header(&head, offset)?;

    if offset.saturating_add(header.record_len()) > section_end {
        return Err(ParseError::PayloadOverrun {
            offset,
            payload_len: header.payload_len,
        });
    }

    let mut payload = vec![0u8; usize::from(header.payload_len)];
    reader.read_exact(&mut payload)?;

    Ok(RawRecord {
        timestamp_ns: header.timestamp_ns,
        pid: header.pid,
        kind: header.kind,
        missed: header.missed,
        flags: header.flags,
        preempt_count: header.preempt_count,
        offset,
        payload,
    })
}

// ---------------------------------------------------------------------------
// Byte-reading helpers (no indexing, no panics)
// ---------------------------------------------------------------------------

pub(crate) fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    data.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

fn read_u8(data: &[u8], offset: usize) -> Option<u8> {
    data.get(offset).copied()
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    read_fixed::<2>(data, offset).map(u16::from_le_bytes)
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    read_fixed::<4>(data, offset).map(u32::from_le_bytes)
}

fn read_u64_le(data: &[u8], offset: usize) -> Option<u64> {
    read_fixed::<8>(data, offset).map(u64::from_le_bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
