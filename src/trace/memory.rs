use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use super::event::RawRecord;
use super::parse::{
    parse_cpu_table, parse_file_header, read_record, CpuSection, ParseError, FILE_HEADER_SIZE,
    RECORD_HEADER_SIZE,
};
use super::{RecordCursor, RecordSource};

/// Trace held entirely in memory, in the same encoding as a trace file.
///
/// Offsets are byte offsets into the encoded buffer, so entries loaded from a
/// `MemorySource` behave exactly like entries loaded from the equivalent file.
#[derive(Debug)]
pub struct MemorySource {
    data: Vec<u8>,
    sections: Vec<CpuSection>,
    closed: AtomicBool,
}

impl MemorySource {
    /// Wrap an encoded trace, validating its header and CPU table.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ParseError> {
        let header = parse_file_header(&data)?;
        let table = data.get(FILE_HEADER_SIZE..).unwrap_or_default();
        let sections = parse_cpu_table(table, header.cpu_count as usize, data.len() as u64)?;

        Ok(Self {
            data,
            sections,
            closed: AtomicBool::new(false),
        })
    }

    fn reader_at(&self, offset: u64) -> Cursor<&[u8]> {
        let mut reader = Cursor::new(self.data.as_slice());
        reader.set_position(offset);
        reader
    }
}

impl RecordSource for MemorySource {
    fn cpu_count(&self) -> usize {
        self.sections.len()
    }

    fn cursor(&self, cpu: usize) -> Result<Box<dyn RecordCursor + '_>, ParseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParseError::Closed);
        }
        let section = self.sections.get(cpu).copied().unwrap_or_default();
        Ok(Box::new(MemoryCursor {
            reader: self.reader_at(section.offset),
            end: section.end(),
        }))
    }

    fn read_at(&self, offset: u64) -> Result<RawRecord, ParseError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParseError::Closed);
        }
        let section = self
            .sections
            .iter()
            .find(|s| offset >= s.offset && offset < s.end())
            .ok_or(ParseError::NoRecord { offset })?;

        read_record(&mut self.reader_at(offset), offset, section.end())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryCursor<'a> {
    reader: Cursor<&'a [u8]>,
    end: u64,
}

impl RecordCursor for MemoryCursor<'_> {
    fn next_record(&mut self) -> Result<Option<RawRecord>, ParseError> {
        let pos = self.reader.position();
        if pos >= self.end {
            return Ok(None);
        }

        let record = read_record(&mut self.reader, pos, self.end)?;
        debug_assert_eq!(
            self.reader.position(),
            pos + RECORD_HEADER_SIZE as u64 + record.payload.len() as u64
        );
        Ok(Some(record))
    }
}
