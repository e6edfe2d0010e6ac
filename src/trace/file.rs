use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use super::event::RawRecord;
use super::parse::{
    cpu_table_len, parse_cpu_table, parse_file_header, read_record, CpuSection, FileHeader,
    ParseError, FILE_HEADER_SIZE, RECORD_HEADER_SIZE,
};
use super::{RecordCursor, RecordSource};

/// Trace file on disk.
///
/// Loading opens one private handle per CPU cursor. Lazy re-reads share a
/// single handle guarded by a mutex, which `close` also takes.
pub struct FileSource {
    path: PathBuf,
    header: FileHeader,
    sections: Vec<CpuSection>,
    backing: Mutex<Option<File>>,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("cpu_count", &self.header.cpu_count)
            .finish()
    }
}

impl FileSource {
    /// Open a trace file and validate its header and CPU table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut head = [0u8; FILE_HEADER_SIZE];
        read_exact_or_truncated(&mut file, &mut head)?;
        let header = parse_file_header(&head)?;

        let cpu_count = header.cpu_count as usize;
        let table_len = cpu_table_len(&header, file_len)?;
        let mut table = Vec::new();
        table.try_reserve_exact(table_len)?;
        table.resize(table_len, 0u8);
        read_exact_or_truncated(&mut file, &mut table)?;
        let sections = parse_cpu_table(&table, cpu_count, file_len)?;

        debug!(path = %path.display(), cpu_count, file_len, "opened trace file");

        Ok(Self {
            path,
            header,
            sections,
            backing: Mutex::new(Some(file)),
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Section descriptor of `cpu`.
    pub fn section(&self, cpu: usize) -> Option<CpuSection> {
        self.sections.get(cpu).copied()
    }

    fn section_containing(&self, offset: u64) -> Option<CpuSection> {
        self.sections
            .iter()
            .copied()
            .find(|s| offset >= s.offset && offset < s.end())
    }
}

impl RecordSource for FileSource {
    fn cpu_count(&self) -> usize {
        self.sections.len()
    }

    fn cursor(&self, cpu: usize) -> Result<Box<dyn RecordCursor + '_>, ParseError> {
        if self.backing.lock().is_none() {
            return Err(ParseError::Closed);
        }
        let section = self.section(cpu).unwrap_or_default();
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(section.offset))?;

        Ok(Box::new(FileCursor {
            reader: BufReader::with_capacity(64 * 1024, file),
            pos: section.offset,
            end: section.end(),
        }))
    }

    fn read_at(&self, offset: u64) -> Result<RawRecord, ParseError> {
        let section = self
            .section_containing(offset)
            .ok_or(ParseError::NoRecord { offset })?;

        let mut guard = self.backing.lock();
        let file = guard.as_mut().ok_or(ParseError::Closed)?;
        file.seek(SeekFrom::Start(offset))?;
        read_record(file, offset, section.end())
    }

    fn close(&self) {
        if self.backing.lock().take().is_some() {
            debug!(path = %self.path.display(), "closed trace file");
        }
    }
}

/// Sequential reader over one CPU section.
struct FileCursor {
    reader: BufReader<File>,
    pos: u64,
    end: u64,
}

impl RecordCursor for FileCursor {
    fn next_record(&mut self) -> Result<Option<RawRecord>, ParseError> {
        if self.pos >= self.end {
            return Ok(None);
        }

        let record = read_record(&mut self.reader, self.pos, self.end)?;
        self.pos += RECORD_HEADER_SIZE as u64 + record.payload.len() as u64;
        Ok(Some(record))
    }
}

fn read_exact_or_truncated(file: &mut File, buf: &mut [u8]) -> Result<(), ParseError> {
    let mut filled = 0;
    while filled < buf.len() {
        let rest = buf.get_mut(filled..).unwrap_or_default();
        match file.read(rest)? {
            0 => return Err(ParseError::Truncated { size: filled }),
            n => filled += n,
        }
    }
    Ok(())
}
