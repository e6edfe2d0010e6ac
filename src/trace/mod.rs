pub mod event;
pub mod file;
pub mod memory;
pub mod parse;
pub mod stats;
pub mod write;

use self::event::RawRecord;
use self::parse::ParseError;

/// Forward-only reader over one CPU's records, in file order.
pub trait RecordCursor: Send {
    /// Return the next record, or `None` at end of stream.
    fn next_record(&mut self) -> Result<Option<RawRecord>, ParseError>;
}

/// A per-CPU ordered store of raw trace records.
///
/// Cursors are independent, so one CPU can be scanned per thread. `read_at`
/// re-reads a single record for lazy field access after loading and must be
/// safe to call from any thread.
pub trait RecordSource: Send + Sync {
    /// Number of CPU sections in the source.
    fn cpu_count(&self) -> usize;

    /// Open a cursor positioned at the first record of `cpu`.
    fn cursor(&self, cpu: usize) -> Result<Box<dyn RecordCursor + '_>, ParseError>;

    /// Re-read the record whose header starts at `offset`.
    fn read_at(&self, offset: u64) -> Result<RawRecord, ParseError>;

    /// Release the backing storage. Later `cursor` and `read_at` calls fail
    /// with [`ParseError::Closed`].
    fn close(&self) {}
}
