//! Format readers.
//!
//! Every reader fills a raw record laid out by the plan's input schema and flags
//! which fields it populated. Fields the source does not mention stay blank and
//! unflagged.

mod aggregated;
mod delimited;
mod json;
mod single_line;

use std::cell::Cell;
use std::io::{self, Read};
use std::rc::Rc;

use crate::error::IngestError;

pub use aggregated::AggregatedRecordReader;
pub use delimited::DelimitedRecordReader;
pub use json::JsonRecordReader;
pub use single_line::{SingleLineRecordReader, SINGLE_LINE_FIELD};

/// Source of raw records.
pub trait RecordReader {
    /// Read the next record.
    ///
    /// `record` and `got_fields` are sized to the input schema and cleared by the
    /// caller. Returns the number of fields populated, or `None` at end of input.
    fn read(&mut self, record: &mut [String], got_fields: &mut [bool]) -> Result<Option<usize>, IngestError>;

    /// Recoverable parse errors since the last call.
    fn take_malformed_count(&mut self) -> usize {
        0
    }
}

/// Shared handle to a running byte total.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Rc<Cell<u64>>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    fn add(&self, n: usize) {
        self.0.set(self.0.get() + n as u64);
    }
}

/// Wraps a reader and counts the bytes pulled through it.
pub struct CountingReader<R: Read> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n);
        Ok(n)
    }
}
