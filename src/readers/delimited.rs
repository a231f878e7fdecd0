//! Delimited text with a header row.

use std::cell::Cell;
use std::io::{self, BufRead, BufReader, Read};
use std::rc::Rc;
use csv::{ByteRecord, ReaderBuilder};

use super::RecordReader;
use crate::error::IngestError;
use crate::schema::FieldSchema;

/// Line bookkeeping shared between the csv reader and its input.
#[derive(Debug)]
struct LineLimit {
    max_lines: u64,
    /// Line on which the record being read starts
    record_start: Cell<u64>,
    /// Last line handed to csv before the limit was hit
    overrun_at: Cell<Option<u64>>,
}

/// Feeds csv one line per `read` call and refuses to start a line that would
/// take the current record past the limit. Memory stays bounded even when a
/// quote is never closed.
struct LineFeed<R: Read> {
    input: BufReader<R>,
    line: u64,
    limit: Rc<LineLimit>,
}

impl<R: Read> Read for LineFeed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.input.fill_buf()?;
        if available.is_empty() || buf.is_empty() {
            return Ok(0);
        }

        if self.line >= self.limit.record_start.get() + self.limit.max_lines {
            self.limit.overrun_at.set(Some(self.line - 1));
            return Err(io::Error::new(io::ErrorKind::InvalidData, "quoted field spans too many lines"));
        }

        let line_len = available
            .iter()
            .position(|&b| b == b'\n')
            .map_or(available.len(), |i| i + 1);
        let n = line_len.min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        if available[n - 1] == b'\n' {
            self.line += 1;
        }

        self.input.consume(n);
        Ok(n)
    }
}

/// Reads delimited records laid out by the header row.
///
/// The raw schema is the header with repeated names collapsed; a repeated
/// column is ignored so every other column still lands in its own raw field.
pub struct DelimitedRecordReader<R: Read> {
    reader: csv::Reader<LineFeed<R>>,
    current: ByteRecord,
    limit: Rc<LineLimit>,
    /// Raw field index for each column, `None` for a repeated name
    columns: Option<Vec<Option<usize>>>,
}

impl<R: Read> DelimitedRecordReader<R> {
    pub fn new(input: R, delimiter: u8, quote: u8, max_quoted_lines: u64) -> Self {
        let limit = Rc::new(LineLimit {
            max_lines: max_quoted_lines.max(1),
            record_start: Cell::new(1),
            overrun_at: Cell::new(None),
        });
        let feed = LineFeed {
            input: BufReader::new(input),
            line: 1,
            limit: Rc::clone(&limit),
        };

        let reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .quote(quote)
            .flexible(true)
            .from_reader(feed);

        Self {
            reader,
            current: ByteRecord::new(),
            limit,
            columns: None,
        }
    }

    /// Header row as read; empty when the input is empty.
    pub fn header(&mut self) -> Result<Vec<String>, IngestError> {
        self.limit.record_start.set(self.reader.position().line());
        let read = self.reader.byte_headers().map(|header| {
            header
                .iter()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .collect::<Vec<String>>()
        });
        let header = match read {
            Ok(header) => header,
            Err(e) => return Err(self.read_error(e)),
        };

        if self.columns.is_none() {
            let mut seen = FieldSchema::new();
            let columns = header
                .iter()
                .map(|name| {
                    if seen.contains(name) {
                        tracing::warn!("Ignoring repeated header column '{}'", name);
                        None
                    } else {
                        Some(seen.push(name.clone()))
                    }
                })
                .collect();
            self.columns = Some(columns);
        }

        Ok(header)
    }

    fn read_error(&self, error: csv::Error) -> IngestError {
        match self.limit.overrun_at.take() {
            Some(end_line) => IngestError::QuotedFieldTooLong {
                start_line: self.limit.record_start.get(),
                end_line,
                max_lines: self.limit.max_lines,
            },
            None => error.into(),
        }
    }
}

impl<R: Read> RecordReader for DelimitedRecordReader<R> {
    fn read(&mut self, record: &mut [String], got_fields: &mut [bool]) -> Result<Option<usize>, IngestError> {
        if self.columns.is_none() {
            self.header()?;
        }

        loop {
            self.limit.record_start.set(self.reader.position().line());
            match self.reader.read_byte_record(&mut self.current) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(e) => return Err(self.read_error(e)),
            }

            // A row holding only NUL is padding, not data
            if self.current.len() == 1 && &self.current[0] == b"\0" {
                continue;
            }

            let columns = self.columns.as_deref().unwrap_or_default();
            let mut populated = 0;
            for (field, column) in self.current.iter().zip(columns) {
                let Some(index) = *column else {
                    continue;
                };
                if index < record.len() {
                    record[index] = String::from_utf8_lossy(field).into_owned();
                    got_fields[index] = true;
                    populated += 1;
                }
            }
            return Ok(Some(populated));
        }
    }
}
