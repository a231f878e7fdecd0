//! Free-text logs, one record per line.
//!
//! The whole line becomes the single raw field [`SINGLE_LINE_FIELD`]; extract
//! transforms pull the time and analysis fields out of it.

use std::io::BufRead;

use super::RecordReader;
use crate::error::IngestError;

/// Name of the raw field holding the line.
pub const SINGLE_LINE_FIELD: &str = "raw";

pub struct SingleLineRecordReader<R: BufRead> {
    input: R,
    line: Vec<u8>,
}

impl<R: BufRead> SingleLineRecordReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead> RecordReader for SingleLineRecordReader<R> {
    fn read(&mut self, record: &mut [String], got_fields: &mut [bool]) -> Result<Option<usize>, IngestError> {
        loop {
            self.line.clear();
            if self.input.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }

            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }

            if let (Some(slot), Some(got)) = (record.first_mut(), got_fields.first_mut()) {
                *slot = text.to_string();
                *got = true;
            }
            return Ok(Some(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_and_blank_skipping() {
        let mut reader = SingleLineRecordReader::new("first line\r\n\nsecond\n".as_bytes());
        let mut record = vec![String::new()];
        let mut got = vec![false];

        assert_eq!(reader.read(&mut record, &mut got).unwrap(), Some(1));
        assert_eq!(record[0], "first line");
        assert!(got[0]);

        assert_eq!(reader.read(&mut record, &mut got).unwrap(), Some(1));
        assert_eq!(record[0], "second");

        assert_eq!(reader.read(&mut record, &mut got).unwrap(), None);
    }

    #[test]
    fn test_last_line_without_newline() {
        let mut reader = SingleLineRecordReader::new("only".as_bytes());
        let mut record = vec![String::new()];
        let mut got = vec![false];

        assert_eq!(reader.read(&mut record, &mut got).unwrap(), Some(1));
        assert_eq!(record[0], "only");
    }
}
