//! Out-of-band control messages.
//!
//! A control message is a record shaped like a data record where every field is
//! blank except the last (control) field, which carries an opcode and arguments.

use std::io::{self, Write};

use super::LengthEncodedWriter;

const INTERIM_MESSAGE_CODE: char = 'i';
const RESET_BUCKETS_MESSAGE_CODE: char = 'r';
const FLUSH_MESSAGE_CODE: char = 'f';

/// Size of the space run that follows a flush; it pushes the flush through
/// any input buffering on the receiving side.
pub const FLUSH_SPACES_LENGTH: usize = 8192;

/// Encodes control messages for a fixed record width.
#[derive(Debug)]
pub struct ControlMessageEncoder {
    num_fields: usize,
    last_flush_id: u64,
}

impl ControlMessageEncoder {
    /// # Arguments
    /// * `num_fields` - width of a data record, including time and control fields
    pub fn new(num_fields: usize) -> Self {
        Self {
            num_fields: num_fields.max(1),
            last_flush_id: 0,
        }
    }

    /// Ask for interim results, optionally restricted to `[start, end)`.
    pub fn interim<W: Write>(
        &self,
        writer: &mut LengthEncodedWriter<W>,
        range: Option<(&str, &str)>,
    ) -> io::Result<()> {
        let message = match range {
            Some((start, end)) => format!("{}{} {}", INTERIM_MESSAGE_CODE, start, end),
            None => INTERIM_MESSAGE_CODE.to_string(),
        };
        self.write_message(writer, &message)
    }

    /// Reset buckets in `[start, end)`.
    pub fn reset_buckets<W: Write>(
        &self,
        writer: &mut LengthEncodedWriter<W>,
        start: &str,
        end: &str,
    ) -> io::Result<()> {
        self.write_message(writer, &format!("{}{} {}", RESET_BUCKETS_MESSAGE_CODE, start, end))
    }

    /// Write a flush request and return the id the acknowledgement will carry.
    pub fn flush<W: Write>(&mut self, writer: &mut LengthEncodedWriter<W>) -> io::Result<String> {
        self.last_flush_id += 1;
        let flush_id = self.last_flush_id.to_string();

        self.write_message(writer, &format!("{}{}", FLUSH_MESSAGE_CODE, flush_id))?;
        self.write_message(writer, &" ".repeat(FLUSH_SPACES_LENGTH))?;
        writer.flush()?;

        Ok(flush_id)
    }

    fn write_message<W: Write>(&self, writer: &mut LengthEncodedWriter<W>, message: &str) -> io::Result<()> {
        let mut fields = vec![""; self.num_fields];
        fields[self.num_fields - 1] = message;
        writer.write_record(&fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::LengthEncodedReader;

    fn decode(writer: LengthEncodedWriter<Vec<u8>>) -> Vec<Vec<String>> {
        let bytes = writer.into_inner();
        LengthEncodedReader::new(bytes.as_slice()).read_all().unwrap()
    }

    #[test]
    fn test_interim_without_range() {
        let encoder = ControlMessageEncoder::new(4);
        let mut writer = LengthEncodedWriter::new(Vec::new());
        encoder.interim(&mut writer, None).unwrap();

        assert_eq!(decode(writer), vec![vec!["", "", "", "i"]]);
    }

    #[test]
    fn test_interim_with_range() {
        let encoder = ControlMessageEncoder::new(3);
        let mut writer = LengthEncodedWriter::new(Vec::new());
        encoder.interim(&mut writer, Some(("1000", "2000"))).unwrap();

        assert_eq!(decode(writer), vec![vec!["", "", "i1000 2000"]]);
    }

    #[test]
    fn test_reset_buckets() {
        let encoder = ControlMessageEncoder::new(3);
        let mut writer = LengthEncodedWriter::new(Vec::new());
        encoder.reset_buckets(&mut writer, "0", "3600").unwrap();

        assert_eq!(decode(writer), vec![vec!["", "", "r0 3600"]]);
    }

    #[test]
    fn test_flush_ids_increase() {
        let mut encoder = ControlMessageEncoder::new(3);
        let mut writer = LengthEncodedWriter::new(Vec::new());

        assert_eq!(encoder.flush(&mut writer).unwrap(), "1");
        assert_eq!(encoder.flush(&mut writer).unwrap(), "2");

        let records = decode(writer);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], vec!["", "", "f1"]);
        assert_eq!(records[1][2].len(), FLUSH_SPACES_LENGTH);
        assert!(records[1][2].chars().all(|c| c == ' '));
        assert_eq!(records[1][0], "");
        assert_eq!(records[2], vec!["", "", "f2"]);
    }
}
