//! Length-encoded record framing.
//!
//! A record is a big-endian `i32` field count followed by, for each field, a
//! big-endian `i32` byte length and the UTF-8 bytes.

use std::io::{self, Read, Write};

/// Writes length-encoded records.
///
/// Each record is assembled in memory and handed to the underlying writer in a
/// single `write_all`, so records never interleave.
pub struct LengthEncodedWriter<W: Write> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write> LengthEncodedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Write one record.
    pub fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        self.buffer.clear();
        put_length(&mut self.buffer, fields.len())?;
        for field in fields {
            let bytes = field.as_ref().as_bytes();
            put_length(&mut self.buffer, bytes.len())?;
            self.buffer.extend_from_slice(bytes);
        }
        self.writer.write_all(&self.buffer)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn put_length(buffer: &mut Vec<u8>, len: usize) -> io::Result<()> {
    let len = i32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("length {} does not fit in i32", len))
    })?;
    buffer.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Reads records written by [`LengthEncodedWriter`].
pub struct LengthEncodedReader<R: Read> {
    reader: R,
}

impl<R: Read> LengthEncodedReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Next record, or `None` at a clean end of stream.
    pub fn read_record(&mut self) -> io::Result<Option<Vec<String>>> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let count = get_length(len_bytes)?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            self.reader.read_exact(&mut len_bytes)?;
            let mut bytes = vec![0u8; get_length(len_bytes)?];
            self.reader.read_exact(&mut bytes)?;
            let field = String::from_utf8(bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            fields.push(field);
        }

        Ok(Some(fields))
    }

    /// Read every remaining record.
    pub fn read_all(&mut self) -> io::Result<Vec<Vec<String>>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn get_length(bytes: [u8; 4]) -> io::Result<usize> {
    usize::try_from(i32::from_be_bytes(bytes))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative length"))
}
