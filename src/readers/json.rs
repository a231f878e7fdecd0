//! Streams of JSON objects, flat or nested.
//!
//! Objects may be separated by whitespace or nothing at all. Nested members are
//! addressed with dotted names (`tags.tag2`). A single-element array stands for
//! its element; longer arrays are treated as absent.

use std::collections::VecDeque;
use std::io::BufRead;
use serde_json::{Map, Value};

use super::RecordReader;
use crate::error::IngestError;
use crate::schema::FieldSchema;

enum Scan {
    Object,
    Truncated,
    End,
}

/// Reads one record per top-level JSON object.
///
/// A brace-balanced object that does not parse is skipped as one error. An
/// object left open at end of input is rescanned from just past its opening
/// brace, so the next `{` is taken as a candidate record boundary.
pub struct JsonRecordReader<R: BufRead> {
    input: R,
    fields: FieldSchema,
    pending: VecDeque<u8>,
    object: Vec<u8>,
    max_consecutive_errors: usize,
    consecutive_errors: usize,
    malformed: usize,
    resyncing: bool,
}

impl<R: BufRead> JsonRecordReader<R> {
    /// # Arguments
    /// * `input` - buffered JSON byte stream
    /// * `fields` - raw schema; only these dotted names are extracted
    /// * `max_consecutive_errors` - parse errors in a row before giving up
    pub fn new(input: R, fields: FieldSchema, max_consecutive_errors: usize) -> Self {
        Self {
            input,
            fields,
            pending: VecDeque::new(),
            object: Vec::new(),
            max_consecutive_errors: max_consecutive_errors.max(1),
            consecutive_errors: 0,
            malformed: 0,
            resyncing: false,
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, IngestError> {
        if let Some(b) = self.pending.pop_front() {
            return Ok(Some(b));
        }
        let buf = self.input.fill_buf()?;
        let Some(&b) = buf.first() else {
            return Ok(None);
        };
        self.input.consume(1);
        Ok(Some(b))
    }

    /// Collect the next brace-balanced object into `self.object`.
    /// The flag reports whether non-whitespace was skipped to find it.
    fn scan_object(&mut self) -> Result<(Scan, bool), IngestError> {
        self.object.clear();
        let mut skipped = false;

        loop {
            match self.next_byte()? {
                None => return Ok((Scan::End, skipped)),
                Some(b'{') => break,
                Some(b) if b.is_ascii_whitespace() => {}
                Some(_) => skipped = true,
            }
        }

        self.object.push(b'{');
        let mut depth = 1usize;
        let mut in_string = false;
        let mut escaped = false;

        while let Some(b) = self.next_byte()? {
            self.object.push(b);
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((Scan::Object, skipped));
                    }
                }
                _ => {}
            }
        }

        Ok((Scan::Truncated, skipped))
    }

    /// Put back everything after the opening brace of an unterminated object.
    /// Content skipped while rescanning it belongs to the same error.
    fn resync(&mut self) {
        for &b in self.object[1..].iter().rev() {
            self.pending.push_front(b);
        }
        self.resyncing = true;
    }

    fn parse_error(&mut self, reason: &str) -> Result<(), IngestError> {
        self.consecutive_errors += 1;
        self.malformed += 1;
        tracing::warn!("Skipping malformed JSON ({}): {}", self.consecutive_errors, reason);

        if self.consecutive_errors >= self.max_consecutive_errors {
            tracing::error!("{} consecutive JSON parse errors, aborting", self.consecutive_errors);
            return Err(IngestError::TooManyParseErrors {
                consecutive: self.consecutive_errors,
            });
        }
        Ok(())
    }

    fn visit(&self, prefix: &str, map: &Map<String, Value>, record: &mut [String], got_fields: &mut [bool]) -> usize {
        let mut populated = 0;
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            populated += self.assign(&path, value, record, got_fields);
        }
        populated
    }

    fn assign(&self, path: &str, value: &Value, record: &mut [String], got_fields: &mut [bool]) -> usize {
        match value {
            Value::Object(inner) => self.visit(path, inner, record, got_fields),
            Value::Array(items) if items.len() == 1 => self.assign(path, &items[0], record, got_fields),
            Value::Array(_) => 0,
            scalar => match self.fields.index_of(path) {
                Some(index) if !got_fields[index] => {
                    record[index] = scalar_text(scalar);
                    got_fields[index] = true;
                    1
                }
                _ => 0,
            },
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<R: BufRead> RecordReader for JsonRecordReader<R> {
    fn read(&mut self, record: &mut [String], got_fields: &mut [bool]) -> Result<Option<usize>, IngestError> {
        loop {
            let (scan, skipped) = self.scan_object()?;
            let resyncing = std::mem::take(&mut self.resyncing);
            if skipped && !resyncing {
                self.parse_error("unexpected content between objects")?;
            }

            match scan {
                Scan::End => return Ok(None),
                Scan::Truncated => {
                    self.parse_error("unterminated object")?;
                    self.resync();
                }
                // A balanced object that fails to parse is dropped whole
                Scan::Object => match serde_json::from_slice::<Value>(&self.object) {
                    Ok(Value::Object(map)) => {
                        self.consecutive_errors = 0;
                        return Ok(Some(self.visit("", &map, record, got_fields)));
                    }
                    Ok(_) => self.parse_error("not an object")?,
                    Err(e) => self.parse_error(&e.to_string())?,
                },
            }
        }
    }

    fn take_malformed_count(&mut self) -> usize {
        std::mem::take(&mut self.malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader<'a>(input: &'a str, fields: &[&str], max_errors: usize) -> JsonRecordReader<&'a [u8]> {
        JsonRecordReader::new(input.as_bytes(), FieldSchema::from_names(fields.iter().copied()), max_errors)
    }

    fn next(reader: &mut JsonRecordReader<&[u8]>, width: usize) -> Option<(Vec<String>, Vec<bool>, usize)> {
        let mut record = vec![String::new(); width];
        let mut got = vec![false; width];
        reader
            .read(&mut record, &mut got)
            .unwrap()
            .map(|n| (record, got, n))
    }

    #[test]
    fn test_concatenated_objects() {
        let mut r = reader(r#"{"time":1,"value":"a"}{"time":2,"value":"b"}  {"time":3}"#, &["time", "value"], 10);

        assert_eq!(next(&mut r, 2).unwrap().0, vec!["1", "a"]);
        assert_eq!(next(&mut r, 2).unwrap().0, vec!["2", "b"]);

        let (record, got, n) = next(&mut r, 2).unwrap();
        assert_eq!(record, vec!["3", ""]);
        assert_eq!(got, vec![true, false]);
        assert_eq!(n, 1);

        assert!(next(&mut r, 2).is_none());
    }

    #[test]
    fn test_nested_dotted_names() {
        let input = r#"{"time":"1","tags":{"tag1":{"key1":"x","key2":"z"},"tag2":"y"},"value":12345.678}"#;
        let mut r = reader(input, &["tags.tag1.key1", "tags.tag2", "time", "value"], 10);

        let (record, _, n) = next(&mut r, 4).unwrap();
        assert_eq!(record, vec!["x", "y", "1", "12345.678"]);
        assert_eq!(n, 4);
    }

    #[test]
    fn test_arrays() {
        let input = r#"{"time":1,"one":["solo"],"many":["a","b"],"nested":[{"k":"v"}]}"#;
        let mut r = reader(input, &["many", "nested.k", "one", "time"], 10);

        let (record, got, _) = next(&mut r, 4).unwrap();
        assert_eq!(record, vec!["", "v", "solo", "1"]);
        assert_eq!(got, vec![false, true, true, true]);
    }

    #[test]
    fn test_scalars() {
        let mut r = reader(r#"{"b":true,"n":null,"s":"with \"quotes\" and }"}"#, &["b", "n", "s"], 10);

        let (record, got, _) = next(&mut r, 3).unwrap();
        assert_eq!(record, vec!["true", "", "with \"quotes\" and }"]);
        assert_eq!(got, vec![true, true, true]);
    }

    #[test]
    fn test_recovers_from_malformed_object() {
        let input = r#"{"time":1,"value":}{"time":2,"value":"ok"}"#;
        let mut r = reader(input, &["time", "value"], 10);

        assert_eq!(next(&mut r, 2).unwrap().0, vec!["2", "ok"]);
        assert_eq!(r.take_malformed_count(), 1);
        assert_eq!(r.take_malformed_count(), 0);
        assert!(next(&mut r, 2).is_none());
    }

    #[test]
    fn test_recovers_from_unbalanced_object() {
        let input = r#"{"time":1,"value":"x" {"time":2,"value":"y"}"#;
        let mut r = reader(input, &["time", "value"], 10);

        assert_eq!(next(&mut r, 2).unwrap().0, vec!["2", "y"]);
        assert!(next(&mut r, 2).is_none());
    }

    #[test]
    fn test_bad_object_with_nested_objects_dropped_whole() {
        let input = r#"{"bad": , "inner":{"time":5,"value":9}}{"time":6,"value":1}"#;
        let mut r = reader(input, &["time", "value"], 10);

        assert_eq!(next(&mut r, 2).unwrap().0, vec!["6", "1"]);
        assert!(next(&mut r, 2).is_none());
        assert_eq!(r.take_malformed_count(), 1);
    }

    #[test]
    fn test_deeply_nested_bad_object_yields_nothing() {
        let mut r = reader(r#"{"a":{"b":{"c":{"d":1}}}, oops}"#, &["a.b.c.d"], 2);

        assert!(next(&mut r, 1).is_none());
        assert_eq!(r.take_malformed_count(), 1);
    }

    #[test]
    fn test_unterminated_object_rescanned_from_inside() {
        let input = r#"{"time":1,"value":"x", "next": {"time":2,"value":"y"}"#;
        let mut r = reader(input, &["time", "value"], 10);

        assert_eq!(next(&mut r, 2).unwrap().0, vec!["2", "y"]);
        assert!(next(&mut r, 2).is_none());
        assert_eq!(r.take_malformed_count(), 1);
    }

    #[test]
    fn test_consecutive_error_ceiling() {
        let input = "{bad}{bad}{bad}{\"time\":1}";
        let mut r = reader(input, &["time"], 3);

        let mut record = vec![String::new(); 1];
        let mut got = vec![false; 1];
        let err = r.read(&mut record, &mut got).unwrap_err();
        assert!(matches!(err, IngestError::TooManyParseErrors { consecutive: 3 }));
    }

    #[test]
    fn test_success_resets_error_run() {
        let input = "{bad}{\"time\":1}{bad}{\"time\":2}";
        let mut r = reader(input, &["time"], 2);

        assert_eq!(next(&mut r, 1).unwrap().0, vec!["1"]);
        assert_eq!(next(&mut r, 1).unwrap().0, vec!["2"]);
        assert_eq!(r.take_malformed_count(), 2);
    }
}
