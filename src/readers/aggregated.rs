//! Time-bucketed search aggregation results.
//!
//! Input is one or more JSON documents of the form
//!
//! ```text
//! {"aggregations": {"time_level": {"buckets": [
//!     {"key": 1449619200000, "doc_count": 10,
//!      "airline_level": {"buckets": [
//!          {"key": "AAL", "doc_count": 4, "responsetime": {"value": 132.5}}]}}]}}}
//! ```
//!
//! Each nesting level is the child aggregation named after that level's field,
//! or failing that the first child holding a `buckets` array. Every leaf bucket
//! becomes one record: the bucket keys along its path, its `doc_count` and each
//! metric sub-object's `value`.

use std::collections::VecDeque;
use std::io::Read;
use serde_json::de::IoRead;
use serde_json::{Map, StreamDeserializer, Value};

use super::RecordReader;
use crate::error::IngestError;
use crate::schema::FieldSchema;

const DOC_COUNT: &str = "doc_count";

pub struct AggregatedRecordReader<R: Read> {
    documents: StreamDeserializer<'static, IoRead<R>, Value>,
    fields: FieldSchema,
    nesting_order: Vec<String>,
    pending: VecDeque<Vec<(usize, String)>>,
}

impl<R: Read> AggregatedRecordReader<R> {
    /// # Errors
    /// `EmptyNestingOrder` if `nesting_order` is empty.
    pub fn new(input: R, fields: FieldSchema, nesting_order: Vec<String>) -> Result<Self, IngestError> {
        if nesting_order.is_empty() {
            return Err(IngestError::EmptyNestingOrder);
        }

        Ok(Self {
            documents: serde_json::Deserializer::from_reader(input).into_iter::<Value>(),
            fields,
            nesting_order,
            pending: VecDeque::new(),
        })
    }

    fn flatten_document(&mut self, document: &Value) -> Result<(), IngestError> {
        let root = document.get("aggregations").unwrap_or(document);
        let root = root
            .as_object()
            .ok_or_else(|| IngestError::MalformedInput("aggregation result is not an object".to_string()))?;

        if let Some(buckets) = child_buckets(root, &self.nesting_order[0]) {
            let mut keys = Vec::with_capacity(self.nesting_order.len());
            self.walk(0, buckets, &mut keys);
        }
        Ok(())
    }

    fn walk(&mut self, level: usize, buckets: &[Value], keys: &mut Vec<String>) {
        for bucket in buckets {
            let Some(bucket) = bucket.as_object() else {
                continue;
            };
            keys.push(bucket.get("key").map(value_text).unwrap_or_default());

            if level + 1 < self.nesting_order.len() {
                if let Some(children) = child_buckets(bucket, &self.nesting_order[level + 1]) {
                    self.walk(level + 1, children, keys);
                }
            } else {
                let leaf = self.leaf_record(bucket, keys);
                self.pending.push_back(leaf);
            }

            keys.pop();
        }
    }

    fn leaf_record(&self, bucket: &Map<String, Value>, keys: &[String]) -> Vec<(usize, String)> {
        let mut assignments = Vec::new();

        for (name, key) in self.nesting_order.iter().zip(keys) {
            if let Some(index) = self.fields.index_of(name) {
                assignments.push((index, key.clone()));
            }
        }

        if let (Some(index), Some(count)) = (self.fields.index_of(DOC_COUNT), bucket.get(DOC_COUNT)) {
            assignments.push((index, value_text(count)));
        }

        for (name, metric) in bucket {
            let Some(value) = metric.as_object().and_then(|m| m.get("value")) else {
                continue;
            };
            if let Some(index) = self.fields.index_of(name) {
                assignments.push((index, value_text(value)));
            }
        }

        assignments
    }
}

/// The `buckets` array of the child aggregation called `name`, else of the
/// first child aggregation.
fn child_buckets<'v>(object: &'v Map<String, Value>, name: &str) -> Option<&'v [Value]> {
    let buckets = |v: &'v Value| v.get("buckets").and_then(Value::as_array);

    object
        .get(name)
        .and_then(buckets)
        .or_else(|| object.values().find_map(buckets))
        .map(Vec::as_slice)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<R: Read> RecordReader for AggregatedRecordReader<R> {
    fn read(&mut self, record: &mut [String], got_fields: &mut [bool]) -> Result<Option<usize>, IngestError> {
        loop {
            if let Some(assignments) = self.pending.pop_front() {
                let mut populated = 0;
                for (index, value) in assignments {
                    if index < record.len() && !got_fields[index] {
                        record[index] = value;
                        got_fields[index] = true;
                        populated += 1;
                    }
                }
                return Ok(Some(populated));
            }

            match self.documents.next() {
                None => return Ok(None),
                Some(Ok(document)) => self.flatten_document(&document)?,
                Some(Err(e)) if e.is_io() => {
                    return Err(IngestError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
                }
                Some(Err(e)) => {
                    return Err(IngestError::MalformedInput(format!("aggregation result: {}", e)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn airline_document() -> String {
        let leaf = |airline: &str, count: u64, rt: f64| {
            json!({"key": airline, "doc_count": count, "responsetime": {"value": rt}})
        };
        let sourcetype = |name: &str, offset: f64| {
            json!({"key": name, "doc_count": 5, "airline": {"buckets": [
                leaf("AAL", 2, 100.0 + offset),
                leaf("JZA", 3, 200.0 + offset),
            ]}})
        };
        let time_bucket = |key: u64| {
            json!({"key": key, "doc_count": 10, "sourcetype": {"buckets": [
                sourcetype("farequote", 0.5),
                sourcetype("farequote2", 1.5),
            ]}})
        };

        json!({"took": 3, "aggregations": {"time_level": {"buckets": [
            time_bucket(1449619200000),
            time_bucket(1449619260000),
        ]}}})
        .to_string()
    }

    fn collect(reader: &mut AggregatedRecordReader<&[u8]>, width: usize) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        loop {
            let mut record = vec![String::new(); width];
            let mut got = vec![false; width];
            match reader.read(&mut record, &mut got).unwrap() {
                Some(_) => records.push(record),
                None => return records,
            }
        }
    }

    #[test]
    fn test_cartesian_product_of_levels() {
        let input = airline_document();
        let fields = FieldSchema::from_names(["airline", "doc_count", "responsetime", "sourcetype", "time"]);
        let nesting = vec!["time".to_string(), "sourcetype".to_string(), "airline".to_string()];
        let mut reader = AggregatedRecordReader::new(input.as_bytes(), fields, nesting).unwrap();

        let records = collect(&mut reader, 5);

        assert_eq!(records.len(), 8);
        assert_eq!(records[0], vec!["AAL", "2", "100.5", "farequote", "1449619200000"]);
        assert_eq!(records[1], vec!["JZA", "3", "200.5", "farequote", "1449619200000"]);
        assert_eq!(records[3], vec!["JZA", "3", "201.5", "farequote2", "1449619200000"]);
        assert_eq!(records[7], vec!["JZA", "3", "201.5", "farequote2", "1449619260000"]);
    }

    #[test]
    fn test_shallower_nesting_uses_intermediate_leaves() {
        let input = airline_document();
        let fields = FieldSchema::from_names(["doc_count", "time"]);
        let nesting = vec!["time".to_string()];
        let mut reader = AggregatedRecordReader::new(input.as_bytes(), fields, nesting).unwrap();

        let records = collect(&mut reader, 2);

        assert_eq!(records, vec![vec!["10", "1449619200000"], vec!["10", "1449619260000"]]);
    }

    #[test]
    fn test_level_chosen_by_name_over_sibling() {
        let input = json!({"aggregations": {"time": {"buckets": [
            {"key": 60000, "doc_count": 3,
             "a_sibling": {"buckets": [{"key": "wrong", "doc_count": 1}]},
             "airline": {"buckets": [{"key": "AAL", "doc_count": 2}]}}
        ]}}})
        .to_string();
        let fields = FieldSchema::from_names(["airline", "doc_count", "time"]);
        let nesting = vec!["time".to_string(), "airline".to_string()];
        let mut reader = AggregatedRecordReader::new(input.as_bytes(), fields, nesting).unwrap();

        let records = collect(&mut reader, 3);

        assert_eq!(records, vec![vec!["AAL", "2", "60000"]]);
    }

    #[test]
    fn test_empty_nesting_order() {
        let result = AggregatedRecordReader::new("{}".as_bytes(), FieldSchema::new(), vec![]);
        assert!(matches!(result, Err(IngestError::EmptyNestingOrder)));
    }

    #[test]
    fn test_no_buckets_means_no_records() {
        let fields = FieldSchema::from_names(["time"]);
        let mut reader =
            AggregatedRecordReader::new(r#"{"aggregations":{}}"#.as_bytes(), fields, vec!["time".to_string()]).unwrap();

        assert!(collect(&mut reader, 1).is_empty());
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        let fields = FieldSchema::from_names(["time"]);
        let mut reader =
            AggregatedRecordReader::new(r#"{"aggregations": "#.as_bytes(), fields, vec!["time".to_string()]).unwrap();

        let mut record = vec![String::new()];
        let mut got = vec![false];
        assert!(matches!(
            reader.read(&mut record, &mut got),
            Err(IngestError::MalformedInput(_))
        ));
    }
}
