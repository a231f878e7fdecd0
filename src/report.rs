//! Reporting and persistence seams.
//!
//! A session only calls into these traits; where counts are stored and how
//! records are persisted is up to the implementation. Simple in-process
//! implementations are provided for the CLI and for tests.

use std::io::Write;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// Counters for one job or one `write` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCounts {
    pub input_bytes: u64,
    pub input_record_count: u64,
    pub input_field_count: u64,
    pub processed_record_count: u64,
    pub processed_field_count: u64,
    pub missing_field_count: u64,
    pub invalid_date_count: u64,
    pub out_of_order_count: u64,
    pub excluded_record_count: u64,
    pub malformed_record_count: u64,
    pub latest_record_time_ms: Option<i64>,
}

impl DataCounts {
    fn read_record(&mut self, input_field_count: usize) {
        self.input_record_count += 1;
        self.input_field_count += input_field_count as u64;
    }

    pub fn record_written(&mut self, input_field_count: usize, record_time_ms: i64) {
        self.read_record(input_field_count);
        self.processed_record_count += 1;
        self.processed_field_count += input_field_count as u64;
        self.latest_record_time_ms = Some(
            self.latest_record_time_ms
                .map_or(record_time_ms, |latest| latest.max(record_time_ms)),
        );
    }

    pub fn missing_fields(&mut self, missing_count: usize) {
        self.missing_field_count += missing_count as u64;
    }

    pub fn date_parse_error(&mut self, input_field_count: usize) {
        self.read_record(input_field_count);
        self.invalid_date_count += 1;
    }

    pub fn out_of_order(&mut self, input_field_count: usize) {
        self.read_record(input_field_count);
        self.out_of_order_count += 1;
    }

    pub fn excluded(&mut self, input_field_count: usize) {
        self.read_record(input_field_count);
        self.excluded_record_count += 1;
    }

    pub fn malformed(&mut self) {
        self.malformed_record_count += 1;
    }
}

/// Receives per-record outcomes.
///
/// Every call except [`StatusReporter::report_missing_fields`] accounts for
/// exactly one input record and is given the number of fields the reader
/// populated for it.
pub trait StatusReporter {
    fn report_record_written(&mut self, input_field_count: usize, record_time_ms: i64);
    /// Number of required raw fields absent from the record just read
    fn report_missing_fields(&mut self, missing_count: usize);
    fn report_date_parse_error(&mut self, input_field_count: usize);
    fn report_out_of_order_record(&mut self, input_field_count: usize);
    fn report_excluded_record(&mut self, input_field_count: usize);
    /// An input object that could not be parsed at all
    fn report_malformed_record(&mut self);
    fn report_bytes_read(&mut self, bytes: u64);
    /// Latest accepted record time from earlier sessions, if any
    fn latest_record_time_ms(&self) -> Option<i64>;
    fn finish_reporting(&mut self);
}

/// Status reporter that keeps running totals in memory.
#[derive(Debug, Default)]
pub struct CountingStatusReporter {
    counts: DataCounts,
    finished: usize,
}

impl CountingStatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from counts persisted by an earlier run.
    pub fn resume(counts: DataCounts) -> Self {
        Self { counts, finished: 0 }
    }

    pub fn counts(&self) -> &DataCounts {
        &self.counts
    }

    /// How many times `finish_reporting` has been called
    pub fn finish_count(&self) -> usize {
        self.finished
    }
}

impl StatusReporter for CountingStatusReporter {
    fn report_record_written(&mut self, input_field_count: usize, record_time_ms: i64) {
        self.counts.record_written(input_field_count, record_time_ms);
    }

    fn report_missing_fields(&mut self, missing_count: usize) {
        self.counts.missing_fields(missing_count);
    }

    fn report_date_parse_error(&mut self, input_field_count: usize) {
        self.counts.date_parse_error(input_field_count);
    }

    fn report_out_of_order_record(&mut self, input_field_count: usize) {
        self.counts.out_of_order(input_field_count);
    }

    fn report_excluded_record(&mut self, input_field_count: usize) {
        self.counts.excluded(input_field_count);
    }

    fn report_malformed_record(&mut self) {
        self.counts.malformed();
    }

    fn report_bytes_read(&mut self, bytes: u64) {
        self.counts.input_bytes += bytes;
    }

    fn latest_record_time_ms(&self) -> Option<i64> {
        self.counts.latest_record_time_ms
    }

    fn finish_reporting(&mut self) {
        self.finished += 1;
        tracing::info!(
            "{} records written, {} missing fields, {} invalid dates, {} out of order, {} excluded",
            self.counts.processed_record_count,
            self.counts.missing_field_count,
            self.counts.invalid_date_count,
            self.counts.out_of_order_count,
            self.counts.excluded_record_count
        );
    }
}

/// Receives raw read volumes, independent of what happened to the records.
pub trait UsageReporter {
    fn add_bytes_read(&mut self, bytes: u64);
    fn add_fields_read(&mut self, fields: usize);
    fn add_records_read(&mut self, records: usize);
    fn report_usage(&mut self);
}

/// Usage totals kept in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub bytes_read: u64,
    pub fields_read: u64,
    pub records_read: u64,
    pub reports: u64,
}

impl UsageReporter for UsageTotals {
    fn add_bytes_read(&mut self, bytes: u64) {
        self.bytes_read += bytes;
    }

    fn add_fields_read(&mut self, fields: usize) {
        self.fields_read += fields as u64;
    }

    fn add_records_read(&mut self, records: usize) {
        self.records_read += records as u64;
    }

    fn report_usage(&mut self) {
        self.reports += 1;
        tracing::debug!(
            "usage: {} bytes, {} fields, {} records",
            self.bytes_read,
            self.fields_read,
            self.records_read
        );
    }
}

/// Output positions of the fields each detector role refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMappings {
    /// Output header, time first and control field last
    pub field_names: Vec<String>,
    pub field_indexes: Vec<usize>,
    pub by_field_indexes: Vec<usize>,
    pub over_field_indexes: Vec<usize>,
    pub partition_field_indexes: Vec<usize>,
}

/// Durable storage for accepted records.
pub trait RecordPersister {
    /// Called once, before any record, after the output schema is known
    fn set_field_mappings(&mut self, mappings: FieldMappings);
    fn persist_record(&mut self, epoch_secs: i64, record: &[String]) -> Result<(), IngestError>;
    fn flush(&mut self) -> Result<(), IngestError>;
}

/// Persister that drops everything.
#[derive(Debug, Default)]
pub struct NoopPersister;

impl RecordPersister for NoopPersister {
    fn set_field_mappings(&mut self, _mappings: FieldMappings) {}

    fn persist_record(&mut self, _epoch_secs: i64, _record: &[String]) -> Result<(), IngestError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Persister that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    pub mappings: Option<FieldMappings>,
    pub records: Vec<(i64, Vec<String>)>,
    pub flushes: usize,
}

impl RecordPersister for MemoryPersister {
    fn set_field_mappings(&mut self, mappings: FieldMappings) {
        self.mappings = Some(mappings);
    }

    fn persist_record(&mut self, epoch_secs: i64, record: &[String]) -> Result<(), IngestError> {
        self.records.push((epoch_secs, record.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Persister writing one JSON object per accepted record (NDJSON).
///
/// Each line holds `epoch` plus the analysis fields keyed by name.
pub struct NdjsonPersister<W: Write> {
    writer: W,
    field_names: Vec<String>,
}

impl<W: Write> NdjsonPersister<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            field_names: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordPersister for NdjsonPersister<W> {
    fn set_field_mappings(&mut self, mappings: FieldMappings) {
        self.field_names = mappings.field_names;
    }

    fn persist_record(&mut self, epoch_secs: i64, record: &[String]) -> Result<(), IngestError> {
        let mut object = Map::new();
        object.insert("epoch".to_string(), Value::from(epoch_secs));

        // Skip the time field and the control field
        let last = self.field_names.len().saturating_sub(1);
        for (index, name) in self.field_names.iter().enumerate().take(last).skip(1) {
            let value = record.get(index).cloned().unwrap_or_default();
            object.insert(name.clone(), Value::String(value));
        }

        let json = serde_json::to_string(&object).map_err(|e| IngestError::Io(e.into()))?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_every_event_as_one_record() {
        let mut reporter = CountingStatusReporter::new();

        reporter.report_record_written(3, 2000);
        reporter.report_record_written(3, 1000);
        reporter.report_missing_fields(2);
        reporter.report_date_parse_error(3);
        reporter.report_out_of_order_record(2);
        reporter.report_excluded_record(3);
        reporter.report_malformed_record();
        reporter.report_bytes_read(64);
        reporter.finish_reporting();

        let counts = reporter.counts();
        assert_eq!(counts.input_record_count, 5);
        assert_eq!(counts.input_field_count, 14);
        assert_eq!(counts.processed_record_count, 2);
        assert_eq!(counts.processed_field_count, 6);
        assert_eq!(counts.missing_field_count, 2);
        assert_eq!(counts.invalid_date_count, 1);
        assert_eq!(counts.out_of_order_count, 1);
        assert_eq!(counts.excluded_record_count, 1);
        assert_eq!(counts.malformed_record_count, 1);
        assert_eq!(counts.input_bytes, 64);
        assert_eq!(reporter.latest_record_time_ms(), Some(2000));
        assert_eq!(reporter.finish_count(), 1);
    }

    #[test]
    fn test_resume_keeps_latest_time() {
        let reporter = CountingStatusReporter::resume(DataCounts {
            latest_record_time_ms: Some(5000),
            ..Default::default()
        });
        assert_eq!(reporter.latest_record_time_ms(), Some(5000));
    }

    #[test]
    fn test_usage_totals() {
        let mut usage = UsageTotals::default();
        usage.add_bytes_read(10);
        usage.add_fields_read(3);
        usage.add_records_read(1);
        usage.report_usage();

        assert_eq!(usage.bytes_read, 10);
        assert_eq!(usage.fields_read, 3);
        assert_eq!(usage.records_read, 1);
        assert_eq!(usage.reports, 1);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ndjson_persister_failure_is_io_error() {
        let mut persister = NdjsonPersister::new(BrokenPipe);
        persister.set_field_mappings(FieldMappings {
            field_names: vec!["time".to_string(), "value".to_string(), ".".to_string()],
            ..Default::default()
        });

        let record = vec!["1".to_string(), "2".to_string(), String::new()];
        let err = persister.persist_record(1, &record).unwrap_err();

        assert!(matches!(err, IngestError::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_ndjson_persister() {
        let mut persister = NdjsonPersister::new(Vec::new());
        persister.set_field_mappings(FieldMappings {
            field_names: vec!["time".to_string(), "airline".to_string(), "value".to_string(), ".".to_string()],
            ..Default::default()
        });

        let record = vec!["60".to_string(), "AAL".to_string(), "1.5".to_string(), String::new()];
        persister.persist_record(60, &record).unwrap();
        persister.flush().unwrap();

        let output = String::from_utf8(persister.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);

        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["epoch"], 60);
        assert_eq!(parsed["airline"], "AAL");
        assert_eq!(parsed["value"], "1.5");
        assert!(parsed.get("time").is_none());
        assert!(parsed.get(".").is_none());
    }
}
