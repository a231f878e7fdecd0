//! Ingestion sessions.
//!
//! A session owns the output stream for one job. Each [`IngestionSession::write`]
//! call reads one input stream to the end: records are read, transformed, gated
//! on lateness and written in arrival order. Control messages go to the same
//! stream between writes.

use std::io::{BufReader, Read, Write};
use uuid::Uuid;

use crate::compiler::{PlanCompiler, TransformPlan};
use crate::config::{DataFormat, JobConfig, SessionOptions};
use crate::engine::{RecordEngine, RecordOutcome};
use crate::error::IngestError;
use crate::gate::LatenessGate;
use crate::readers::{
    AggregatedRecordReader, ByteCounter, CountingReader, DelimitedRecordReader, JsonRecordReader,
    RecordReader, SingleLineRecordReader, SINGLE_LINE_FIELD,
};
use crate::report::{DataCounts, FieldMappings, RecordPersister, StatusReporter, UsageReporter};
use crate::schema::FieldSchema;
use crate::time::TimeFormat;
use crate::wire::{ControlMessageEncoder, LengthEncodedWriter};

/// Collaborators a session reports to. The caller keeps ownership.
pub struct Reporters<'a> {
    pub status: &'a mut dyn StatusReporter,
    pub usage: &'a mut dyn UsageReporter,
    pub persister: &'a mut dyn RecordPersister,
}

/// One job's ingestion state: compiled configuration, watermark and output stream.
pub struct IngestionSession<'a, W: Write> {
    id: Uuid,
    config: JobConfig,
    options: SessionOptions,
    compiler: PlanCompiler,
    time_format: TimeFormat,
    gate: LatenessGate,
    writer: LengthEncodedWriter<W>,
    control: ControlMessageEncoder,
    reporters: Reporters<'a>,
    header_written: bool,
}

impl<'a, W: Write> IngestionSession<'a, W> {
    /// Validate `config` and prepare a session writing to `output`.
    ///
    /// The watermark starts from the status reporter's latest record time, so a
    /// resumed job keeps rejecting records older than what it already accepted.
    pub fn new(
        config: JobConfig,
        options: SessionOptions,
        output: W,
        reporters: Reporters<'a>,
    ) -> Result<Self, IngestError> {
        config.validate()?;

        let compiler = PlanCompiler::new(
            config.analysis_config.analysis_fields(),
            config.data_description.time_field.clone(),
            config.transform_specs()?,
        );
        let time_format = TimeFormat::parse(&config.data_description.time_format)?;
        let control = ControlMessageEncoder::new(compiler.output_schema().len());

        let resume_from = reporters
            .status
            .latest_record_time_ms()
            .map(|ms| ms.div_euclid(1000));
        let gate = LatenessGate::new(config.analysis_config.latency).with_watermark(resume_from);

        Ok(Self {
            id: Uuid::new_v4(),
            config,
            options,
            compiler,
            time_format,
            gate,
            writer: LengthEncodedWriter::new(output),
            control,
            reporters,
            header_written: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Output header the session writes: time, analysis fields, control field.
    pub fn output_header(&self) -> Vec<String> {
        self.compiler.output_schema().names().map(str::to_string).collect()
    }

    /// Raw fields expected from formats without a header row.
    pub fn required_input_fields(&self) -> Vec<String> {
        self.compiler.required_input_fields()
    }

    pub fn watermark(&self) -> Option<i64> {
        self.gate.watermark()
    }

    /// Read `input` to the end and write every accepted record.
    ///
    /// # Returns
    /// Counts for this call only. Reporters receive the same events as they happen.
    ///
    /// # Errors
    /// Any fatal [`IngestError`]; reporters are still finalized first.
    pub fn write<R: Read>(&mut self, input: R) -> Result<DataCounts, IngestError> {
        let span = tracing::info_span!("ingest", session = %self.id);
        let _enter = span.enter();

        tracing::info!("Starting {:?} ingestion", self.config.data_description.format);

        let counter = ByteCounter::default();
        let input = CountingReader::new(input, counter.clone());
        let mut counts = DataCounts::default();

        let outcome = self.read_all(input, &mut counts);
        let finished = self.finish(counter.get(), &mut counts);

        if let Err(e) = &outcome {
            tracing::error!("Ingestion aborted: {}", e);
        }
        outcome?;
        finished?;

        tracing::info!(
            "Finished ingestion: {} of {} records written ({} bytes)",
            counts.processed_record_count,
            counts.input_record_count,
            counts.input_bytes
        );
        Ok(counts)
    }

    /// Request interim results, optionally for `[start, end)`.
    pub fn interim(&mut self, range: Option<(&str, &str)>) -> Result<(), IngestError> {
        self.control.interim(&mut self.writer, range)?;
        Ok(())
    }

    /// Request a bucket reset for `[start, end)`.
    pub fn reset_buckets(&mut self, start: &str, end: &str) -> Result<(), IngestError> {
        self.control.reset_buckets(&mut self.writer, start, end)?;
        Ok(())
    }

    /// Request a flush; returns the id the acknowledgement will carry.
    pub fn flush(&mut self) -> Result<String, IngestError> {
        let flush_id = self.control.flush(&mut self.writer)?;
        tracing::debug!("Sent flush {}", flush_id);
        Ok(flush_id)
    }

    pub fn into_output(self) -> W {
        self.writer.into_inner()
    }

    fn read_all<R: Read>(&mut self, input: R, counts: &mut DataCounts) -> Result<(), IngestError> {
        let description = self.config.data_description.clone();

        match description.format {
            DataFormat::Delimited => {
                let mut reader = DelimitedRecordReader::new(
                    input,
                    description.field_delimiter as u8,
                    description.quote_character as u8,
                    self.options.max_quoted_lines,
                );
                let header = reader.header()?;
                if header.is_empty() {
                    tracing::info!("Empty input, nothing to do");
                    return Ok(());
                }
                let plan = self.compiler.compile(&header)?;
                self.run(&plan, &mut reader, counts)
            }
            DataFormat::Json => {
                let plan = self.compiler.compile(&self.compiler.required_input_fields())?;
                let mut reader = JsonRecordReader::new(
                    BufReader::new(input),
                    plan.input_schema.clone(),
                    self.options.max_consecutive_json_errors,
                );
                self.run(&plan, &mut reader, counts)
            }
            DataFormat::Aggregated => {
                let plan = self.compiler.compile(&self.compiler.required_input_fields())?;
                let mut reader = AggregatedRecordReader::new(
                    input,
                    plan.input_schema.clone(),
                    description.nesting_order.clone(),
                )?;
                self.run(&plan, &mut reader, counts)
            }
            DataFormat::SingleLine => {
                let plan = self.compiler.compile(&[SINGLE_LINE_FIELD.to_string()])?;
                let mut reader = SingleLineRecordReader::new(BufReader::new(input));
                self.run(&plan, &mut reader, counts)
            }
        }
    }

    fn run<Rd: RecordReader>(
        &mut self,
        plan: &TransformPlan,
        reader: &mut Rd,
        counts: &mut DataCounts,
    ) -> Result<(), IngestError> {
        self.write_header(plan)?;

        let mut raw = vec![String::new(); plan.input_schema.len()];
        let mut got_fields = vec![false; plan.input_schema.len()];
        let mut output = vec![String::new(); plan.output_len()];
        let mut engine = RecordEngine::new(plan, self.time_format.clone());

        loop {
            for value in raw.iter_mut() {
                value.clear();
            }
            got_fields.fill(false);

            let next = reader.read(&mut raw, &mut got_fields);
            for _ in 0..reader.take_malformed_count() {
                counts.malformed();
                self.reporters.status.report_malformed_record();
            }
            let Some(populated) = next? else {
                break;
            };

            self.reporters.usage.add_records_read(1);
            self.reporters.usage.add_fields_read(populated);

            let missing = plan.count_missing(&got_fields);
            if missing > 0 {
                tracing::debug!("Record is missing {} required field(s)", missing);
                counts.missing_fields(missing);
                self.reporters.status.report_missing_fields(missing);
            }

            match engine.process(&raw, &got_fields, &mut output) {
                RecordOutcome::Ready { epoch_secs } => {
                    if self.gate.admit(epoch_secs) {
                        self.writer.write_record(&output)?;
                        self.reporters.persister.persist_record(epoch_secs, &output)?;

                        let time_ms = epoch_secs.saturating_mul(1000);
                        counts.record_written(populated, time_ms);
                        self.reporters.status.report_record_written(populated, time_ms);
                    } else {
                        tracing::debug!(
                            "Dropping record at {}: older than watermark {:?} minus latency",
                            epoch_secs,
                            self.gate.watermark()
                        );
                        counts.out_of_order(populated);
                        self.reporters.status.report_out_of_order_record(populated);
                    }
                }
                RecordOutcome::Excluded => {
                    counts.excluded(populated);
                    self.reporters.status.report_excluded_record(populated);
                }
                RecordOutcome::BadTimestamp => {
                    tracing::debug!("Cannot parse time field '{}'", self.config.data_description.time_field);
                    counts.date_parse_error(populated);
                    self.reporters.status.report_date_parse_error(populated);
                }
            }
        }

        Ok(())
    }

    fn write_header(&mut self, plan: &TransformPlan) -> Result<(), IngestError> {
        if self.header_written {
            return Ok(());
        }

        let header: Vec<&str> = plan.output_schema.names().collect();
        self.writer.write_record(&header)?;
        self.header_written = true;
        tracing::info!("Output header: {:?}", header);

        let mappings = self.field_mappings(&plan.output_schema);
        self.reporters.persister.set_field_mappings(mappings);
        Ok(())
    }

    fn field_mappings(&self, output_schema: &FieldSchema) -> FieldMappings {
        let detectors = &self.config.analysis_config.detectors;

        FieldMappings {
            field_names: output_schema.names().map(str::to_string).collect(),
            field_indexes: output_indexes(output_schema, detectors.iter().filter_map(|d| d.field_name.as_ref())),
            by_field_indexes: output_indexes(output_schema, detectors.iter().filter_map(|d| d.by_field_name.as_ref())),
            over_field_indexes: output_indexes(
                output_schema,
                detectors.iter().filter_map(|d| d.over_field_name.as_ref()),
            ),
            partition_field_indexes: output_indexes(
                output_schema,
                detectors.iter().filter_map(|d| d.partition_field_name.as_ref()),
            ),
        }
    }

    fn finish(&mut self, bytes: u64, counts: &mut DataCounts) -> Result<(), IngestError> {
        counts.input_bytes = bytes;
        self.reporters.status.report_bytes_read(bytes);
        self.reporters.usage.add_bytes_read(bytes);

        let persisted = self.reporters.persister.flush();
        let flushed = self.writer.flush();

        self.reporters.status.finish_reporting();
        self.reporters.usage.report_usage();

        persisted?;
        flushed?;
        Ok(())
    }
}

/// Output positions of `names`, first occurrence order, without duplicates.
fn output_indexes<'n>(output_schema: &FieldSchema, names: impl Iterator<Item = &'n String>) -> Vec<usize> {
    let mut found = Vec::new();
    for index in names.filter_map(|name| output_schema.index_of(name)) {
        if !found.contains(&index) {
            found.push(index);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, DataDescription, Detector, TransformConfig};
    use crate::report::{CountingStatusReporter, MemoryPersister, UsageTotals};
    use crate::transform::{Condition, Operator};
    use crate::wire::LengthEncodedReader;

    fn job(detectors: Vec<Detector>, latency: u64) -> JobConfig {
        JobConfig {
            data_description: DataDescription::default(),
            analysis_config: AnalysisConfig {
                detectors,
                latency,
                ..Default::default()
            },
            transforms: vec![],
        }
    }

    struct Harness {
        status: CountingStatusReporter,
        usage: UsageTotals,
        persister: MemoryPersister,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                status: CountingStatusReporter::new(),
                usage: UsageTotals::default(),
                persister: MemoryPersister::default(),
            }
        }

        fn write(&mut self, config: JobConfig, input: &str) -> Result<(DataCounts, Vec<Vec<String>>), IngestError> {
            let reporters = Reporters {
                status: &mut self.status,
                usage: &mut self.usage,
                persister: &mut self.persister,
            };
            let mut session = IngestionSession::new(config, SessionOptions::default(), Vec::new(), reporters)?;
            let counts = session.write(input.as_bytes())?;
            let bytes = session.into_output();
            let records = LengthEncodedReader::new(bytes.as_slice()).read_all()?;
            Ok((counts, records))
        }
    }

    #[test]
    fn test_plain_csv() {
        let mut harness = Harness::new();
        let (counts, records) = harness
            .write(job(vec![Detector::on_field("value")], 0), "time,metric,value\n1,foo,1.0\n2,bar,2.0\n")
            .unwrap();

        assert_eq!(records, vec![
            vec!["time", "value", "."],
            vec!["1", "1.0", ""],
            vec!["2", "2.0", ""],
        ]);
        assert_eq!(counts.processed_record_count, 2);
        assert_eq!(counts.input_field_count, 6);
        assert_eq!(counts.missing_field_count, 0);
        assert_eq!(counts.input_bytes, 38);
        assert_eq!(harness.status.counts().latest_record_time_ms, Some(2000));
        assert_eq!(harness.usage.records_read, 2);
        assert_eq!(harness.persister.records.len(), 2);
        assert_eq!(harness.persister.flushes, 1);
        assert_eq!(harness.status.finish_count(), 1);
    }

    #[test]
    fn test_missing_fields_counted_and_written_blank() {
        let mut harness = Harness::new();
        let detectors = vec![Detector {
            field_name: Some("value".to_string()),
            by_field_name: Some("metric".to_string()),
            ..Default::default()
        }];
        let (counts, records) = harness
            .write(job(detectors, 0), "time,metric,value\n1,foo,1.0\n2\n")
            .unwrap();

        assert_eq!(records[2], vec!["2", "", "", ""]);
        assert_eq!(counts.missing_field_count, 2);
        assert_eq!(counts.processed_record_count, 2);
    }

    #[test]
    fn test_missing_time_field_is_fatal() {
        let mut harness = Harness::new();
        let err = harness
            .write(job(vec![Detector::on_field("value")], 0), "metric,value\nfoo,1.0\n")
            .unwrap_err();

        assert!(matches!(err, IngestError::MissingField { ref field } if field == "time"));
        assert_eq!(harness.status.finish_count(), 1);
    }

    #[test]
    fn test_bad_dates_dropped() {
        let mut harness = Harness::new();
        let (counts, records) = harness
            .write(job(vec![Detector::on_field("value")], 0), "time,value\n1,a\nnot-a-date,b\n3,c\n")
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(counts.invalid_date_count, 1);
        assert_eq!(counts.input_record_count, 3);
    }

    #[test]
    fn test_watermark_resumes_from_reporter() {
        let mut harness = Harness::new();
        harness.status = CountingStatusReporter::resume(DataCounts {
            latest_record_time_ms: Some(5000),
            ..Default::default()
        });

        let (counts, records) = harness
            .write(job(vec![Detector::on_field("value")], 0), "time,value\n1,a\n2,b\n5,c\n6,d\n")
            .unwrap();

        assert_eq!(counts.out_of_order_count, 2);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["5", "c", ""]);
    }

    #[test]
    fn test_exclude_reported() {
        let mut harness = Harness::new();
        let mut config = job(vec![Detector::on_field("value")], 0);
        config.transforms.push(
            TransformConfig::new("exclude", &["metric"], &[])
                .with_condition(Condition::new(Operator::Match, "metricA")),
        );

        let (counts, records) = harness
            .write(config, "time,metric,value\n1,metricA,1\n2,metricB,2\n")
            .unwrap();

        assert_eq!(records, vec![vec!["time", "value", "."], vec!["2", "2", ""]]);
        assert_eq!(counts.excluded_record_count, 1);
        assert_eq!(harness.status.counts().excluded_record_count, 1);
    }

    #[test]
    fn test_field_mappings_sent_to_persister() {
        let mut harness = Harness::new();
        let detectors = vec![
            Detector {
                field_name: Some("responsetime".to_string()),
                by_field_name: Some("airline".to_string()),
                ..Default::default()
            },
            Detector {
                field_name: Some("responsetime".to_string()),
                over_field_name: Some("host".to_string()),
                partition_field_name: Some("dc".to_string()),
                ..Default::default()
            },
        ];
        harness
            .write(job(detectors, 0), "time,airline,host,dc,responsetime\n1,AAL,h1,eu,5\n")
            .unwrap();

        let mappings = harness.persister.mappings.clone().unwrap();
        assert_eq!(mappings.field_names, vec!["time", "airline", "dc", "host", "responsetime", "."]);
        assert_eq!(mappings.field_indexes, vec![4]);
        assert_eq!(mappings.by_field_indexes, vec![1]);
        assert_eq!(mappings.over_field_indexes, vec![3]);
        assert_eq!(mappings.partition_field_indexes, vec![2]);
    }

    #[test]
    fn test_header_written_once_across_writes() {
        let mut status = CountingStatusReporter::new();
        let mut usage = UsageTotals::default();
        let mut persister = MemoryPersister::default();
        let reporters = Reporters {
            status: &mut status,
            usage: &mut usage,
            persister: &mut persister,
        };
        let mut session = IngestionSession::new(
            job(vec![Detector::on_field("value")], 0),
            SessionOptions::default(),
            Vec::new(),
            reporters,
        )
        .unwrap();

        session.write("time,value\n1,a\n".as_bytes()).unwrap();
        let flush_id = session.flush().unwrap();
        session.write("value,time\nb,2\n1,0\n".as_bytes()).unwrap();

        assert_eq!(flush_id, "1");
        let bytes = session.into_output();
        let records = LengthEncodedReader::new(bytes.as_slice()).read_all().unwrap();

        assert_eq!(records.len(), 5);
        assert_eq!(records[0], vec!["time", "value", "."]);
        assert_eq!(records[2], vec!["", "", "f1"]);
        assert_eq!(records[4], vec!["2", "b", ""]);
        assert_eq!(status.counts().out_of_order_count, 1);
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let mut harness = Harness::new();
        let (counts, records) = harness.write(job(vec![Detector::on_field("value")], 0), "").unwrap();

        assert!(records.is_empty());
        assert_eq!(counts, DataCounts::default());
    }
}
