//! # Recordfeed: Record Normalization for Time-Series Analysis
//!
//! Recordfeed reads raw records in one of several formats, runs a configured
//! graph of field transforms over them and writes a fixed-schema,
//! length-encoded record stream for a downstream analysis process.
//!
//! ## Features
//!
//! - **Format readers**: delimited text with a header, concatenated JSON objects,
//!   nested aggregation results, and free-text single lines
//! - **Transform graph**: concat, split, extract, case and trim, domain split and
//!   exclude filters, ordered by their field dependencies
//! - **Lateness gate**: records older than the latest accepted time minus a
//!   configured latency are dropped and counted
//! - **Wire protocol**: big-endian length-prefixed records plus in-band control
//!   messages (flush, interim results, bucket reset)
//!
//! ## Example: Job Configuration
//!
//! ```yaml
//! data_description:
//!   format: delimited
//!   field_delimiter: ","
//!   time_field: time
//!   time_format: "yyyy-MM-dd HH:mm"
//! analysis_config:
//!   latency: 60
//!   detectors:
//!     - function: count
//!       by_field_name: domain
//! transforms:
//!   - transform: concat
//!     inputs: [date, hour]
//!     arguments: [" "]
//!     outputs: [time]
//!   - transform: domain_split
//!     inputs: [host]
//!     outputs: [subdomain, domain]
//!   - transform: exclude
//!     inputs: [domain]
//!     condition:
//!       operator: match
//!       value: "internal\\..*"
//! ```

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod readers;
pub mod report;
pub mod schema;
pub mod session;
pub mod time;
pub mod transform;
pub mod wire;

// Re-export key types
pub use config::{AnalysisConfig, DataDescription, DataFormat, Detector, JobConfig, SessionOptions, TransformConfig};
pub use error::{IngestError, TransformConfigError};
pub use report::{
    CountingStatusReporter, DataCounts, FieldMappings, MemoryPersister, NdjsonPersister, NoopPersister,
    RecordPersister, StatusReporter, UsageReporter, UsageTotals,
};
pub use session::{IngestionSession, Reporters};
pub use transform::{Condition, Operator, TransformSpec, TransformType};
pub use wire::{ControlMessageEncoder, LengthEncodedReader, LengthEncodedWriter};
