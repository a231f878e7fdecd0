//! Job configuration: data description, analysis fields and transform list.
//!
//! Loaded from YAML and validated before a session is built.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::time::TimeFormat;
use crate::transform::{Condition, TransformSpec};

/// Source format of the raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    #[default]
    Delimited,
    Json,
    Aggregated,
    SingleLine,
}

/// Describes how raw input is laid out and where the timestamp lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescription {
    #[serde(default)]
    pub format: DataFormat,

    #[serde(default = "default_field_delimiter")]
    pub field_delimiter: char,

    #[serde(default = "default_quote_character")]
    pub quote_character: char,

    /// Name of the field holding the record timestamp
    #[serde(default = "default_time_field")]
    pub time_field: String,

    /// `epoch`, `epoch_ms`, or a date pattern
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Outer to inner bucket field names for aggregated input
    #[serde(default)]
    pub nesting_order: Vec<String>,
}

fn default_field_delimiter() -> char {
    ','
}

fn default_quote_character() -> char {
    '"'
}

fn default_time_field() -> String {
    "time".to_string()
}

fn default_time_format() -> String {
    "epoch".to_string()
}

impl Default for DataDescription {
    fn default() -> Self {
        Self {
            format: DataFormat::default(),
            field_delimiter: default_field_delimiter(),
            quote_character: default_quote_character(),
            time_field: default_time_field(),
            time_format: default_time_format(),
            nesting_order: Vec::new(),
        }
    }
}

/// A single detector; only the field references matter for ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub by_field_name: Option<String>,
    #[serde(default)]
    pub over_field_name: Option<String>,
    #[serde(default)]
    pub partition_field_name: Option<String>,
}

impl Detector {
    /// Detector on `field_name` with no splitting fields
    pub fn on_field(field_name: impl Into<String>) -> Self {
        Self {
            field_name: Some(field_name.into()),
            ..Default::default()
        }
    }

    fn referenced_fields(&self) -> impl Iterator<Item = &String> {
        [
            &self.field_name,
            &self.by_field_name,
            &self.over_field_name,
            &self.partition_field_name,
        ]
        .into_iter()
        .flatten()
    }
}

/// Analysis settings relevant to ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub detectors: Vec<Detector>,

    #[serde(default)]
    pub categorization_field_name: Option<String>,

    /// Seconds a record may lag behind the latest accepted record
    #[serde(default)]
    pub latency: u64,
}

impl AnalysisConfig {
    /// All field names referenced by the detectors and the categorization
    /// field, sorted and without duplicates or blanks.
    pub fn analysis_fields(&self) -> Vec<String> {
        let mut fields: BTreeSet<String> = BTreeSet::new();
        for detector in &self.detectors {
            for name in detector.referenced_fields() {
                if !name.trim().is_empty() {
                    fields.insert(name.clone());
                }
            }
        }
        if let Some(name) = &self.categorization_field_name {
            if !name.trim().is_empty() {
                fields.insert(name.clone());
            }
        }
        fields.into_iter().collect()
    }
}

/// One configured transform, before verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Transform type name, e.g. `concat` or `domain_split`
    pub transform: String,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub arguments: Vec<String>,

    /// Output names; the type's defaults apply when empty
    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub condition: Option<Condition>,
}

impl TransformConfig {
    pub fn new(transform: impl Into<String>, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            transform: transform.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_arguments(mut self, arguments: &[&str]) -> Self {
        self.arguments = arguments.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Complete configuration for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub data_description: DataDescription,

    pub analysis_config: AnalysisConfig,

    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
}

impl JobConfig {
    /// Load and validate a job configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `IngestError::Config` if the file cannot be read or parsed, or any
    /// error raised by [`JobConfig::validate`].
    ///
    /// # Example
    /// ```ignore
    /// use recordfeed::JobConfig;
    ///
    /// let config = JobConfig::load_from_file("config/job.yaml")?;
    /// println!("Analysis fields: {:?}", config.analysis_config.analysis_fields());
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, IngestError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: JobConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;

        tracing::debug!(
            "Loaded job config from {} ({} transforms)",
            path.display(),
            config.transforms.len()
        );

        Ok(config)
    }

    /// Check everything that can be checked without seeing any input.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.analysis_config.detectors.is_empty() {
            return Err(IngestError::Config("At least one detector is required".to_string()));
        }

        let description = &self.data_description;
        if description.time_field.trim().is_empty() {
            return Err(IngestError::Config("Time field name cannot be empty".to_string()));
        }
        if !description.field_delimiter.is_ascii() || !description.quote_character.is_ascii() {
            return Err(IngestError::Config(
                "Field delimiter and quote character must be ASCII".to_string(),
            ));
        }

        TimeFormat::parse(&description.time_format)?;

        match description.format {
            DataFormat::Aggregated => {
                let first = description
                    .nesting_order
                    .first()
                    .ok_or(IngestError::EmptyNestingOrder)?;
                if first != &description.time_field {
                    return Err(IngestError::Config(format!(
                        "Nesting order must start with the time field '{}', found '{}'",
                        description.time_field, first
                    )));
                }
            }
            DataFormat::SingleLine if self.transforms.is_empty() => {
                return Err(IngestError::Config(
                    "single_line input requires at least one transform".to_string(),
                ));
            }
            _ => {}
        }

        self.transform_specs()?;
        Ok(())
    }

    /// Verify every transform and build its executable form.
    pub fn transform_specs(&self) -> Result<Vec<TransformSpec>, IngestError> {
        self.transforms
            .iter()
            .map(|config| TransformSpec::from_config(config).map_err(IngestError::from))
            .collect()
    }
}

/// Runtime limits for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum number of lines a quoted delimited field may span
    pub max_quoted_lines: u64,
    /// Consecutive unparseable JSON objects tolerated before giving up
    pub max_consecutive_json_errors: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_quoted_lines: std::env::var("RECORDFEED_MAX_QUOTED_LINES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            max_consecutive_json_errors: std::env::var("RECORDFEED_MAX_JSON_ERRORS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}
