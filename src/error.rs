//! Error types for ingestion sessions.
//!
//! Only fatal conditions are represented here. Per-record problems (missing fields,
//! bad timestamps, late records, exclusions) are counted through the status reporter
//! and never surface as an `Err`.

use std::fmt;

/// Error type for transform configuration verification
#[derive(Debug, Clone, PartialEq)]
pub enum TransformConfigError {
    UnknownTransform(String),
    InvalidInputCount { transform: String, expected: String, got: usize },
    InvalidArgumentCount { transform: String, expected: String, got: usize },
    InvalidOutputCount { transform: String, expected: String, got: usize },
    RequiresCondition(String),
    EmptyInput(String),
    EmptyOutput(String),
    InvalidRegex { transform: String, message: String },
    UnknownOperator(String),
    InvalidConditionValue(String),
}

impl fmt::Display for TransformConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformConfigError::UnknownTransform(name) => {
                write!(f, "Unknown transform type: {}", name)
            }
            TransformConfigError::InvalidInputCount { transform, expected, got } => write!(
                f,
                "Transform type {} expected {} input(s), got {}",
                transform, expected, got
            ),
            TransformConfigError::InvalidArgumentCount { transform, expected, got } => write!(
                f,
                "Transform type {} expected {} argument(s), got {}",
                transform, expected, got
            ),
            TransformConfigError::InvalidOutputCount { transform, expected, got } => write!(
                f,
                "Transform type {} expected {} output(s), got {}",
                transform, expected, got
            ),
            TransformConfigError::RequiresCondition(name) => {
                write!(f, "Transform type {} must have a condition", name)
            }
            TransformConfigError::EmptyInput(name) => {
                write!(f, "Transform type {} contains empty input", name)
            }
            TransformConfigError::EmptyOutput(name) => {
                write!(f, "Transform type {} contains empty output", name)
            }
            TransformConfigError::InvalidRegex { transform, message } => {
                write!(f, "Transform type {} has an invalid regex: {}", transform, message)
            }
            TransformConfigError::UnknownOperator(op) => write!(f, "Unknown operator: {}", op),
            TransformConfigError::InvalidConditionValue(value) => {
                write!(f, "Condition value '{}' is not a number", value)
            }
        }
    }
}

impl std::error::Error for TransformConfigError {}

/// Fatal error that terminates an ingestion session
#[derive(Debug)]
pub enum IngestError {
    /// Transforms form a dependency cycle
    TransformCycle { transforms: Vec<String> },
    /// A transform input is neither a raw field nor produced by another transform
    UnresolvableTransformInput { transform: String, input: String },
    /// A required field is absent from the input header
    MissingField { field: String },
    /// Aggregated input was configured without a nesting order
    EmptyNestingOrder,
    /// A quoted field spans more lines than allowed
    QuotedFieldTooLong { start_line: u64, end_line: u64, max_lines: u64 },
    /// Input that cannot be parsed at all
    MalformedInput(String),
    /// Too many consecutive unparseable JSON objects
    TooManyParseErrors { consecutive: usize },
    InvalidTransform(TransformConfigError),
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::TransformCycle { transforms } => write!(
                f,
                "Circular dependency detected involving transforms: {:?}",
                transforms
            ),
            IngestError::UnresolvableTransformInput { transform, input } => write!(
                f,
                "Transform '{}' reads '{}', which is neither an input field nor a transform output",
                transform, input
            ),
            IngestError::MissingField { field } => {
                write!(f, "Field configured for analysis '{}' is not in the input", field)
            }
            IngestError::EmptyNestingOrder => {
                write!(f, "Aggregated input requires a non-empty nesting order")
            }
            IngestError::QuotedFieldTooLong { start_line, end_line, max_lines } => write!(
                f,
                "max number of lines to read exceeded while reading quoted column beginning on line {} and ending on line {} (max {})",
                start_line, end_line, max_lines
            ),
            IngestError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            IngestError::TooManyParseErrors { consecutive } => write!(
                f,
                "Giving up after {} consecutive JSON parse errors",
                consecutive
            ),
            IngestError::InvalidTransform(e) => write!(f, "Invalid transform: {}", e),
            IngestError::Config(msg) => write!(f, "Configuration error: {}", msg),
            IngestError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::InvalidTransform(e) => Some(e),
            IngestError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Io(err)
    }
}

impl From<TransformConfigError> for IngestError {
    fn from(err: TransformConfigError) -> Self {
        IngestError::InvalidTransform(err)
    }
}

impl From<serde_yaml::Error> for IngestError {
    fn from(err: serde_yaml::Error) -> Self {
        IngestError::Config(format!("Failed to parse YAML: {}", err))
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return IngestError::Io(io);
            }
            return IngestError::MalformedInput("unreadable delimited input".to_string());
        }
        IngestError::MalformedInput(err.to_string())
    }
}
