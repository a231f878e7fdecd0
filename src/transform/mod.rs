//! Transform kinds and their per-record application.
//!
//! A [`TransformConfig`] is verified into a [`TransformSpec`]: arity is checked
//! against the [`TransformType`], default output names are filled in and any
//! regex or exclude condition is compiled once up front.

mod domain;
pub mod graph;

use std::fmt;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::TransformConfig;
use crate::error::TransformConfigError;

pub use domain::split_domain;

/// Inclusive count range used for input/argument/output verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    const fn between(min: usize, max: usize) -> Self {
        Self { min, max: Some(max) }
    }

    const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, +inf)", self.min),
        }
    }
}

/// The closed set of transform types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformType {
    Concat,
    Split,
    Extract,
    Uppercase,
    Lowercase,
    Trim,
    DomainSplit,
    Exclude,
}

impl TransformType {
    pub const ALL: [TransformType; 8] = [
        TransformType::Concat,
        TransformType::Split,
        TransformType::Extract,
        TransformType::Uppercase,
        TransformType::Lowercase,
        TransformType::Trim,
        TransformType::DomainSplit,
        TransformType::Exclude,
    ];

    pub fn from_name(name: &str) -> Result<Self, TransformConfigError> {
        let normalized = name.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| TransformConfigError::UnknownTransform(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformType::Concat => "concat",
            TransformType::Split => "split",
            TransformType::Extract => "extract",
            TransformType::Uppercase => "uppercase",
            TransformType::Lowercase => "lowercase",
            TransformType::Trim => "trim",
            TransformType::DomainSplit => "domain_split",
            TransformType::Exclude => "exclude",
        }
    }

    pub fn inputs(&self) -> Arity {
        match self {
            TransformType::Concat => Arity::at_least(2),
            TransformType::Exclude => Arity::at_least(1),
            _ => Arity::exactly(1),
        }
    }

    pub fn arguments(&self) -> Arity {
        match self {
            TransformType::Concat => Arity::between(0, 1),
            TransformType::Split | TransformType::Extract => Arity::exactly(1),
            TransformType::Exclude => Arity::between(0, 2),
            _ => Arity::exactly(0),
        }
    }

    pub fn outputs(&self) -> Arity {
        match self {
            TransformType::Split | TransformType::Extract => Arity::at_least(1),
            TransformType::DomainSplit => Arity::between(1, 2),
            TransformType::Exclude => Arity::exactly(0),
            _ => Arity::exactly(1),
        }
    }

    /// Output names used when a transform declares none.
    pub fn default_outputs(&self) -> Vec<String> {
        match self {
            TransformType::DomainSplit => vec!["subDomain".to_string(), "hrd".to_string()],
            TransformType::Exclude => Vec::new(),
            other => vec![other.name().to_string()],
        }
    }
}

/// Comparison operator of an exclude condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Match,
}

impl Operator {
    pub fn from_name(name: &str) -> Result<Self, TransformConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "eq" => Ok(Operator::Eq),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "match" => Ok(Operator::Match),
            _ => Err(TransformConfigError::UnknownOperator(name.to_string())),
        }
    }
}

/// Exclude condition as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub operator: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(operator: Operator, value: impl Into<String>) -> Self {
        Self { operator, value: value.into() }
    }
}

/// Compiled form of a [`Condition`].
#[derive(Debug, Clone)]
pub enum Predicate {
    Numeric { operator: Operator, operand: f64 },
    Regex(Regex),
}

impl Predicate {
    fn compile(condition: &Condition, transform: &str) -> Result<Self, TransformConfigError> {
        match condition.operator {
            Operator::Match => Regex::new(&format!("^(?:{})$", condition.value))
                .map(Predicate::Regex)
                .map_err(|e| TransformConfigError::InvalidRegex {
                    transform: transform.to_string(),
                    message: e.to_string(),
                }),
            operator => {
                let operand = condition.value.trim().parse::<f64>().map_err(|_| {
                    TransformConfigError::InvalidConditionValue(condition.value.clone())
                })?;
                Ok(Predicate::Numeric { operator, operand })
            }
        }
    }

    /// A non-numeric value never satisfies a numeric comparison.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Predicate::Regex(regex) => regex.is_match(value),
            Predicate::Numeric { operator, operand } => {
                let Ok(v) = value.trim().parse::<f64>() else {
                    return false;
                };
                match operator {
                    Operator::Eq => v == *operand,
                    Operator::Gt => v > *operand,
                    Operator::Gte => v >= *operand,
                    Operator::Lt => v < *operand,
                    Operator::Lte => v <= *operand,
                    Operator::Match => false,
                }
            }
        }
    }
}

/// Executable transform behaviour, one variant per type.
#[derive(Debug, Clone)]
pub enum TransformKind {
    Concat { delimiter: String },
    Split(Regex),
    Extract(Regex),
    Uppercase,
    Lowercase,
    Trim,
    DomainSplit,
    Exclude(Predicate),
}

/// Result of applying a transform to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// One value per declared output
    Values(Vec<String>),
    /// Condition matched: drop the whole record
    Exclude,
    /// Condition did not match
    Keep,
}

/// A verified transform.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub transform_type: TransformType,
    pub kind: TransformKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl TransformSpec {
    /// Verify a configured transform and compile it.
    ///
    /// # Errors
    /// Any arity violation, blank input/output name, missing exclude condition,
    /// invalid regex or unknown operator.
    pub fn from_config(config: &TransformConfig) -> Result<Self, TransformConfigError> {
        let transform_type = TransformType::from_name(&config.transform)?;
        let name = transform_type.name();

        let input_arity = transform_type.inputs();
        if !input_arity.contains(config.inputs.len()) {
            return Err(TransformConfigError::InvalidInputCount {
                transform: name.to_string(),
                expected: input_arity.to_string(),
                got: config.inputs.len(),
            });
        }
        if config.inputs.iter().any(|s| s.trim().is_empty()) {
            return Err(TransformConfigError::EmptyInput(name.to_string()));
        }

        let argument_arity = transform_type.arguments();
        if !argument_arity.contains(config.arguments.len()) {
            return Err(TransformConfigError::InvalidArgumentCount {
                transform: name.to_string(),
                expected: argument_arity.to_string(),
                got: config.arguments.len(),
            });
        }

        let outputs = if config.outputs.is_empty() {
            transform_type.default_outputs()
        } else {
            config.outputs.clone()
        };
        let output_arity = transform_type.outputs();
        if !output_arity.contains(outputs.len()) {
            return Err(TransformConfigError::InvalidOutputCount {
                transform: name.to_string(),
                expected: output_arity.to_string(),
                got: outputs.len(),
            });
        }
        if outputs.iter().any(|s| s.trim().is_empty()) {
            return Err(TransformConfigError::EmptyOutput(name.to_string()));
        }

        let compile_regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| TransformConfigError::InvalidRegex {
                transform: name.to_string(),
                message: e.to_string(),
            })
        };

        let kind = match transform_type {
            TransformType::Concat => TransformKind::Concat {
                delimiter: config.arguments.first().cloned().unwrap_or_default(),
            },
            TransformType::Split => TransformKind::Split(compile_regex(&config.arguments[0])?),
            TransformType::Extract => TransformKind::Extract(compile_regex(&config.arguments[0])?),
            TransformType::Uppercase => TransformKind::Uppercase,
            TransformType::Lowercase => TransformKind::Lowercase,
            TransformType::Trim => TransformKind::Trim,
            TransformType::DomainSplit => TransformKind::DomainSplit,
            TransformType::Exclude => {
                let condition = match (&config.condition, config.arguments.as_slice()) {
                    (Some(condition), _) => condition.clone(),
                    (None, [value]) => Condition::new(Operator::Match, value.clone()),
                    (None, [value, operator]) => {
                        Condition::new(Operator::from_name(operator)?, value.clone())
                    }
                    _ => return Err(TransformConfigError::RequiresCondition(name.to_string())),
                };
                TransformKind::Exclude(Predicate::compile(&condition, name)?)
            }
        };

        Ok(Self {
            transform_type,
            kind,
            inputs: config.inputs.clone(),
            outputs,
        })
    }

    /// Human readable identifier used in errors and logs, e.g. `concat(date,time)`.
    pub fn label(&self) -> String {
        format!("{}({})", self.transform_type.name(), self.inputs.join(","))
    }

    pub fn is_exclude(&self) -> bool {
        matches!(self.kind, TransformKind::Exclude(_))
    }

    /// Apply to one record's input values (one per declared input, in order).
    pub fn apply(&self, inputs: &[&str]) -> Applied {
        let n = self.outputs.len();
        let first = inputs.first().copied().unwrap_or("");

        let values = match &self.kind {
            TransformKind::Concat { delimiter } => vec![inputs.join(delimiter)],
            TransformKind::Split(regex) => {
                let mut pieces: Vec<String> =
                    regex.split(first).take(n).map(str::to_string).collect();
                pieces.resize(n, String::new());
                pieces
            }
            TransformKind::Extract(regex) => match regex.captures(first) {
                Some(captures) => (1..=n)
                    .map(|i| captures.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect(),
                None => vec![String::new(); n],
            },
            TransformKind::Uppercase => vec![first.to_uppercase()],
            TransformKind::Lowercase => vec![first.to_lowercase()],
            TransformKind::Trim => vec![first.trim().to_string()],
            TransformKind::DomainSplit => {
                let (sub_domain, highest_registered) = split_domain(first);
                [sub_domain, highest_registered].into_iter().take(n).collect()
            }
            TransformKind::Exclude(predicate) => {
                return if inputs.iter().any(|v| predicate.matches(v)) {
                    Applied::Exclude
                } else {
                    Applied::Keep
                };
            }
        };

        Applied::Values(values)
    }
}
