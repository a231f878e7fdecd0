//! Compiles job configuration into an executable transform plan.
//!
//! The plan fixes, once per session:
//! - the raw input schema (from a header or from declared field names)
//! - the output schema: time field first, analysis fields sorted, control field last
//! - where every transform reads and writes (raw, scratch or output slots)
//! - which transforms must run before the timestamp is parsed
//! - direct raw → output copies for fields no transform produces

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::IngestError;
use crate::schema::{FieldSchema, Location, CONTROL_FIELD};
use crate::transform::graph::{dependency_edges, execution_order};
use crate::transform::TransformSpec;

/// A transform bound to its read and write locations.
#[derive(Debug, Clone)]
pub struct TransformStep {
    pub transform: TransformSpec,
    pub inputs: Vec<Location>,
    pub outputs: Vec<Location>,
}

/// Direct copy of a raw field into the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputOutputMap {
    pub input_index: usize,
    pub output_index: usize,
}

/// Everything needed to turn raw records into output records.
#[derive(Debug, Clone)]
pub struct TransformPlan {
    pub input_schema: FieldSchema,
    pub output_schema: FieldSchema,
    pub scratch_len: usize,
    /// Steps that produce the time field or its prerequisites
    pub date_input: Vec<TransformStep>,
    /// Everything else, exclude filters first where their inputs allow
    pub post_date: Vec<TransformStep>,
    pub input_output_map: Vec<InputOutputMap>,
    /// Where the unparsed time value is found after the date-input stage
    pub time_source: Location,
    /// Raw indices whose absence from a record counts as a missing field
    pub required_inputs: Vec<usize>,
}

impl TransformPlan {
    /// Number of required raw fields the reader did not populate.
    pub fn count_missing(&self, got_fields: &[bool]) -> usize {
        self.required_inputs
            .iter()
            .filter(|&&index| !got_fields.get(index).copied().unwrap_or(false))
            .count()
    }

    pub fn output_len(&self) -> usize {
        self.output_schema.len()
    }
}

/// Builds [`TransformPlan`]s for one job.
#[derive(Debug, Clone)]
pub struct PlanCompiler {
    analysis_fields: Vec<String>,
    time_field: String,
    transforms: Vec<TransformSpec>,
}

impl PlanCompiler {
    /// # Arguments
    /// * `analysis_fields` - Field names the analysis references
    /// * `time_field` - Name of the timestamp field
    /// * `transforms` - Verified transforms in declaration order
    pub fn new(
        analysis_fields: Vec<String>,
        time_field: impl Into<String>,
        transforms: Vec<TransformSpec>,
    ) -> Self {
        let time_field = time_field.into();
        let analysis_fields = analysis_fields
            .into_iter()
            .filter(|name| name != &time_field)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            analysis_fields,
            time_field,
            transforms,
        }
    }

    /// Output header: time, sorted analysis fields, control field.
    pub fn output_schema(&self) -> FieldSchema {
        let mut schema = FieldSchema::new();
        schema.push(self.time_field.clone());
        for name in &self.analysis_fields {
            schema.push(name.clone());
        }
        schema.push(CONTROL_FIELD);
        schema
    }

    fn produced_names(&self) -> HashSet<&str> {
        self.transforms
            .iter()
            .flat_map(|t| t.outputs.iter().map(String::as_str))
            .collect()
    }

    /// Raw field names the input must supply, sorted.
    ///
    /// These are the time and analysis fields no transform produces, plus every
    /// transform input not produced by some other transform.
    pub fn required_input_fields(&self) -> Vec<String> {
        let produced = self.produced_names();
        let mut fields: BTreeSet<String> = BTreeSet::new();

        for name in std::iter::once(&self.time_field).chain(&self.analysis_fields) {
            if !produced.contains(name.as_str()) {
                fields.insert(name.clone());
            }
        }

        for (index, transform) in self.transforms.iter().enumerate() {
            for input in &transform.inputs {
                let produced_elsewhere = self
                    .transforms
                    .iter()
                    .enumerate()
                    .any(|(other, t)| other != index && t.outputs.contains(input));
                if !produced_elsewhere {
                    fields.insert(input.clone());
                }
            }
        }

        fields.into_iter().collect()
    }

    /// Compile against the fields the input actually provides.
    ///
    /// # Errors
    /// * `TransformCycle` - transforms depend on each other in a loop
    /// * `MissingField` - the time field or an analysis field is not available
    /// * `UnresolvableTransformInput` - a transform input is neither raw nor produced
    pub fn compile(&self, input_fields: &[String]) -> Result<TransformPlan, IngestError> {
        let order = execution_order(&self.transforms)?;
        let input_schema = FieldSchema::from_names(input_fields.iter().cloned());
        let output_schema = self.output_schema();
        let produced = self.produced_names();

        // Time field is reported first so that error names the most basic problem.
        for name in std::iter::once(&self.time_field).chain(&self.analysis_fields) {
            if !produced.contains(name.as_str()) && !input_schema.contains(name) {
                return Err(IngestError::MissingField { field: name.clone() });
            }
        }

        let mut available: HashMap<String, Location> = HashMap::new();
        let mut scratch_len = 0;
        let mut steps: Vec<TransformStep> = Vec::with_capacity(order.len());

        for &index in &order {
            let transform = &self.transforms[index];

            let mut inputs = Vec::with_capacity(transform.inputs.len());
            for input in &transform.inputs {
                let location = match available.get(input) {
                    Some(location) => *location,
                    None => match input_schema.index_of(input) {
                        Some(raw) => Location::raw(raw),
                        None => {
                            return Err(IngestError::UnresolvableTransformInput {
                                transform: transform.label(),
                                input: input.clone(),
                            })
                        }
                    },
                };
                inputs.push(location);
            }

            let mut outputs = Vec::with_capacity(transform.outputs.len());
            for output in &transform.outputs {
                let location = match output_schema.index_of(output) {
                    Some(slot) => Location::output(slot),
                    None => {
                        scratch_len += 1;
                        Location::scratch(scratch_len - 1)
                    }
                };
                available.insert(output.clone(), location);
                outputs.push(location);
            }

            steps.push(TransformStep {
                transform: transform.clone(),
                inputs,
                outputs,
            });
        }

        let (date_input, post_date) = self.partition_stages(&order, steps);

        let time_source = match available.get(&self.time_field) {
            Some(location) => *location,
            None => Location::raw(input_schema.index_of(&self.time_field).ok_or_else(|| {
                IngestError::MissingField { field: self.time_field.clone() }
            })?),
        };

        let mut input_output_map = Vec::new();
        for name in &self.analysis_fields {
            if produced.contains(name.as_str()) {
                continue;
            }
            if let (Some(input_index), Some(output_index)) =
                (input_schema.index_of(name), output_schema.index_of(name))
            {
                input_output_map.push(InputOutputMap { input_index, output_index });
            }
        }

        let required_inputs = self
            .required_input_fields()
            .iter()
            .filter_map(|name| input_schema.index_of(name))
            .collect();

        tracing::debug!(
            "Compiled plan: {} date-input step(s), {} post-date step(s), {} pass-through field(s)",
            date_input.len(),
            post_date.len(),
            input_output_map.len()
        );

        Ok(TransformPlan {
            input_schema,
            output_schema,
            scratch_len,
            date_input,
            post_date,
            input_output_map,
            time_source,
            required_inputs,
        })
    }

    /// Split sorted steps into the date-input stage and the post-date stage.
    ///
    /// A transform is date-input if it writes the time field or feeds, directly or
    /// transitively, a transform that does. Within the post-date stage, exclude
    /// filters that read nothing produced in that stage move to the front so a
    /// matching record is dropped before any other work is done.
    fn partition_stages(
        &self,
        order: &[usize],
        mut steps: Vec<TransformStep>,
    ) -> (Vec<TransformStep>, Vec<TransformStep>) {
        let edges = dependency_edges(&self.transforms);

        let mut date_input: HashSet<usize> = self
            .transforms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.outputs.contains(&self.time_field))
            .map(|(index, _)| index)
            .collect();

        // Walk producers backwards until no new prerequisite appears
        loop {
            let before = date_input.len();
            for (producer, consumers) in edges.iter().enumerate() {
                if consumers.iter().any(|c| date_input.contains(c)) {
                    date_input.insert(producer);
                }
            }
            if date_input.len() == before {
                break;
            }
        }

        let mut first_stage = Vec::new();
        let mut second_stage = Vec::new();
        for (&index, step) in order.iter().zip(steps.drain(..)) {
            if date_input.contains(&index) {
                first_stage.push(step);
            } else {
                second_stage.push((index, step));
            }
        }

        let post_date_outputs: HashSet<&str> = second_stage
            .iter()
            .flat_map(|(index, _)| self.transforms[*index].outputs.iter().map(String::as_str))
            .collect();
        let (early, late): (Vec<_>, Vec<_>) = second_stage.into_iter().partition(|(_, step)| {
            step.transform.is_exclude()
                && step
                    .transform
                    .inputs
                    .iter()
                    .all(|input| !post_date_outputs.contains(input.as_str()))
        });

        let post_date = early.into_iter().chain(late).map(|(_, step)| step).collect();
        (first_stage, post_date)
    }
}
