//! Per-record execution of a [`TransformPlan`].

use crate::compiler::{TransformPlan, TransformStep};
use crate::schema::{Buffer, Location};
use crate::time::TimeFormat;
use crate::transform::Applied;

/// What became of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Output buffer is fully populated
    Ready { epoch_secs: i64 },
    /// An exclude condition matched
    Excluded,
    /// The time field was missing or unparseable
    BadTimestamp,
}

/// Applies a compiled plan to raw records.
///
/// Owns the scratch buffer; raw and output buffers belong to the caller.
pub struct RecordEngine<'p> {
    plan: &'p TransformPlan,
    time_format: TimeFormat,
    scratch: Vec<String>,
}

impl<'p> RecordEngine<'p> {
    pub fn new(plan: &'p TransformPlan, time_format: TimeFormat) -> Self {
        Self {
            plan,
            time_format,
            scratch: vec![String::new(); plan.scratch_len],
        }
    }

    /// Run the plan over one raw record.
    ///
    /// # Arguments
    /// * `raw` - values in input schema order
    /// * `got_fields` - which raw values the reader actually populated
    /// * `output` - receives the record, sized to the output schema
    pub fn process(&mut self, raw: &[String], got_fields: &[bool], output: &mut [String]) -> RecordOutcome {
        for value in output.iter_mut() {
            value.clear();
        }
        for value in self.scratch.iter_mut() {
            value.clear();
        }

        let plan = self.plan;

        for step in &plan.date_input {
            // No exclude lands in this stage; it has no outputs to feed the time field
            self.run_step(step, raw, got_fields, output);
        }

        let time_value = read(plan.time_source, raw, &self.scratch, output);
        let Some(epoch_secs) = self.time_format.epoch_seconds(time_value) else {
            return RecordOutcome::BadTimestamp;
        };
        output[0] = epoch_secs.to_string();

        for step in &plan.post_date {
            if self.run_step(step, raw, got_fields, output) == Applied::Exclude {
                return RecordOutcome::Excluded;
            }
        }

        for mapping in &plan.input_output_map {
            output[mapping.output_index].clone_from(&raw[mapping.input_index]);
        }

        RecordOutcome::Ready { epoch_secs }
    }

    fn run_step(
        &mut self,
        step: &TransformStep,
        raw: &[String],
        got_fields: &[bool],
        output: &mut [String],
    ) -> Applied {
        let missing_input = step.inputs.iter().any(|location| {
            location.buffer == Buffer::Raw && !got_fields.get(location.index).copied().unwrap_or(false)
        });

        let applied = if missing_input && !step.transform.is_exclude() {
            Applied::Values(vec![String::new(); step.outputs.len()])
        } else {
            let inputs: Vec<&str> = step
                .inputs
                .iter()
                .map(|&location| read(location, raw, &self.scratch, output))
                .collect();
            step.transform.apply(&inputs)
        };

        match applied {
            Applied::Values(values) => {
                for (location, value) in step.outputs.iter().zip(values) {
                    match location.buffer {
                        Buffer::Scratch => self.scratch[location.index] = value,
                        Buffer::Output => output[location.index] = value,
                        Buffer::Raw => {}
                    }
                }
                Applied::Keep
            }
            other => other,
        }
    }
}

fn read<'a>(location: Location, raw: &'a [String], scratch: &'a [String], output: &'a [String]) -> &'a str {
    let buffer = match location.buffer {
        Buffer::Raw => raw,
        Buffer::Scratch => scratch,
        Buffer::Output => output,
    };
    buffer.get(location.index).map(String::as_str).unwrap_or("")
}
