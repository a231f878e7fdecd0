//! Bounded-lateness admission.
//!
//! Records pass in arrival order. A record is accepted when its time is no more
//! than `latency` seconds behind the latest accepted time; otherwise it is dropped.
//! Nothing is buffered or reordered.

/// Watermark state for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatenessGate {
    watermark: Option<i64>,
    latency_secs: i64,
}

impl LatenessGate {
    pub fn new(latency_secs: u64) -> Self {
        Self {
            watermark: None,
            latency_secs: i64::try_from(latency_secs).unwrap_or(i64::MAX),
        }
    }

    /// Start from a previously accepted time, e.g. when a job resumes.
    pub fn with_watermark(mut self, watermark: Option<i64>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    /// Returns `true` and advances the watermark if the record is accepted.
    pub fn admit(&mut self, epoch_secs: i64) -> bool {
        match self.watermark {
            Some(watermark) if epoch_secs < watermark.saturating_sub(self.latency_secs) => false,
            Some(watermark) => {
                self.watermark = Some(watermark.max(epoch_secs));
                true
            }
            None => {
                self.watermark = Some(epoch_secs);
                true
            }
        }
    }
}
