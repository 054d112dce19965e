//! Sentence retention and capture timestamping.
//!
//! Retention is deliberately a substring check, not a strict sentence-type
//! parse: "GGA" retains `$GPGGA` and `$GNGGA` alike. Retained lines are
//! prefixed with the UTC capture time at millisecond precision.

use chrono::{DateTime, Utc};

/// Capture timestamp format for logged lines.
const CAPTURE_FORMAT: &str = "%Y%m%d-%H%M%S%.3f";

#[derive(Debug, Clone)]
pub struct SentenceFilter {
    save_all: bool,
    types: Vec<String>,
}

impl SentenceFilter {
    pub fn new(save_all: bool, types: Vec<String>) -> Self {
        Self { save_all, types }
    }

    /// Decide whether `line` is retained. Retained lines come back prefixed
    /// with the capture timestamp; `None` means the line is dropped.
    pub fn apply(&self, line: &str, captured: DateTime<Utc>) -> Option<String> {
        if line.is_empty() {
            return None;
        }
        if !self.save_all && !self.types.iter().any(|t| line.contains(t.as_str())) {
            return None;
        }
        Some(format!(
            "{} UTC,{}",
            captured.format(CAPTURE_FORMAT),
            line
        ))
    }
}
