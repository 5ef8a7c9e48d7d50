//! Recorder state management
//!
//! Defines the segment recorder state machine and the segment record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Current state of the segment recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No segment in flight
    Idle,
    /// Samples are flowing into the current segment file
    Recording,
    /// Waiting for the segment file to be closed
    Finalizing,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Idle
    }
}

/// One completed take
///
/// Created once, when its file has been closed successfully, and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Position in the session (1, 2, 3, ...)
    pub sequence: u64,

    /// Segment file
    pub location: PathBuf,

    /// Measured capture time in milliseconds
    pub duration_hint_ms: Option<u64>,

    /// When the segment file was closed
    pub recorded_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(sequence: u64, location: PathBuf, duration_hint: Option<Duration>) -> Self {
        Self {
            sequence,
            location,
            duration_hint_ms: duration_hint.map(|d| d.as_millis() as u64),
            recorded_at: Utc::now(),
        }
    }

    pub fn duration_hint(&self) -> Option<Duration> {
        self.duration_hint_ms.map(Duration::from_millis)
    }
}
