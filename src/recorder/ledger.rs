//! Segment ledger
//!
//! Ordered, append-only list of the segments completed in the current session.
//! This is what the merge engine reads.

use super::state::Segment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Segment {attempted} appended after segment {last}")]
    OutOfOrder { last: u64, attempted: u64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentLedger {
    segments: Vec<Segment>,
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed segment. Sequence numbers must strictly increase.
    pub fn append(&mut self, segment: Segment) -> Result<(), LedgerError> {
        if let Some(last) = self.last_sequence() {
            if segment.sequence <= last {
                return Err(LedgerError::OutOfOrder {
                    last,
                    attempted: segment.sequence,
                });
            }
        }
        self.segments.push(segment);
        Ok(())
    }

    /// Copy of the segments as of now; later appends do not affect it.
    pub fn snapshot(&self) -> Vec<Segment> {
        self.segments.clone()
    }

    /// Forget every segment. Only done when a new session starts.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    /// Sum of the known segment durations
    pub fn total_duration_hint_ms(&self) -> u64 {
        self.segments.iter().filter_map(|s| s.duration_hint_ms).sum()
    }
}
