//! Notifications for the presentation layer
//!
//! Broadcast over a `tokio::sync::broadcast` channel; subscribers that lag
//! simply miss events, the core never waits for them.

use crate::merge::MergeProgress;
use crate::recorder::Segment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events emitted while recording and merging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    /// Samples started flowing into a new segment file
    SegmentStarted { sequence: u64 },
    /// A segment was added to the ledger
    SegmentCompleted { segment: Segment },
    /// A segment attempt failed and was not added to the ledger
    SegmentFailed { sequence: u64, reason: String },
    /// Merge progress update
    MergeProgress { progress: MergeProgress },
    /// Merged file is ready
    MergeCompleted { output: PathBuf },
    /// Merge failed; no output was produced
    MergeFailed { reason: String },
}

/// Default capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
