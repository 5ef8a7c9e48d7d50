//! Segmented recording
//!
//! This module implements take-by-take recording:
//! - SegmentRecorder drives one capture-to-file operation at a time
//! - SegmentLedger keeps the completed takes in recording order

pub mod coordinator;
pub mod ledger;
pub mod state;

pub use coordinator::{PendingSegment, RecorderError, RecorderResult, SegmentRecorder};
pub use ledger::{LedgerError, SegmentLedger};
pub use state::{RecorderState, Segment};
