//! Segment merge module
//!
//! This module concatenates recorded segments, in ledger order, into a
//! single playable file.

pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use ffmpeg::{Concatenator, FfmpegConcatenator};
pub use pipeline::MergeEngine;
pub use types::{
    Container, MergeError, MergeOptions, MergeOutput, MergeProgress, MergeResult, MergeStage,
};
