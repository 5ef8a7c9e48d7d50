//! Merge types and configuration
//!
//! This module defines the types used for merge configuration, progress
//! tracking, and error handling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Container format for segments and merged output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mov,
    Mp4,
}

impl Default for Container {
    fn default() -> Self {
        Self::Mov
    }
}

impl Container {
    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mov => "mov",
            Container::Mp4 => "mp4",
        }
    }
}

/// Merge configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    /// Output file path
    pub output_path: PathBuf,
    /// Whether an existing file at `output_path` may be replaced
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

impl MergeOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            overwrite: true,
        }
    }
}

/// A successfully merged file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutput {
    /// Location of the playable merged file
    pub output_location: PathBuf,
    /// Number of segments concatenated
    pub segment_count: usize,
    /// Probed duration of the merged file
    pub duration_ms: Option<f64>,
}

/// Merge progress stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MergeStage {
    /// Validating segment files
    Preparing,
    /// Copying segment samples into the output
    Concatenating,
    /// Moving the output into place
    Finalizing,
    /// Merge completed successfully
    Complete,
    /// Merge failed with error
    Error { message: String },
}

/// Merge progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    /// Progress percentage (0.0 to 100.0)
    pub percent: f32,
    /// Current stage of the merge
    pub stage: MergeStage,
}

impl MergeProgress {
    pub fn preparing() -> Self {
        Self {
            percent: 0.0,
            stage: MergeStage::Preparing,
        }
    }

    pub fn concatenating(written_ms: u64, total_ms: u64) -> Self {
        let percent = if total_ms > 0 {
            5.0 + (written_ms.min(total_ms) as f32 / total_ms as f32) * 90.0
        } else {
            5.0
        };
        Self {
            percent,
            stage: MergeStage::Concatenating,
        }
    }

    pub fn finalizing() -> Self {
        Self {
            percent: 95.0,
            stage: MergeStage::Finalizing,
        }
    }

    pub fn complete() -> Self {
        Self {
            percent: 100.0,
            stage: MergeStage::Complete,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            percent: 0.0,
            stage: MergeStage::Error { message },
        }
    }
}

/// Merge errors
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("No segments available to merge")]
    NoSegmentsAvailable,

    #[error("A merge is already in progress")]
    MergeInProgress,

    #[error("Segment {sequence} is unreadable: {path:?}")]
    UnreadableSegment { sequence: u64, path: PathBuf },

    #[error("Output already exists: {0:?}")]
    OutputExists(PathBuf),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Merge cancelled")]
    Cancelled,
}

impl MergeError {
    /// True for failures of the concatenation itself, as opposed to a
    /// request that was refused up front.
    pub fn is_merge_failure(&self) -> bool {
        !matches!(self, MergeError::NoSegmentsAvailable | MergeError::MergeInProgress)
    }
}

/// Result of one merge request
pub type MergeResult = Result<MergeOutput, MergeError>;
