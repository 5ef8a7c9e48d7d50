//! Error types and handling
//!
//! Crate-level error type and the code/message form shown to users.

use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::merge::MergeError;
use crate::recorder::{LedgerError, RecorderError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecorderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),
}

/// Error response for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    fn new(code: &str, message: String) -> Self {
        Self {
            code: code.to_string(),
            message,
        }
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        let code = match error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(CaptureError::DeviceUnavailable(_)) => "DEVICE_UNAVAILABLE",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Recording(RecorderError::RecordingInProgress) => "RECORDING_IN_PROGRESS",
            AppError::Recording(_) | AppError::Ledger(_) => "SEGMENT_WRITE_FAILURE",
            AppError::Merge(e) => return ErrorResponse::from(e),
        };
        ErrorResponse::new(code, error.to_string())
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse::from(&error)
    }
}

impl From<&MergeError> for ErrorResponse {
    fn from(error: &MergeError) -> Self {
        let code = match error {
            MergeError::NoSegmentsAvailable => "NO_SEGMENTS_AVAILABLE",
            MergeError::MergeInProgress => "MERGE_IN_PROGRESS",
            _ => "MERGE_FAILURE",
        };
        ErrorResponse::new(code, error.to_string())
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
