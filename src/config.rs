//! Session configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use crate::capture::{DevicePosition, Resolution};
use crate::merge::Container;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Highest accepted capture frame rate
pub const MAX_FRAME_RATE: u32 = 240;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where capture devices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// The machine's camera and microphone
    System,
    /// FFmpeg test sources
    Synthetic,
}

impl Default for DeviceBackend {
    fn default() -> Self {
        Self::System
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub device_backend: DeviceBackend,
    pub video_position: DevicePosition,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub container: Container,
    /// Segment storage; a temporary directory when unset
    pub segment_dir: Option<PathBuf>,
    /// Directory for merged output; the system temp directory when unset
    pub output_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub finalize_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_backend: DeviceBackend::default(),
            video_position: DevicePosition::Back,
            resolution: Resolution::default(),
            frame_rate: 30,
            container: Container::default(),
            segment_dir: None,
            output_dir: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            finalize_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded session config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be non-zero, got {}",
                self.resolution
            )));
        }
        if !(1..=MAX_FRAME_RATE).contains(&self.frame_rate) {
            return Err(ConfigError::Invalid(format!(
                "frameRate must be between 1 and {}, got {}",
                MAX_FRAME_RATE, self.frame_rate
            )));
        }
        if self.finalize_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "finalizeTimeoutMs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
