//! Capture trait definitions
//!
//! Platform-agnostic descriptions of capture devices and the sinks that
//! receive their samples.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Kind of media a device produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Physical position of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Back,
    Front,
    Unspecified,
}

impl Default for DevicePosition {
    fn default() -> Self {
        Self::Back
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Information about a capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Media produced by this device
    pub kind: MediaKind,

    /// Camera position (audio devices report `Unspecified`)
    pub position: DevicePosition,

    /// Capture resolution (video only)
    pub resolution: Option<Resolution>,

    /// Capture frame rate (video only)
    pub frame_rate: Option<u32>,
}

/// Which media kinds a configured session can capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
}

impl Capabilities {
    pub fn is_empty(&self) -> bool {
        !self.video && !self.audio
    }
}

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture session has not been configured")]
    NotConfigured,

    #[error("A capture sink is still receiving samples")]
    SinkBusy,

    #[error("Capture sink was detached before it started")]
    SinkNotStarted,

    #[error("No capture devices are attached to the session")]
    NoDevices,

    #[error("Capture produced an empty file: {0}")]
    EmptyOutput(PathBuf),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// A physical (or synthetic) input the session captures from.
pub trait CaptureDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// FFmpeg arguments that open this device as one input, ending in `-i <name>`.
    fn input_args(&self) -> Vec<String>;
}

/// Resolves the default devices for a session.
pub trait DeviceProvider: Send + Sync {
    fn default_video(&self, position: DevicePosition) -> CaptureResult<Arc<dyn CaptureDevice>>;

    fn default_audio(&self) -> CaptureResult<Arc<dyn CaptureDevice>>;
}

/// What a sink wrote once it stopped
#[derive(Debug, Clone)]
pub struct SinkReport {
    pub location: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Writable destination for live capture samples.
///
/// `run` starts delivery from `devices` into the sink's file and returns once
/// the file is closed. Delivery ends when `stop` fires or its sender is dropped.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    fn location(&self) -> &Path;

    async fn run(
        &self,
        devices: Vec<Arc<dyn CaptureDevice>>,
        stop: oneshot::Receiver<()>,
    ) -> CaptureResult<SinkReport>;
}

/// Creates one sink per segment location
pub trait SinkFactory: Send + Sync {
    fn create(&self, location: PathBuf) -> Arc<dyn CaptureSink>;
}

/// Check that a finished sink actually left a non-empty file behind.
pub fn verify_output(location: &Path) -> CaptureResult<u64> {
    let metadata = std::fs::metadata(location)?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Err(CaptureError::EmptyOutput(location.to_path_buf()));
    }
    Ok(metadata.len())
}
