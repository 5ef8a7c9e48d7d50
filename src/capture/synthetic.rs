//! Synthetic capture devices
//!
//! FFmpeg `lavfi` test sources standing in for a camera and a microphone.
//! Inputs are read with `-re` so they produce samples in real time, like live
//! hardware would.

use super::traits::{
    CaptureDevice, CaptureError, CaptureResult, DeviceInfo, DevicePosition, DeviceProvider,
    MediaKind, Resolution,
};
use std::sync::Arc;

struct LavfiDevice {
    info: DeviceInfo,
    graph: String,
}

impl CaptureDevice for LavfiDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn input_args(&self) -> Vec<String> {
        vec![
            "-re".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            self.graph.clone(),
        ]
    }
}

/// Provides `testsrc2` video and `sine` audio
#[derive(Debug, Clone)]
pub struct SyntheticDeviceProvider {
    resolution: Resolution,
    frame_rate: u32,
    video: bool,
    audio: bool,
}

impl SyntheticDeviceProvider {
    pub fn new(resolution: Resolution, frame_rate: u32) -> Self {
        Self {
            resolution,
            frame_rate,
            video: true,
            audio: true,
        }
    }

    /// Make the synthetic camera (un)available
    pub fn with_video(mut self, available: bool) -> Self {
        self.video = available;
        self
    }

    /// Make the synthetic microphone (un)available
    pub fn with_audio(mut self, available: bool) -> Self {
        self.audio = available;
        self
    }
}

impl DeviceProvider for SyntheticDeviceProvider {
    fn default_video(&self, position: DevicePosition) -> CaptureResult<Arc<dyn CaptureDevice>> {
        if !self.video {
            return Err(CaptureError::DeviceUnavailable(
                "synthetic camera disabled".to_string(),
            ));
        }

        Ok(Arc::new(LavfiDevice {
            info: DeviceInfo {
                id: "lavfi:testsrc2".to_string(),
                name: "Synthetic Camera".to_string(),
                kind: MediaKind::Video,
                position,
                resolution: Some(self.resolution),
                frame_rate: Some(self.frame_rate),
            },
            graph: format!("testsrc2=size={}:rate={}", self.resolution, self.frame_rate),
        }))
    }

    fn default_audio(&self) -> CaptureResult<Arc<dyn CaptureDevice>> {
        if !self.audio {
            return Err(CaptureError::DeviceUnavailable(
                "synthetic microphone disabled".to_string(),
            ));
        }

        Ok(Arc::new(LavfiDevice {
            info: DeviceInfo {
                id: "lavfi:sine".to_string(),
                name: "Synthetic Microphone".to_string(),
                kind: MediaKind::Audio,
                position: DevicePosition::Unspecified,
                resolution: None,
                frame_rate: None,
            },
            graph: "sine=frequency=440:sample_rate=48000".to_string(),
        }))
    }
}
