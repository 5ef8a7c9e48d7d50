//! Platform capture devices
//!
//! Maps the machine's default camera and microphone onto FFmpeg input
//! devices: v4l2/ALSA on Linux, AVFoundation on macOS, DirectShow on Windows.
//! With the `camera` / `microphone` features the devices are enumerated via
//! nokhwa and cpal; without them well-known device nodes are probed.

use super::traits::{
    CaptureDevice, CaptureError, CaptureResult, DeviceInfo, DevicePosition, DeviceProvider,
    MediaKind, Resolution,
};
use std::sync::Arc;

/// An FFmpeg input device (`-f <format> ... -i <target>`)
struct PlatformDevice {
    info: DeviceInfo,
    format: &'static str,
    target: String,
}

impl CaptureDevice for PlatformDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn input_args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.format.to_string()];
        if let Some(rate) = self.info.frame_rate {
            args.extend(["-framerate".to_string(), rate.to_string()]);
        }
        if let Some(resolution) = self.info.resolution {
            args.extend(["-video_size".to_string(), resolution.to_string()]);
        }
        args.extend(["-i".to_string(), self.target.clone()]);
        args
    }
}

/// A camera found on this machine
#[derive(Debug, Clone, PartialEq)]
struct CameraEntry {
    index: u32,
    name: String,
}

/// Pick the camera matching `position` by name, falling back to the first one.
fn select_camera(cameras: &[CameraEntry], position: DevicePosition) -> Option<&CameraEntry> {
    let keywords: &[&str] = match position {
        DevicePosition::Back => &["back", "rear", "world"],
        DevicePosition::Front => &["front", "facetime", "user"],
        DevicePosition::Unspecified => &[],
    };

    cameras
        .iter()
        .find(|camera| {
            let name = camera.name.to_lowercase();
            keywords.iter().any(|k| name.contains(k))
        })
        .or_else(|| cameras.first())
}

#[cfg(feature = "camera")]
fn list_cameras() -> Vec<CameraEntry> {
    use nokhwa::utils::{ApiBackend, CameraIndex};

    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .enumerate()
            .map(|(position, info)| {
                let index = match info.index() {
                    CameraIndex::Index(i) => *i,
                    CameraIndex::String(s) => s.parse().unwrap_or(position as u32),
                };
                CameraEntry {
                    index,
                    name: info.human_name(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

#[cfg(not(feature = "camera"))]
fn list_cameras() -> Vec<CameraEntry> {
    #[cfg(target_os = "linux")]
    {
        (0..4)
            .filter(|i| std::path::Path::new(&format!("/dev/video{i}")).exists())
            .map(|index| CameraEntry {
                index,
                name: format!("/dev/video{index}"),
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        vec![CameraEntry {
            index: 0,
            name: "Default Camera".to_string(),
        }]
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Vec::new()
    }
}

#[cfg(feature = "microphone")]
fn default_microphone_name() -> Option<String> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let device = host.default_input_device()?;
    match device.name() {
        Ok(name) => Some(name),
        Err(e) => {
            tracing::warn!("Default input device has no name: {}", e);
            Some("default".to_string())
        }
    }
}

#[cfg(not(feature = "microphone"))]
fn default_microphone_name() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let cards = std::fs::read_to_string("/proc/asound/cards").unwrap_or_default();
        if cards.trim().is_empty() || cards.contains("no soundcards") {
            None
        } else {
            Some("default".to_string())
        }
    }

    #[cfg(target_os = "macos")]
    {
        Some("default".to_string())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Input format and target for a camera on this platform
fn camera_input(camera: &CameraEntry) -> Option<(&'static str, String)> {
    if cfg!(target_os = "linux") {
        Some(("v4l2", format!("/dev/video{}", camera.index)))
    } else if cfg!(target_os = "macos") {
        Some(("avfoundation", format!("{}:none", camera.index)))
    } else if cfg!(target_os = "windows") {
        Some(("dshow", format!("video={}", camera.name)))
    } else {
        None
    }
}

/// Input format and target for a microphone on this platform
fn microphone_input(name: &str) -> Option<(&'static str, String)> {
    if cfg!(target_os = "linux") {
        Some(("alsa", "default".to_string()))
    } else if cfg!(target_os = "macos") {
        Some(("avfoundation", "none:0".to_string()))
    } else if cfg!(target_os = "windows") {
        Some(("dshow", format!("audio={}", name)))
    } else {
        None
    }
}

/// Default devices of the host machine
#[derive(Debug, Clone)]
pub struct SystemDeviceProvider {
    resolution: Resolution,
    frame_rate: u32,
}

impl SystemDeviceProvider {
    pub fn new(resolution: Resolution, frame_rate: u32) -> Self {
        Self {
            resolution,
            frame_rate,
        }
    }
}

impl DeviceProvider for SystemDeviceProvider {
    fn default_video(&self, position: DevicePosition) -> CaptureResult<Arc<dyn CaptureDevice>> {
        let cameras = list_cameras();
        let camera = select_camera(&cameras, position)
            .ok_or_else(|| CaptureError::DeviceUnavailable("no camera found".to_string()))?;

        let (format, target) = camera_input(camera).ok_or_else(|| {
            CaptureError::DeviceUnavailable("camera capture unsupported on this platform".to_string())
        })?;

        Ok(Arc::new(PlatformDevice {
            info: DeviceInfo {
                id: target.clone(),
                name: camera.name.clone(),
                kind: MediaKind::Video,
                position,
                resolution: Some(self.resolution),
                frame_rate: Some(self.frame_rate),
            },
            format,
            target,
        }))
    }

    fn default_audio(&self) -> CaptureResult<Arc<dyn CaptureDevice>> {
        let name = default_microphone_name()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no microphone found".to_string()))?;

        let (format, target) = microphone_input(&name).ok_or_else(|| {
            CaptureError::DeviceUnavailable("audio capture unsupported on this platform".to_string())
        })?;

        Ok(Arc::new(PlatformDevice {
            info: DeviceInfo {
                id: target.clone(),
                name,
                kind: MediaKind::Audio,
                position: DevicePosition::Unspecified,
                resolution: None,
                frame_rate: None,
            },
            format,
            target,
        }))
    }
}
