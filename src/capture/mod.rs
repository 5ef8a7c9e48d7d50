//! Capture devices and the device session
//!
//! This module owns everything between the hardware and a segment file:
//! device discovery, the session lifecycle and the sink that writes samples.

pub mod ffmpeg_sink;
pub mod session;
pub mod synthetic;
pub mod system;
pub mod traits;

pub use ffmpeg_sink::{EncoderSettings, FfmpegSink, FfmpegSinkFactory};
pub use session::{DeviceSessionManager, SessionState, SinkCompletion};
pub use synthetic::SyntheticDeviceProvider;
pub use system::SystemDeviceProvider;
pub use traits::{
    Capabilities, CaptureDevice, CaptureError, CaptureResult, CaptureSink, DeviceInfo,
    DevicePosition, DeviceProvider, MediaKind, Resolution, SinkFactory, SinkReport,
};
