//! Device session management
//!
//! Owns the capture devices and the single active sink. Samples only flow
//! into a sink while the session is running.

use super::traits::{
    Capabilities, CaptureDevice, CaptureError, CaptureResult, CaptureSink, DevicePosition,
    DeviceProvider, MediaKind, SinkReport,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lifecycle of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Unconfigured
    }
}

/// Resolves exactly once when the attached sink is done.
pub type SinkCompletion = oneshot::Receiver<CaptureResult<SinkReport>>;

struct AttachedSink {
    sink: Arc<dyn CaptureSink>,
    /// Taken when delivery starts; still present means the sink never opened.
    done_tx: Option<oneshot::Sender<CaptureResult<SinkReport>>>,
    stop_tx: Option<oneshot::Sender<()>>,
    finished: Arc<AtomicBool>,
}

impl AttachedSink {
    fn is_live(&self) -> bool {
        self.done_tx.is_none() && !self.finished.load(Ordering::SeqCst)
    }

    fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    /// Deliver the terminal notification for a sink that never opened.
    fn abandon(&mut self) {
        if let Some(done_tx) = self.done_tx.take() {
            self.finished.store(true, Ordering::SeqCst);
            let _ = done_tx.send(Err(CaptureError::SinkNotStarted));
        }
    }
}

/// Owns capture devices and the one sink that may receive their samples
pub struct DeviceSessionManager {
    provider: Arc<dyn DeviceProvider>,
    video_position: DevicePosition,
    state: SessionState,
    devices: Vec<Arc<dyn CaptureDevice>>,
    sink: Option<AttachedSink>,
}

impl DeviceSessionManager {
    pub fn new(provider: Arc<dyn DeviceProvider>, video_position: DevicePosition) -> Self {
        Self {
            provider,
            video_position,
            state: SessionState::Unconfigured,
            devices: Vec::new(),
            sink: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Media kinds the configured devices can capture
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::default();
        for device in &self.devices {
            match device.info().kind {
                MediaKind::Video => caps.video = true,
                MediaKind::Audio => caps.audio = true,
            }
        }
        caps
    }

    /// Acquire the default video and audio devices.
    ///
    /// Each acquisition is best-effort: an unavailable device is logged and
    /// skipped. Calling this on an already configured session does nothing.
    pub fn configure(&mut self) -> Capabilities {
        if self.state != SessionState::Unconfigured {
            tracing::debug!("Capture session already configured");
            return self.capabilities();
        }

        match self.provider.default_video(self.video_position) {
            Ok(device) => {
                tracing::info!("Acquired video device: {}", device.info().name);
                self.devices.push(device);
            }
            Err(e) => tracing::warn!("Continuing without video: {}", e),
        }

        match self.provider.default_audio() {
            Ok(device) => {
                tracing::info!("Acquired audio device: {}", device.info().name);
                self.devices.push(device);
            }
            Err(e) => tracing::warn!("Continuing without audio: {}", e),
        }

        self.state = SessionState::Configured;
        let caps = self.capabilities();
        tracing::info!(
            "Capture session configured (video={}, audio={})",
            caps.video,
            caps.audio
        );
        caps
    }

    /// Start delivering samples. Opens a sink that was attached while stopped.
    pub fn start(&mut self) -> CaptureResult<()> {
        match self.state {
            SessionState::Unconfigured => return Err(CaptureError::NotConfigured),
            SessionState::Running => {
                tracing::debug!("Capture session already running");
                return Ok(());
            }
            SessionState::Configured | SessionState::Stopped => {}
        }

        self.state = SessionState::Running;
        tracing::info!("Capture session running");

        if let Some(attached) = self.sink.as_mut() {
            Self::open(attached, &self.devices);
        }
        Ok(())
    }

    /// Halt delivery. An active sink is asked to finalize its file.
    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            tracing::debug!("Capture session not running");
            return;
        }

        if let Some(attached) = self.sink.as_mut() {
            attached.request_stop();
        }
        self.state = SessionState::Stopped;
        tracing::info!("Capture session stopped");
    }

    /// Install `sink` as the single output.
    ///
    /// Replacing a sink that is still receiving samples is refused with
    /// `SinkBusy`. The returned receiver resolves exactly once.
    pub fn attach_sink(&mut self, sink: Arc<dyn CaptureSink>) -> CaptureResult<SinkCompletion> {
        if self.sink.as_ref().is_some_and(AttachedSink::is_live) {
            return Err(CaptureError::SinkBusy);
        }
        self.detach_sink();

        let (done_tx, done_rx) = oneshot::channel();
        let mut attached = AttachedSink {
            sink,
            done_tx: Some(done_tx),
            stop_tx: None,
            finished: Arc::new(AtomicBool::new(false)),
        };
        tracing::debug!("Attached sink: {:?}", attached.sink.location());

        if self.is_running() {
            Self::open(&mut attached, &self.devices);
        }
        self.sink = Some(attached);
        Ok(done_rx)
    }

    /// Remove the current sink, stopping it if it is still receiving samples.
    pub fn detach_sink(&mut self) -> Option<Arc<dyn CaptureSink>> {
        let mut attached = self.sink.take()?;
        attached.request_stop();
        attached.abandon();
        tracing::debug!("Detached sink: {:?}", attached.sink.location());
        Some(attached.sink)
    }

    /// Detach the current sink only if it writes to `location`.
    pub fn release_sink(&mut self, location: &Path) {
        if self
            .sink
            .as_ref()
            .is_some_and(|attached| attached.sink.location() == location)
        {
            self.detach_sink();
        }
    }

    /// Ask the active sink to close its file without detaching it.
    pub fn finalize_sink(&mut self) {
        match self.sink.as_mut() {
            Some(attached) if attached.done_tx.is_none() => attached.request_stop(),
            Some(attached) => attached.abandon(),
            None => {}
        }
    }

    fn open(attached: &mut AttachedSink, devices: &[Arc<dyn CaptureDevice>]) {
        let Some(done_tx) = attached.done_tx.take() else {
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        attached.stop_tx = Some(stop_tx);

        let sink = attached.sink.clone();
        let devices = devices.to_vec();
        let finished = attached.finished.clone();

        tracing::info!("Delivering samples to {:?}", sink.location());
        tokio::spawn(async move {
            let result = sink.run(devices, stop_rx).await;
            finished.store(true, Ordering::SeqCst);
            let _ = done_tx.send(result);
        });
    }
}

impl Drop for DeviceSessionManager {
    fn drop(&mut self) {
        self.detach_sink();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process devices and sinks for exercising the pipeline without ffmpeg.

    use super::super::traits::{DeviceInfo, SinkFactory};
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    pub struct FakeDevice {
        info: DeviceInfo,
    }

    impl CaptureDevice for FakeDevice {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn input_args(&self) -> Vec<String> {
            vec!["-i".to_string(), self.info.id.clone()]
        }
    }

    /// Provider whose devices can be switched off
    pub struct FakeProvider {
        pub video: bool,
        pub audio: bool,
        pub video_requests: AtomicUsize,
    }

    impl FakeProvider {
        pub fn new(video: bool, audio: bool) -> Self {
            Self {
                video,
                audio,
                video_requests: AtomicUsize::new(0),
            }
        }
    }

    impl DeviceProvider for FakeProvider {
        fn default_video(&self, position: DevicePosition) -> CaptureResult<Arc<dyn CaptureDevice>> {
            self.video_requests.fetch_add(1, Ordering::SeqCst);
            if !self.video {
                return Err(CaptureError::DeviceUnavailable("no camera".to_string()));
            }
            Ok(Arc::new(FakeDevice {
                info: DeviceInfo {
                    id: "cam0".to_string(),
                    name: "Fake Camera".to_string(),
                    kind: MediaKind::Video,
                    position,
                    resolution: None,
                    frame_rate: None,
                },
            }))
        }

        fn default_audio(&self) -> CaptureResult<Arc<dyn CaptureDevice>> {
            if !self.audio {
                return Err(CaptureError::DeviceUnavailable("no microphone".to_string()));
            }
            Ok(Arc::new(FakeDevice {
                info: DeviceInfo {
                    id: "mic0".to_string(),
                    name: "Fake Microphone".to_string(),
                    kind: MediaKind::Audio,
                    position: DevicePosition::Unspecified,
                    resolution: None,
                    frame_rate: None,
                },
            }))
        }
    }

    /// Sink that writes the attached device ids to its file when stopped
    pub struct FakeSink {
        location: PathBuf,
        fail: bool,
    }

    #[async_trait]
    impl CaptureSink for FakeSink {
        fn location(&self) -> &Path {
            &self.location
        }

        async fn run(
            &self,
            devices: Vec<Arc<dyn CaptureDevice>>,
            stop: oneshot::Receiver<()>,
        ) -> CaptureResult<SinkReport> {
            let started = Instant::now();
            let _ = stop.await;
            if self.fail {
                return Err(CaptureError::Ffmpeg("disk full".to_string()));
            }
            if devices.is_empty() {
                return Err(CaptureError::NoDevices);
            }
            let body: Vec<String> = devices.iter().map(|d| d.info().id.clone()).collect();
            std::fs::write(&self.location, body.join(","))?;
            Ok(SinkReport {
                location: self.location.clone(),
                bytes: std::fs::metadata(&self.location)?.len(),
                elapsed: started.elapsed(),
            })
        }
    }

    /// Creates fake sinks; sinks listed in `failing` (by creation index) fail
    #[derive(Default)]
    pub struct FakeSinkFactory {
        created: AtomicUsize,
        pub failing: Mutex<Vec<usize>>,
    }

    impl FakeSinkFactory {
        pub fn failing_at(indices: &[usize]) -> Self {
            Self {
                created: AtomicUsize::new(0),
                failing: Mutex::new(indices.to_vec()),
            }
        }
    }

    impl SinkFactory for FakeSinkFactory {
        fn create(&self, location: PathBuf) -> Arc<dyn CaptureSink> {
            let index = self.created.fetch_add(1, Ordering::SeqCst);
            Arc::new(FakeSink {
                location,
                fail: self.failing.lock().contains(&index),
            })
        }
    }

    pub fn fake_sink(location: PathBuf) -> Arc<dyn CaptureSink> {
        Arc::new(FakeSink {
            location,
            fail: false,
        })
    }
}
