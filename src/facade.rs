//! Session facade
//!
//! The surface the presentation layer talks to: start the camera, record
//! takes, merge them. Owns the process-scoped segment storage.

use crate::capture::{
    Capabilities, DeviceProvider, DeviceSessionManager, EncoderSettings, FfmpegSinkFactory,
    SessionState, SinkFactory, SyntheticDeviceProvider, SystemDeviceProvider,
};
use crate::config::{DeviceBackend, SessionConfig};
use crate::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::merge::{
    Concatenator, FfmpegConcatenator, MergeEngine, MergeError, MergeOptions, MergeResult,
};
use crate::recorder::{PendingSegment, RecorderState, Segment, SegmentLedger, SegmentRecorder};
use crate::utils::error::AppResult;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Where segment files live for the current process
enum SegmentStorage {
    /// Removed together with the facade
    Temporary(TempDir),
    /// Caller-provided directory
    Fixed(PathBuf),
}

impl SegmentStorage {
    fn path(&self) -> &Path {
        match self {
            SegmentStorage::Temporary(dir) => dir.path(),
            SegmentStorage::Fixed(path) => path,
        }
    }
}

/// Coordinates recording and merging for one user-facing session
pub struct SessionFacade {
    config: SessionConfig,
    devices: Arc<Mutex<DeviceSessionManager>>,
    ledger: Arc<Mutex<SegmentLedger>>,
    recorder: SegmentRecorder,
    merger: MergeEngine,
    event_tx: broadcast::Sender<SessionEvent>,
    session_id: RwLock<Uuid>,
    // Declared last so segment files outlive everything writing to them
    storage: SegmentStorage,
}

impl SessionFacade {
    /// Build the FFmpeg-backed stack described by `config`
    pub fn new(config: SessionConfig) -> AppResult<Self> {
        config.validate()?;

        let provider: Arc<dyn DeviceProvider> = match config.device_backend {
            DeviceBackend::System => {
                Arc::new(SystemDeviceProvider::new(config.resolution, config.frame_rate))
            }
            DeviceBackend::Synthetic => {
                Arc::new(SyntheticDeviceProvider::new(config.resolution, config.frame_rate))
            }
        };
        let sinks = Arc::new(FfmpegSinkFactory::new(EncoderSettings {
            ffmpeg_path: config.ffmpeg_path.clone(),
            frame_rate: config.frame_rate,
            finalize_timeout: config.finalize_timeout(),
        }));
        let concatenator = Arc::new(FfmpegConcatenator::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        ));

        Self::with_parts(config, provider, sinks, concatenator)
    }

    /// Build a facade from explicit collaborators
    pub fn with_parts(
        config: SessionConfig,
        provider: Arc<dyn DeviceProvider>,
        sinks: Arc<dyn SinkFactory>,
        concatenator: Arc<dyn Concatenator>,
    ) -> AppResult<Self> {
        let storage = match &config.segment_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                SegmentStorage::Fixed(dir.clone())
            }
            None => SegmentStorage::Temporary(
                tempfile::Builder::new().prefix("multitake-").tempdir()?,
            ),
        };

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let devices = Arc::new(Mutex::new(DeviceSessionManager::new(
            provider,
            config.video_position,
        )));
        let ledger = Arc::new(Mutex::new(SegmentLedger::new()));
        let recorder = SegmentRecorder::new(
            devices.clone(),
            sinks,
            ledger.clone(),
            storage.path().to_path_buf(),
            config.container.extension(),
            event_tx.clone(),
        );
        let merger = MergeEngine::new(concatenator, event_tx.clone());
        let session_id = Uuid::new_v4();

        tracing::info!(
            "Session {} storing segments in {:?}",
            session_id,
            storage.path()
        );

        Ok(Self {
            config,
            devices,
            ledger,
            recorder,
            merger,
            event_tx,
            session_id: RwLock::new(session_id),
            storage,
        })
    }

    pub fn session_id(&self) -> Uuid {
        *self.session_id.read()
    }

    pub fn segment_dir(&self) -> &Path {
        self.storage.path()
    }

    /// Subscribe to recording and merge events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Acquire the default devices and start the capture session.
    ///
    /// Missing devices reduce capability instead of failing. Repeated calls
    /// have no further effect.
    pub fn configure_and_start(&self) -> AppResult<Capabilities> {
        let mut devices = self.devices.lock();
        let caps = devices.configure();
        devices.start()?;
        Ok(caps)
    }

    /// Stop the capture session; an in-flight segment still completes
    pub fn stop(&self) {
        self.devices.lock().stop();
    }

    pub fn session_state(&self) -> SessionState {
        self.devices.lock().state()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.devices.lock().capabilities()
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    pub fn begin_segment(&self) -> AppResult<PendingSegment> {
        Ok(self.recorder.begin_segment()?)
    }

    pub fn end_segment(&self) -> bool {
        self.recorder.end_segment()
    }

    /// Segments recorded so far, in recording order
    pub fn segments(&self) -> Vec<Segment> {
        self.ledger.lock().snapshot()
    }

    /// Where `request_merge` writes for the current session
    pub fn default_output_path(&self) -> PathBuf {
        self.config.output_dir().join(format!(
            "merged-{}.{}",
            self.session_id(),
            self.config.container.extension()
        ))
    }

    /// Merge the current ledger into the default output location
    pub fn request_merge(&self) -> oneshot::Receiver<MergeResult> {
        self.request_merge_to(self.default_output_path())
    }

    /// Merge the current ledger into `output_path`
    pub fn request_merge_to(&self, output_path: impl Into<PathBuf>) -> oneshot::Receiver<MergeResult> {
        // Held until the merge is registered so a reset cannot slip in between
        let ledger = self.ledger.lock();
        self.merger.merge(ledger.snapshot(), MergeOptions::new(output_path))
    }

    /// Merge into the default location and wait for the result
    pub async fn merge(&self) -> MergeResult {
        self.request_merge()
            .await
            .unwrap_or(Err(MergeError::Cancelled))
    }

    pub fn cancel_merge(&self) -> bool {
        self.merger.cancel()
    }

    pub fn is_merging(&self) -> bool {
        self.merger.is_merging()
    }

    /// Start a brand-new session: forget and delete every recorded segment.
    pub fn reset_session(&self) -> AppResult<()> {
        let mut ledger = self.ledger.lock();
        if self.merger.is_merging() {
            return Err(MergeError::MergeInProgress.into());
        }
        self.recorder.reset(None)?;

        for segment in ledger.snapshot() {
            if let Err(e) = std::fs::remove_file(&segment.location) {
                tracing::warn!("Failed to remove segment {:?}: {}", segment.location, e);
            }
        }
        ledger.clear();

        let session_id = Uuid::new_v4();
        *self.session_id.write() = session_id;
        tracing::info!("Started new session {}", session_id);
        Ok(())
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.devices.lock().stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::session::testing::{FakeProvider, FakeSinkFactory};
    use crate::merge::pipeline::testing::RecordingConcatenator;
    use crate::utils::error::AppError;
    use tempfile::tempdir;

    struct Rig {
        facade: SessionFacade,
        provider: Arc<FakeProvider>,
        concatenator: Arc<RecordingConcatenator>,
        _output: TempDir,
    }

    fn rig_with(video: bool, audio: bool, sinks: FakeSinkFactory) -> Rig {
        let output = tempdir().unwrap();
        let config = SessionConfig {
            output_dir: Some(output.path().to_path_buf()),
            ..SessionConfig::default()
        };
        let provider = Arc::new(FakeProvider::new(video, audio));
        let concatenator = Arc::new(RecordingConcatenator::default());
        let facade = SessionFacade::with_parts(
            config,
            provider.clone(),
            Arc::new(sinks),
            concatenator.clone(),
        )
        .unwrap();
        Rig {
            facade,
            provider,
            concatenator,
            _output: output,
        }
    }

    fn rig() -> Rig {
        rig_with(true, true, FakeSinkFactory::default())
    }

    async fn record(facade: &SessionFacade) -> AppResult<Segment> {
        let pending = facade.begin_segment()?;
        facade.end_segment();
        Ok(pending.wait().await?)
    }

    #[tokio::test]
    async fn test_configure_and_start_is_idempotent() {
        let rig = rig();
        let first = rig.facade.configure_and_start().unwrap();
        let second = rig.facade.configure_and_start().unwrap();

        assert_eq!(first, second);
        assert_eq!(rig.facade.session_state(), SessionState::Running);
        assert_eq!(
            rig.provider.video_requests.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_record_two_then_merge_twice() {
        let rig = rig();
        rig.facade.configure_and_start().unwrap();

        let a = record(&rig.facade).await.unwrap();
        let b = record(&rig.facade).await.unwrap();

        let first = rig.facade.merge().await.unwrap();
        let second = rig.facade.merge().await.unwrap();

        assert_eq!(first.output_location, rig.facade.default_output_path());
        assert_eq!(first, second);
        assert_eq!(first.segment_count, 2);

        let calls = rig.concatenator.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec![a.location.clone(), b.location.clone()]);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_merge_with_no_segments() {
        let rig = rig();
        rig.facade.configure_and_start().unwrap();

        let result = rig.facade.merge().await;
        assert!(matches!(result, Err(MergeError::NoSegmentsAvailable)));
        assert!(!rig.facade.default_output_path().exists());
    }

    #[tokio::test]
    async fn test_merge_does_not_clear_ledger() {
        let rig = rig();
        rig.facade.configure_and_start().unwrap();
        record(&rig.facade).await.unwrap();

        rig.facade.merge().await.unwrap();
        assert_eq!(rig.facade.segments().len(), 1);
    }

    #[tokio::test]
    async fn test_audio_only_session_still_records() {
        let rig = rig_with(false, true, FakeSinkFactory::default());
        let caps = rig.facade.configure_and_start().unwrap();
        assert!(!caps.video);
        assert!(caps.audio);

        let segment = record(&rig.facade).await.unwrap();
        assert_eq!(std::fs::read_to_string(&segment.location).unwrap(), "mic0");
    }

    #[tokio::test]
    async fn test_failed_take_is_reported_and_skipped() {
        let rig = rig_with(true, true, FakeSinkFactory::failing_at(&[0]));
        rig.facade.configure_and_start().unwrap();

        let failed = record(&rig.facade).await;
        assert!(matches!(failed, Err(AppError::Recording(_))));

        let segment = record(&rig.facade).await.unwrap();
        assert_eq!(segment.sequence, 2);
        assert_eq!(rig.facade.segments(), vec![segment]);
    }

    #[tokio::test]
    async fn test_reset_session_deletes_segments() {
        let rig = rig();
        rig.facade.configure_and_start().unwrap();
        let segment = record(&rig.facade).await.unwrap();
        let old_output = rig.facade.default_output_path();

        rig.facade.reset_session().unwrap();

        assert!(rig.facade.segments().is_empty());
        assert!(!segment.location.exists());
        assert_ne!(rig.facade.default_output_path(), old_output);
        assert_eq!(record(&rig.facade).await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_reset_refused_mid_recording() {
        let rig = rig();
        rig.facade.configure_and_start().unwrap();
        let _pending = rig.facade.begin_segment().unwrap();

        assert!(rig.facade.reset_session().is_err());
    }

    #[tokio::test]
    async fn test_reset_refused_while_merging() {
        let output = tempdir().unwrap();
        let gate = Arc::new(tokio::sync::Notify::new());
        let concatenator = Arc::new(RecordingConcatenator {
            gate: Some(gate.clone()),
            ..RecordingConcatenator::default()
        });
        let facade = SessionFacade::with_parts(
            SessionConfig {
                output_dir: Some(output.path().to_path_buf()),
                ..SessionConfig::default()
            },
            Arc::new(FakeProvider::new(true, true)),
            Arc::new(FakeSinkFactory::default()),
            concatenator,
        )
        .unwrap();
        facade.configure_and_start().unwrap();
        let segment = record(&facade).await.unwrap();

        let pending = facade.request_merge();
        assert!(matches!(
            facade.reset_session(),
            Err(AppError::Merge(MergeError::MergeInProgress))
        ));
        assert!(segment.location.exists());
        assert_eq!(facade.segments().len(), 1);

        gate.notify_one();
        assert!(pending.await.unwrap().is_ok());
        facade.reset_session().unwrap();
        assert!(!segment.location.exists());
    }

    #[tokio::test]
    async fn test_events_cover_segment_and_merge() {
        let rig = rig();
        let mut events = rig.facade.subscribe();
        rig.facade.configure_and_start().unwrap();

        record(&rig.facade).await.unwrap();
        rig.facade.merge().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::SegmentStarted { .. } => kinds.push("started"),
                SessionEvent::SegmentCompleted { .. } => kinds.push("completed"),
                SessionEvent::MergeCompleted { .. } => kinds.push("merged"),
                _ => {}
            }
        }
        assert_eq!(kinds, ["started", "completed", "merged"]);
    }

    #[tokio::test]
    async fn test_temporary_storage_removed_on_drop() {
        let rig = rig();
        let dir = rig.facade.segment_dir().to_path_buf();
        assert!(dir.exists());

        drop(rig.facade);
        assert!(!dir.exists());
    }

    #[test]
    fn test_fixed_segment_dir_is_created() {
        let root = tempdir().unwrap();
        let segment_dir = root.path().join("takes");
        let config = SessionConfig {
            segment_dir: Some(segment_dir.clone()),
            ..SessionConfig::default()
        };

        let facade = SessionFacade::with_parts(
            config,
            Arc::new(FakeProvider::new(true, true)),
            Arc::new(FakeSinkFactory::default()),
            Arc::new(RecordingConcatenator::default()),
        )
        .unwrap();
        assert_eq!(facade.segment_dir(), segment_dir.as_path());
        assert!(segment_dir.is_dir());
    }
}
