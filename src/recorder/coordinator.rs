//! Segment recorder
//!
//! Drives one capture-to-file operation at a time against the device
//! session's sink and appends each successful take to the ledger.

use super::ledger::{LedgerError, SegmentLedger};
use super::state::{RecorderState, Segment};
use crate::capture::traits::{verify_output, CaptureError, CaptureResult, SinkFactory, SinkReport};
use crate::capture::DeviceSessionManager;
use crate::events::SessionEvent;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Recorder errors
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("A segment is already being recorded")]
    RecordingInProgress,

    #[error("Segment {sequence} could not be written: {reason}")]
    SegmentWriteFailure { sequence: u64, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// A segment that has started recording
///
/// `completion` resolves exactly once, after the segment file is closed.
#[derive(Debug)]
pub struct PendingSegment {
    pub sequence: u64,
    pub location: PathBuf,
    pub completion: oneshot::Receiver<RecorderResult<Segment>>,
}

impl PendingSegment {
    /// Wait for the segment to be finalized
    pub async fn wait(self) -> RecorderResult<Segment> {
        let sequence = self.sequence;
        self.completion
            .await
            .unwrap_or_else(|_| {
                Err(RecorderError::SegmentWriteFailure {
                    sequence,
                    reason: "recorder dropped before completion".to_string(),
                })
            })
    }
}

struct RecorderInner {
    devices: Arc<Mutex<DeviceSessionManager>>,
    sinks: Arc<dyn SinkFactory>,
    ledger: Arc<Mutex<SegmentLedger>>,
    state: RwLock<RecorderState>,
    next_sequence: AtomicU64,
    segment_dir: RwLock<PathBuf>,
    extension: String,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl RecorderInner {
    /// Runs once per segment, when its sink has stopped.
    fn complete(
        &self,
        sequence: u64,
        location: PathBuf,
        outcome: CaptureResult<SinkReport>,
    ) -> RecorderResult<Segment> {
        self.devices.lock().release_sink(&location);

        let written = outcome.and_then(|report| {
            verify_output(&report.location)?;
            Ok(report)
        });

        let result = match written {
            Ok(report) => {
                let segment = Segment::new(sequence, location.clone(), Some(report.elapsed));
                self.ledger
                    .lock()
                    .append(segment.clone())
                    .map(|()| segment)
                    .map_err(RecorderError::from)
            }
            Err(e) => Err(RecorderError::SegmentWriteFailure {
                sequence,
                reason: e.to_string(),
            }),
        };

        match &result {
            Ok(segment) => {
                tracing::info!(
                    "Segment {} recorded: {:?} ({:?}ms)",
                    sequence,
                    segment.location,
                    segment.duration_hint_ms
                );
                let _ = self.event_tx.send(SessionEvent::SegmentCompleted {
                    segment: segment.clone(),
                });
            }
            Err(e) => {
                tracing::error!("Segment {} failed: {}", sequence, e);
                discard_file(&location);
                let _ = self.event_tx.send(SessionEvent::SegmentFailed {
                    sequence,
                    reason: e.to_string(),
                });
            }
        }

        *self.state.write() = RecorderState::Idle;
        result
    }
}

fn discard_file(location: &Path) {
    if location.exists() {
        if let Err(e) = std::fs::remove_file(location) {
            tracing::warn!("Failed to remove {:?}: {}", location, e);
        }
    }
}

/// Records segments one at a time
#[derive(Clone)]
pub struct SegmentRecorder {
    inner: Arc<RecorderInner>,
}

impl SegmentRecorder {
    pub fn new(
        devices: Arc<Mutex<DeviceSessionManager>>,
        sinks: Arc<dyn SinkFactory>,
        ledger: Arc<Mutex<SegmentLedger>>,
        segment_dir: PathBuf,
        extension: impl Into<String>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                devices,
                sinks,
                ledger,
                state: RwLock::new(RecorderState::Idle),
                next_sequence: AtomicU64::new(1),
                segment_dir: RwLock::new(segment_dir),
                extension: extension.into(),
                event_tx,
            }),
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.inner.state.read()
    }

    pub fn segment_dir(&self) -> PathBuf {
        self.inner.segment_dir.read().clone()
    }

    /// Start recording a new segment into a fresh file.
    ///
    /// Only valid while idle; otherwise nothing changes and
    /// `RecordingInProgress` is returned. Must be called inside a Tokio runtime.
    pub fn begin_segment(&self) -> RecorderResult<PendingSegment> {
        let mut state = self.inner.state.write();
        if *state != RecorderState::Idle {
            tracing::debug!("begin_segment ignored while {:?}", *state);
            return Err(RecorderError::RecordingInProgress);
        }

        // Consumed even if this attempt fails
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst);
        let location = self
            .inner
            .segment_dir
            .read()
            .join(format!("{}.{}", Uuid::new_v4(), self.inner.extension));

        let sink = self.inner.sinks.create(location.clone());
        let sink_done = self.inner.devices.lock().attach_sink(sink).map_err(|e| {
            tracing::error!("Segment {} could not attach its sink: {}", sequence, e);
            RecorderError::SegmentWriteFailure {
                sequence,
                reason: e.to_string(),
            }
        })?;

        *state = RecorderState::Recording;
        drop(state);

        tracing::info!("Recording segment {} to {:?}", sequence, location);
        let _ = self
            .inner
            .event_tx
            .send(SessionEvent::SegmentStarted { sequence });

        let (completion_tx, completion_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let segment_location = location.clone();
        tokio::spawn(async move {
            let outcome = sink_done
                .await
                .unwrap_or(Err(CaptureError::SinkNotStarted));
            let result = inner.complete(sequence, segment_location, outcome);
            let _ = completion_tx.send(result);
        });

        Ok(PendingSegment {
            sequence,
            location,
            completion: completion_rx,
        })
    }

    /// Ask the current segment to finalize. Returns `false` when not recording.
    pub fn end_segment(&self) -> bool {
        let mut state = self.inner.state.write();
        if *state != RecorderState::Recording {
            tracing::debug!("end_segment ignored while {:?}", *state);
            return false;
        }

        *state = RecorderState::Finalizing;
        self.inner.devices.lock().finalize_sink();
        tracing::info!("Finalizing segment");
        true
    }

    /// Prepare for a brand-new session: sequence numbers restart at 1.
    ///
    /// The caller clears the ledger. Refused while a segment is in flight.
    pub fn reset(&self, segment_dir: Option<PathBuf>) -> RecorderResult<()> {
        let state = self.inner.state.read();
        if *state != RecorderState::Idle {
            return Err(RecorderError::RecordingInProgress);
        }

        self.inner.next_sequence.store(1, Ordering::SeqCst);
        if let Some(dir) = segment_dir {
            *self.inner.segment_dir.write() = dir;
        }
        Ok(())
    }
}
