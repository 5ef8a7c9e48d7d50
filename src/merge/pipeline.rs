//! Merge pipeline orchestration
//!
//! Validates a ledger snapshot, concatenates it into a partial file and only
//! moves that file into place once FFmpeg has succeeded.

use crate::events::SessionEvent;
use crate::merge::ffmpeg::Concatenator;
use crate::merge::types::{MergeError, MergeOptions, MergeOutput, MergeProgress, MergeResult};
use crate::recorder::Segment;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

/// Hidden sibling of `output` that receives samples until the merge succeeds
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "merged".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mov".to_string());
    output.with_file_name(format!(".{name}.partial.{ext}"))
}

/// Check every segment file before any output is allocated
fn validate_segments(segments: &[Segment]) -> Result<(), MergeError> {
    for segment in segments {
        let readable = std::fs::metadata(&segment.location)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !readable {
            return Err(MergeError::UnreadableSegment {
                sequence: segment.sequence,
                path: segment.location.clone(),
            });
        }
    }
    Ok(())
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove partial output {:?}: {}", path, e);
        }
    }
}

struct EngineInner {
    concatenator: Arc<dyn Concatenator>,
    /// Cancel flag of the running merge; `None` while idle
    active: Mutex<Option<Arc<AtomicBool>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EngineInner {
    fn emit_progress(&self, progress: MergeProgress) {
        let _ = self.event_tx.send(SessionEvent::MergeProgress { progress });
    }

    async fn run(
        &self,
        segments: &[Segment],
        options: &MergeOptions,
        cancel: &AtomicBool,
    ) -> MergeResult {
        tracing::info!(
            "Merging {} segments into {:?}",
            segments.len(),
            options.output_path
        );
        self.emit_progress(MergeProgress::preparing());

        validate_segments(segments)?;

        if !options.overwrite && options.output_path.exists() {
            return Err(MergeError::OutputExists(options.output_path.clone()));
        }
        if let Some(parent) = options.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(MergeError::Cancelled);
        }

        let inputs: Vec<PathBuf> = segments.iter().map(|s| s.location.clone()).collect();
        let total_ms: u64 = segments.iter().filter_map(|s| s.duration_hint_ms).sum();
        let partial = partial_path(&options.output_path);

        let report = |written_ms: u64| {
            self.emit_progress(MergeProgress::concatenating(written_ms, total_ms));
        };
        let concatenated = self
            .concatenator
            .concat(&inputs, &partial, &report, cancel)
            .await;

        if let Err(e) = concatenated {
            remove_partial(&partial);
            return Err(e);
        }

        self.emit_progress(MergeProgress::finalizing());
        if let Err(e) = std::fs::metadata(&partial).map(|m| m.len()).and_then(|len| {
            if len == 0 {
                Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "merged output is empty",
                ))
            } else {
                std::fs::rename(&partial, &options.output_path)
            }
        }) {
            remove_partial(&partial);
            return Err(e.into());
        }

        let duration_ms = self
            .concatenator
            .probe_duration_ms(&options.output_path)
            .await;

        self.emit_progress(MergeProgress::complete());
        Ok(MergeOutput {
            output_location: options.output_path.clone(),
            segment_count: segments.len(),
            duration_ms,
        })
    }
}

/// Concatenates ledger snapshots into one output file
#[derive(Clone)]
pub struct MergeEngine {
    inner: Arc<EngineInner>,
}

impl MergeEngine {
    pub fn new(
        concatenator: Arc<dyn Concatenator>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                concatenator,
                active: Mutex::new(None),
                event_tx,
            }),
        }
    }

    pub fn is_merging(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Merge `segments`, in the given order, into `options.output_path`.
    ///
    /// The returned receiver resolves exactly once. An empty list or a merge
    /// already in flight is refused without touching the filesystem.
    /// Must be called inside a Tokio runtime.
    pub fn merge(&self, segments: Vec<Segment>, options: MergeOptions) -> oneshot::Receiver<MergeResult> {
        let (result_tx, result_rx) = oneshot::channel();

        if segments.is_empty() {
            self.finish(result_tx, Err(MergeError::NoSegmentsAvailable));
            return result_rx;
        }

        let cancel = {
            let mut active = self.inner.active.lock();
            if active.is_some() {
                drop(active);
                tracing::warn!("Merge requested while another merge is running");
                self.finish(result_tx, Err(MergeError::MergeInProgress));
                return result_rx;
            }
            let cancel = Arc::new(AtomicBool::new(false));
            *active = Some(cancel.clone());
            cancel
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.inner.run(&segments, &options, &cancel).await;
            *engine.inner.active.lock() = None;
            engine.finish(result_tx, result);
        });

        result_rx
    }

    /// Ask the running merge to stop. Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.inner.active.lock().as_ref() {
            Some(cancel) => {
                tracing::info!("Cancelling merge");
                cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn finish(&self, result_tx: oneshot::Sender<MergeResult>, result: MergeResult) {
        let event = match &result {
            Ok(output) => {
                tracing::info!(
                    "Merge complete: {} segments -> {:?}",
                    output.segment_count,
                    output.output_location
                );
                SessionEvent::MergeCompleted {
                    output: output.output_location.clone(),
                }
            }
            Err(e) => {
                tracing::error!("Merge failed: {}", e);
                self.inner.emit_progress(MergeProgress::error(e.to_string()));
                SessionEvent::MergeFailed {
                    reason: e.to_string(),
                }
            }
        };
        let _ = self.inner.event_tx.send(event);
        let _ = result_tx.send(result);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingConcatenator;
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    fn write_segment(dir: &Path, sequence: u64, body: &str) -> Segment {
        let path = dir.join(format!("{sequence}.mov"));
        std::fs::write(&path, body).unwrap();
        Segment::new(sequence, path, Some(Duration::from_secs(1)))
    }

    fn engine(concatenator: Arc<RecordingConcatenator>) -> (MergeEngine, broadcast::Receiver<SessionEvent>) {
        let (event_tx, events) = broadcast::channel(64);
        (MergeEngine::new(concatenator, event_tx), events)
    }

    #[tokio::test]
    async fn test_empty_merge_reports_no_segments_without_io() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        let (engine, _events) = engine(concatenator.clone());

        let output = dir.path().join("out").join("merged.mov");
        let result = engine.merge(Vec::new(), MergeOptions::new(&output)).await.unwrap();

        assert!(matches!(result, Err(MergeError::NoSegmentsAvailable)));
        assert!(concatenator.calls.lock().is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_merge_follows_ledger_order() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        let (engine, _events) = engine(concatenator.clone());

        let s1 = write_segment(dir.path(), 1, "one");
        let s2 = write_segment(dir.path(), 2, "two");
        let s3 = write_segment(dir.path(), 3, "three");
        let output = dir.path().join("merged.mov");

        let merged = engine
            .merge(vec![s1.clone(), s2.clone(), s3.clone()], MergeOptions::new(&output))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.segment_count, 3);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "one\ntwo\nthree");

        engine
            .merge(vec![s3, s1, s2], MergeOptions::new(&output))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "three\none\ntwo");
    }

    #[tokio::test]
    async fn test_repeated_merge_gives_identical_result() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        let (engine, _events) = engine(concatenator.clone());

        let segments = vec![write_segment(dir.path(), 1, "a"), write_segment(dir.path(), 2, "b")];
        let output = dir.path().join("merged.mov");

        let first = engine
            .merge(segments.clone(), MergeOptions::new(&output))
            .await
            .unwrap()
            .unwrap();
        let first_bytes = std::fs::read(&output).unwrap();
        let second = engine
            .merge(segments, MergeOptions::new(&output))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first_bytes, std::fs::read(&output).unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_segment_fails_without_output() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        let (engine, _events) = engine(concatenator.clone());

        let good = write_segment(dir.path(), 1, "a");
        let missing = Segment::new(2, dir.path().join("gone.mov"), None);
        let output = dir.path().join("merged.mov");

        let result = engine
            .merge(vec![good, missing], MergeOptions::new(&output))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(MergeError::UnreadableSegment { sequence: 2, .. })
        ));
        assert!(!output.exists());
        assert!(concatenator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_concat_removes_partial_output() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        concatenator.fail.store(true, Ordering::SeqCst);
        let (engine, mut events) = engine(concatenator.clone());

        let output = dir.path().join("merged.mov");
        let result = engine
            .merge(vec![write_segment(dir.path(), 1, "a")], MergeOptions::new(&output))
            .await
            .unwrap();

        assert!(matches!(result, Err(MergeError::Ffmpeg(_))));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, SessionEvent::MergeFailed { .. });
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_concurrent_merge_is_rejected() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let concatenator = Arc::new(RecordingConcatenator {
            gate: Some(gate.clone()),
            ..RecordingConcatenator::default()
        });
        let (engine, _events) = engine(concatenator);

        let segments = vec![write_segment(dir.path(), 1, "a")];
        let output = dir.path().join("merged.mov");

        let first = engine.merge(segments.clone(), MergeOptions::new(&output));
        let second = engine.merge(segments, MergeOptions::new(&output)).await.unwrap();
        assert!(matches!(second, Err(MergeError::MergeInProgress)));

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(!engine.is_merging());
    }

    #[tokio::test]
    async fn test_cancel_stops_running_merge() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator {
            gate: Some(Arc::new(Notify::new())),
            ..RecordingConcatenator::default()
        });
        let (engine, _events) = engine(concatenator);

        let output = dir.path().join("merged.mov");
        let pending = engine.merge(vec![write_segment(dir.path(), 1, "a")], MergeOptions::new(&output));
        assert!(engine.cancel());

        assert!(matches!(pending.await.unwrap(), Err(MergeError::Cancelled)));
        assert!(!output.exists());
        assert!(!engine.cancel());
    }

    #[tokio::test]
    async fn test_rejected_concurrent_merge_emits_failure_event() {
        let dir = tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let concatenator = Arc::new(RecordingConcatenator {
            gate: Some(gate.clone()),
            ..RecordingConcatenator::default()
        });
        let (engine, mut events) = engine(concatenator);

        let segments = vec![write_segment(dir.path(), 1, "a")];
        let output = dir.path().join("merged.mov");
        let first = engine.merge(segments.clone(), MergeOptions::new(&output));
        while events.try_recv().is_ok() {}

        let second = engine.merge(segments, MergeOptions::new(&output)).await.unwrap();
        assert!(matches!(second, Err(MergeError::MergeInProgress)));

        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::MergeFailed { reason } = event {
                failures.push(reason);
            }
        }
        assert_eq!(failures, vec![MergeError::MergeInProgress.to_string()]);

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_before_merge_runs_skips_concat() {
        let dir = tempdir().unwrap();
        let concatenator = Arc::new(RecordingConcatenator::default());
        let (engine, _events) = engine(concatenator.clone());

        let segments = vec![write_segment(dir.path(), 1, "a")];
        let output = dir.path().join("merged.mov");

        let cancelled = engine.merge(segments.clone(), MergeOptions::new(&output));
        assert!(engine.cancel());
        assert!(matches!(cancelled.await.unwrap(), Err(MergeError::Cancelled)));
        assert!(concatenator.calls.lock().is_empty());

        // The next merge gets a fresh flag
        let merged = engine.merge(segments, MergeOptions::new(&output)).await.unwrap();
        assert!(merged.is_ok());
        assert_eq!(concatenator.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_output_respected_without_overwrite() {
        let dir = tempdir().unwrap();
        let (engine, _events) = engine(Arc::new(RecordingConcatenator::default()));

        let output = dir.path().join("merged.mov");
        std::fs::write(&output, "keep").unwrap();
        let options = MergeOptions {
            output_path: output.clone(),
            overwrite: false,
        };

        let result = engine
            .merge(vec![write_segment(dir.path(), 1, "a")], options)
            .await
            .unwrap();
        assert!(matches!(result, Err(MergeError::OutputExists(_))));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "keep");
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let partial = partial_path(Path::new("/out/merged.mov"));
        assert_eq!(partial, PathBuf::from("/out/.merged.mov.partial.mov"));
    }
}
