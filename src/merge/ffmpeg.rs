//! FFmpeg concatenation for merge
//!
//! Segments are joined with the concat demuxer and stream copy, so encoded
//! samples are never re-encoded and each segment's timeline starts where the
//! previous one ended.

use crate::merge::types::MergeError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// How often a running merge checks its cancel flag
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Joins segment files, in the given order, into one output file
#[async_trait]
pub trait Concatenator: Send + Sync {
    /// Concatenate `inputs` into `output`. `progress` receives the output
    /// timestamp written so far, in milliseconds.
    async fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
        cancel: &AtomicBool,
    ) -> Result<(), MergeError>;

    /// Duration of a media file, if it can be determined
    async fn probe_duration_ms(&self, _path: &Path) -> Option<f64> {
        None
    }
}

/// Escape a path for a single-quoted ffconcat `file` directive
fn quote_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Build an ffconcat document listing `inputs` in order
pub fn build_concat_list(inputs: &[PathBuf]) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for input in inputs {
        list.push_str("file ");
        list.push_str(&quote_path(input));
        list.push('\n');
    }
    list
}

/// FFmpeg arguments for a stream-copy concat of `list` into `output`
pub fn build_concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v?".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// One meaningful line of `-progress` output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLine {
    /// Output timestamp reached, in milliseconds
    OutTime(u64),
    /// FFmpeg finished writing
    End,
}

/// Parse a `key=value` line of FFmpeg `-progress` output
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // Both keys carry microseconds
        "out_time_us" | "out_time_ms" => value.parse::<u64>().ok().map(|us| ProgressLine::OutTime(us / 1000)),
        "progress" if value == "end" => Some(ProgressLine::End),
        _ => None,
    }
}

/// Concatenator backed by the `ffmpeg` and `ffprobe` executables
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl Default for FfmpegConcatenator {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegConcatenator {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn write_list(&self, inputs: &[PathBuf], output: &Path) -> Result<tempfile::NamedTempFile, MergeError> {
        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut list = tempfile::Builder::new()
            .prefix(".concat-")
            .suffix(".txt")
            .tempfile_in(dir)?;
        list.write_all(build_concat_list(inputs).as_bytes())?;
        list.flush()?;
        Ok(list)
    }
}

#[async_trait]
impl Concatenator for FfmpegConcatenator {
    async fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
        cancel: &AtomicBool,
    ) -> Result<(), MergeError> {
        let list = self.write_list(inputs, output)?;
        let args = build_concat_args(list.path(), output);
        tracing::info!("Starting FFmpeg concat: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MergeError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MergeError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!("Cancelling FFmpeg concat");
                child.kill().await?;
                return Err(MergeError::Cancelled);
            }

            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => match parse_progress_line(&line) {
                        Some(ProgressLine::OutTime(ms)) => progress(ms),
                        Some(ProgressLine::End) | None => {}
                    },
                    None => break,
                },
                _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(MergeError::Ffmpeg(format!(
                "concat exited with {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn probe_duration_ms(&self, path: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            tracing::warn!("ffprobe failed for {:?}", path);
            return None;
        }

        let duration_secs: f64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
        Some(duration_secs * 1000.0)
    }
}
