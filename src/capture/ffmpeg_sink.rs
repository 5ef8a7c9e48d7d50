//! FFmpeg-backed capture sink
//!
//! Each segment is one FFmpeg process that opens the session's devices as
//! inputs and encodes them into a single container. Writing `q` on stdin makes
//! FFmpeg flush and close the file cleanly.

use super::traits::{
    verify_output, CaptureDevice, CaptureError, CaptureResult, CaptureSink, MediaKind, SinkFactory,
    SinkReport,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

/// Encoder settings shared by every segment of a session
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg_path: PathBuf,
    pub frame_rate: u32,
    pub finalize_timeout: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            frame_rate: 30,
            finalize_timeout: Duration::from_secs(5),
        }
    }
}

/// Build the FFmpeg command line for recording `devices` into `output`.
pub fn build_capture_args(
    devices: &[Arc<dyn CaptureDevice>],
    settings: &EncoderSettings,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    for device in devices {
        args.extend(device.input_args());
    }
    for index in 0..devices.len() {
        args.extend(["-map".to_string(), index.to_string()]);
    }

    let has_video = devices.iter().any(|d| d.info().kind == MediaKind::Video);
    let has_audio = devices.iter().any(|d| d.info().kind == MediaKind::Audio);

    if has_video {
        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-crf".to_string(),
            "18".to_string(),
            "-g".to_string(),
            settings.frame_rate.saturating_mul(2).to_string(), // GOP = 2 seconds
        ]);
    }
    if has_audio {
        args.extend([
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
        ]);
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// Records one segment file through an FFmpeg child process
pub struct FfmpegSink {
    location: PathBuf,
    settings: EncoderSettings,
}

impl FfmpegSink {
    pub fn new(location: PathBuf, settings: EncoderSettings) -> Self {
        Self { location, settings }
    }

    /// Ask FFmpeg to finish, killing it if it ignores the request.
    async fn finalize(&self, child: &mut Child) -> CaptureResult<ExitStatus> {
        if let Some(mut stdin) = child.stdin.take() {
            // A closed pipe means FFmpeg is already on its way out
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(self.settings.finalize_timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                tracing::warn!(
                    "FFmpeg did not finish {:?} within {:?}, killing it",
                    self.location,
                    self.settings.finalize_timeout
                );
                child.kill().await?;
                Ok(child.wait().await?)
            }
        }
    }
}

#[async_trait]
impl CaptureSink for FfmpegSink {
    fn location(&self) -> &Path {
        &self.location
    }

    async fn run(
        &self,
        devices: Vec<Arc<dyn CaptureDevice>>,
        stop: oneshot::Receiver<()>,
    ) -> CaptureResult<SinkReport> {
        if devices.is_empty() {
            return Err(CaptureError::NoDevices);
        }

        let args = build_capture_args(&devices, &self.settings, &self.location);
        tracing::info!("Starting FFmpeg capture: {:?}", args);

        let started = Instant::now();
        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        // Drain stderr so FFmpeg never blocks on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let status = tokio::select! {
            status = child.wait() => {
                let status = status?;
                tracing::warn!("FFmpeg capture exited before stop with {}", status);
                status
            }
            _ = stop => self.finalize(&mut child).await?,
        };
        let elapsed = started.elapsed();

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            // FFmpeg exits non-zero after `q` on some devices but the file is
            // still usable, so only the file check below is authoritative.
            tracing::warn!(
                "FFmpeg capture exited with status {}: {}",
                status,
                stderr.trim()
            );
        }

        let bytes = verify_output(&self.location).map_err(|e| match e {
            CaptureError::Io(_) if !stderr.trim().is_empty() => {
                CaptureError::Ffmpeg(stderr.trim().to_string())
            }
            other => other,
        })?;

        tracing::info!(
            "FFmpeg capture finished: {:?} ({} bytes, {:.2}s)",
            self.location,
            bytes,
            elapsed.as_secs_f64()
        );

        Ok(SinkReport {
            location: self.location.clone(),
            bytes,
            elapsed,
        })
    }
}

/// Creates FFmpeg sinks sharing one set of encoder settings
#[derive(Debug, Clone, Default)]
pub struct FfmpegSinkFactory {
    settings: EncoderSettings,
}

impl FfmpegSinkFactory {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn create(&self, location: PathBuf) -> Arc<dyn CaptureSink> {
        Arc::new(FfmpegSink::new(location, self.settings.clone()))
    }
}
