//! The seam between the pipeline and the external media tools.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::{Prober, SourceInfo};

/// External media operations the pipeline depends on.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Inspect a source's duration, dimensions and native frame rate.
    async fn probe_source(&self, path: &Path) -> MediaResult<SourceInfo>;

    /// Read a file's duration in seconds.
    async fn probe_duration(&self, path: &Path) -> MediaResult<f64>;

    /// Run one ffmpeg invocation to completion.
    async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()>;
}

/// Production backend spawning `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    runner: FfmpegRunner,
    prober: Prober,
}

impl FfmpegBackend {
    /// Locate both tools on PATH and apply the per-invocation timeout.
    pub fn detect(timeout: Option<Duration>) -> MediaResult<Self> {
        let ffmpeg = check_ffmpeg()?;
        let ffprobe = check_ffprobe()?;
        info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            timeout_secs = timeout.map(|t| t.as_secs()),
            "Media tools detected"
        );

        let mut runner = FfmpegRunner::new().with_binary(ffmpeg);
        let mut prober = Prober::new().with_binary(ffprobe);
        if let Some(timeout) = timeout {
            runner = runner.with_timeout(timeout);
            prober = prober.with_timeout(timeout);
        }
        Ok(Self { runner, prober })
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe_source(&self, path: &Path) -> MediaResult<SourceInfo> {
        self.prober.probe_source(path).await
    }

    async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        self.prober.probe_duration(path).await
    }

    async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.runner.run(cmd).await
    }
}
