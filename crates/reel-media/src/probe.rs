//! FFprobe source inspection and the duration prober.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::command::{output_with_timeout, stderr_tail};
use crate::error::{MediaError, MediaResult};
use crate::metrics::record_tool_duration;

/// What the renderer needs to know about a source before cutting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Container duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native frame rate, `None` when the stream does not report one
    pub fps: Option<f64>,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Spawns `ffprobe` with an optional per-invocation timeout.
#[derive(Debug, Clone)]
pub struct Prober {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
            timeout: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read a file's duration in seconds.
    ///
    /// One process per call, no retry.
    pub async fn probe_duration(&self, path: &Path) -> MediaResult<f64> {
        ensure_exists(path).await?;

        let mut command = Command::new(&self.binary);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path);

        let stdout = self.run(command, "probe_duration").await?;
        parse_duration_output(&stdout)
    }

    /// Inspect a source's duration, dimensions and frame rate.
    pub async fn probe_source(&self, path: &Path) -> MediaResult<SourceInfo> {
        ensure_exists(path).await?;

        let mut command = Command::new(&self.binary);
        command
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path);

        let stdout = self.run(command, "probe_source").await?;
        parse_source_info(&stdout)
    }

    async fn run(&self, command: Command, operation: &'static str) -> MediaResult<Vec<u8>> {
        let started = Instant::now();
        let output = output_with_timeout(command, self.timeout).await;
        record_tool_duration(operation, started.elapsed().as_secs_f64());

        let output = match output {
            Ok(output) => output,
            Err(MediaError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::FfprobeNotFound)
            }
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            return Err(MediaError::ffprobe_failed(
                format!("FFprobe exited with {}", output.status),
                Some(stderr_tail(&output.stderr, 20)),
            ));
        }
        Ok(output.stdout)
    }
}

async fn ensure_exists(path: &Path) -> MediaResult<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

/// Parse the bare number printed by the duration probe.
pub fn parse_duration_output(stdout: &[u8]) -> MediaResult<f64> {
    let text = String::from_utf8_lossy(stdout);
    let value = text.trim();
    if value.is_empty() {
        return Err(MediaError::ffprobe_failed("FFprobe printed no duration", None));
    }
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(MediaError::ffprobe_failed(
            format!("Unparsable duration '{}'", value),
            None,
        )),
    }
}

/// Parse ffprobe's JSON report into [`SourceInfo`].
pub fn parse_source_info(stdout: &[u8]) -> MediaResult<SourceInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::source_unreadable("No video stream found"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(MediaError::source_unreadable("Video stream has no dimensions")),
    };

    // Container duration first, stream duration for containers that omit it
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| MediaError::source_unreadable("Source reports no duration"))?;

    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

    Ok(SourceInfo {
        duration,
        width,
        height,
        fps,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
///
/// `0/0` and other non-positive rates count as unreported.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.trim().parse().ok()?
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_parse_duration_output() {
        assert_eq!(parse_duration_output(b"12.345000\n").unwrap(), 12.345);
        assert!(matches!(
            parse_duration_output(b""),
            Err(MediaError::FfprobeFailed { .. })
        ));
        assert!(matches!(
            parse_duration_output(b"N/A\n"),
            Err(MediaError::FfprobeFailed { .. })
        ));
        assert!(parse_duration_output(b"-1").is_err());
    }

    #[test]
    fn test_parse_source_info() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "r_frame_rate": "0/0"},
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001"}
            ],
            "format": {"duration": "12.000000"}
        }"#;

        let info = parse_source_info(json).unwrap();
        assert_eq!(info.duration, 12.0);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_source_info_without_rate_or_video() {
        let no_rate = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480,
                         "avg_frame_rate": "0/0", "duration": "3.5"}],
            "format": {}
        }"#;
        let info = parse_source_info(no_rate).unwrap();
        assert_eq!(info.fps, None);
        assert_eq!(info.duration, 3.5);

        let audio_only = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "1"}}"#;
        assert!(matches!(
            parse_source_info(audio_only),
            Err(MediaError::SourceUnreadable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let prober = Prober::new();
        let path = Path::new("/nonexistent/clip.mp4");
        assert!(matches!(
            prober.probe_duration(path).await,
            Err(MediaError::FileNotFound(_))
        ));
        assert!(matches!(
            prober.probe_source(path).await,
            Err(MediaError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_existing_file_passes_existence_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        assert!(matches!(
            ensure_exists(&path).await,
            Err(MediaError::FileNotFound(p)) if p == path
        ));
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(ensure_exists(&path).await.is_ok());
    }
}
