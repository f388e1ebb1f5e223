//! Segment renderer: one trimmed, normalized, silent clip per part.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::artifacts::TempArtifacts;
use crate::backend::MediaBackend;
use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Slack allowed when comparing a requested end against the probed duration.
const RANGE_TOLERANCE_SECS: f64 = 1e-3;

/// Length of the tail fade-to-black.
const FADE_OUT_SECS: f64 = 1.0;

/// Encoding settings shared by every segment of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Output width in pixels; height follows the first segment's aspect ratio
    pub target_width: u32,
    /// Frame rate used when the first source reports none
    pub fallback_fps: f64,
    /// Video encoder for segments and the re-encode concat path
    pub video_codec: String,
    pub pixel_format: String,
    /// Encoder and filter graph threads per invocation
    pub threads: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            target_width: 1440,
            fallback_fps: 30.0,
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            threads: 1,
        }
    }
}

/// Job-wide render targets, threaded through every segment call.
///
/// The first source opened fixes the frame rate and the first segment that
/// renders fixes the dimensions. Later segments are resampled and resized
/// to match, never the reverse, so the stream-copy concat sees identical
/// stream parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderState {
    frame_rate: Option<f64>,
    frame_dimensions: Option<(u32, u32)>,
    segments: Vec<PathBuf>,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    pub fn frame_dimensions(&self) -> Option<(u32, u32)> {
        self.frame_dimensions
    }

    /// Rendered segments in part order.
    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    /// Target frame rate, or `fallback` when no source was ever opened.
    pub fn frame_rate_or(&self, fallback: f64) -> f64 {
        self.frame_rate.unwrap_or(fallback)
    }
}

/// Deterministic file name for the segment at `index`.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{}.mp4", index)
}

/// Dimensions after scaling `width x height` to `target_width`.
///
/// Height keeps the aspect ratio and is rounded to an even number.
pub fn scaled_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    if width == 0 {
        return (target_width, target_width);
    }
    let exact = target_width as f64 * height as f64 / width as f64;
    let even = ((exact / 2.0).round() as u32 * 2).max(2);
    (target_width, even)
}

/// Filter chain: tail fade-to-black, scale to `dimensions`, square pixels.
pub fn build_segment_filter(segment_secs: f64, dimensions: (u32, u32)) -> String {
    let fade = FADE_OUT_SECS.min(segment_secs);
    let start = (segment_secs - fade).max(0.0);
    format!(
        "fade=t=out:st={:.3}:d={:.3},scale={}:{},setsar=1",
        start, fade, dimensions.0, dimensions.1
    )
}

/// Render `[start_secs, end_secs)` of `source` into the segment for `index`.
///
/// The segment path is registered with `artifacts` before ffmpeg starts, so
/// a partial file is cleaned up with the rest of the job.
#[allow(clippy::too_many_arguments)]
pub async fn render_segment(
    backend: &dyn MediaBackend,
    settings: &RenderSettings,
    state: &mut RenderState,
    artifacts: &mut TempArtifacts,
    index: usize,
    source: &Path,
    start_secs: f64,
    end_secs: f64,
) -> MediaResult<PathBuf> {
    let info = match backend.probe_source(source).await {
        Ok(info) => info,
        Err(e @ (MediaError::FileNotFound(_) | MediaError::SourceUnreadable(_))) => return Err(e),
        Err(e) => {
            return Err(MediaError::source_unreadable(format!(
                "{}: {}",
                source.display(),
                e.summary()
            )))
        }
    };

    if state.frame_rate.is_none() {
        let fps = info.fps.unwrap_or(settings.fallback_fps);
        info!(index, fps, native = info.fps.is_some(), "Job frame rate fixed");
        state.frame_rate = Some(fps);
    }
    let fps = state.frame_rate_or(settings.fallback_fps);

    if start_secs < 0.0
        || start_secs >= end_secs
        || end_secs > info.duration + RANGE_TOLERANCE_SECS
    {
        return Err(MediaError::InvalidRange {
            start: start_secs,
            end: end_secs,
            source_duration: info.duration,
        });
    }

    let natural = scaled_dimensions(info.width, info.height, settings.target_width);
    let dimensions = match state.frame_dimensions {
        Some(target) => {
            if target != natural {
                debug!(
                    index,
                    from = ?natural,
                    to = ?target,
                    "Forcing segment to job dimensions"
                );
            }
            target
        }
        None => natural,
    };

    let length = end_secs - start_secs;
    let output = artifacts.register(&segment_file_name(index));
    let cmd = FfmpegCommand::new(source, &output)
        .log_level("error")
        .seek(start_secs)
        .duration(length)
        .video_filter(build_segment_filter(length, dimensions))
        .frame_rate(fps)
        .no_audio()
        .video_codec(settings.video_codec.clone())
        .pixel_format(settings.pixel_format.clone())
        .threads(settings.threads)
        .filter_threads(settings.threads)
        .operation("render_segment");

    backend.run_ffmpeg(&cmd).await?;

    if state.frame_dimensions.is_none() {
        info!(index, width = dimensions.0, height = dimensions.1, "Job dimensions fixed");
        state.frame_dimensions = Some(dimensions);
    }
    state.segments.push(output.clone());
    Ok(output)
}
