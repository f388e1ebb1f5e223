//! Concatenator: stream-copy first, full re-encode when that fails.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backend::MediaBackend;
use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::metrics::record_concat;
use crate::segment::RenderSettings;

/// Manifest file name inside the job temp dir.
pub const MANIFEST_FILE_NAME: &str = "concat_list.txt";

/// Which concat path produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatPath {
    /// Lossless stream copy
    StreamCopy,
    /// Re-encode at the job frame rate
    Reencode,
}

impl ConcatPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamCopy => "fast",
            Self::Reencode => "fallback",
        }
    }
}

/// Quote a path for the concat demuxer: `'` becomes `'\''`.
pub fn escape_manifest_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Manifest body, one `file '<absolute path>'` line per segment in order.
pub fn build_manifest(segments: &[PathBuf]) -> std::io::Result<String> {
    let mut manifest = String::new();
    for segment in segments {
        let absolute = std::path::absolute(segment)?;
        manifest.push_str("file '");
        manifest.push_str(&escape_manifest_path(&absolute));
        manifest.push_str("'\n");
    }
    Ok(manifest)
}

pub async fn write_manifest(manifest_path: &Path, segments: &[PathBuf]) -> MediaResult<()> {
    let body = build_manifest(segments)?;
    tokio::fs::write(manifest_path, body).await?;
    Ok(())
}

/// Join `segments` into `output`.
///
/// `manifest_path` must already be registered for cleanup by the caller.
/// When both paths fail the partial output is removed and the fallback's
/// diagnostic is returned as [`MediaError::ConcatFailed`].
pub async fn concat_segments(
    backend: &dyn MediaBackend,
    settings: &RenderSettings,
    segments: &[PathBuf],
    manifest_path: &Path,
    output: &Path,
    frame_rate: f64,
) -> MediaResult<ConcatPath> {
    if segments.is_empty() {
        return Err(MediaError::ConcatFailed("No segments to concatenate".to_string()));
    }
    write_manifest(manifest_path, segments).await?;

    let fast = FfmpegCommand::new(manifest_path, output)
        .concat_demuxer()
        .stream_copy()
        .threads(settings.threads)
        .operation("concat_copy");

    match backend.run_ffmpeg(&fast).await {
        Ok(()) => {
            info!(segments = segments.len(), "Concatenated with stream copy");
            record_concat(ConcatPath::StreamCopy.as_str());
            return Ok(ConcatPath::StreamCopy);
        }
        Err(e) => {
            warn!(
                segments = segments.len(),
                "Stream-copy concat failed, re-encoding: {}",
                e.summary()
            );
        }
    }

    let reencode = FfmpegCommand::new(manifest_path, output)
        .concat_demuxer()
        .video_codec(settings.video_codec.clone())
        .frame_rate(frame_rate)
        .no_audio()
        .threads(settings.threads)
        .operation("concat_reencode");

    match backend.run_ffmpeg(&reencode).await {
        Ok(()) => {
            info!(segments = segments.len(), "Concatenated with re-encode");
            record_concat(ConcatPath::Reencode.as_str());
            Ok(ConcatPath::Reencode)
        }
        Err(e) => {
            record_concat("failed");
            if let Err(remove_err) = tokio::fs::remove_file(output).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(output = %output.display(), "Failed to remove partial output: {}", remove_err);
                }
            }
            Err(MediaError::ConcatFailed(e.summary()))
        }
    }
}
