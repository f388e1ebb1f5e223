//! FFmpeg CLI wrapper and clip assembly pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with per-invocation timeouts
//! - FFprobe source inspection and the duration prober
//! - Segment rendering with job-wide dimension and frame rate targets
//! - Concatenation with a stream-copy fast path and re-encode fallback
//! - The assembly pipeline tying them together with guaranteed temp cleanup

pub mod artifacts;
pub mod backend;
pub mod command;
pub mod concat;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod segment;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use artifacts::{CleanupReport, TempArtifacts};
pub use backend::{FfmpegBackend, MediaBackend};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::{concat_segments, ConcatPath, MANIFEST_FILE_NAME};
pub use error::{MediaError, MediaResult};
pub use pipeline::{AssemblyPipeline, Outcome, PipelineConfig, PipelineError, PipelineStage};
pub use probe::{Prober, SourceInfo};
pub use segment::{render_segment, RenderSettings, RenderState};
