//! Assembly pipeline: render every part, concatenate, probe the result.
//!
//! `NotStarted -> Rendering -> Concatenating -> Done`, with a jump to `Done`
//! on any job-level failure. Temp artifacts are released on every path into
//! `Done`. The pipeline never touches the video record; the caller maps the
//! [`Outcome`] onto the record's status.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use reel_models::{id_file_key, VideoJob};

use crate::artifacts::TempArtifacts;
use crate::backend::MediaBackend;
use crate::concat::{concat_segments, ConcatPath, MANIFEST_FILE_NAME};
use crate::error::MediaError;
use crate::metrics::{record_segment_rendered, record_segment_skipped};
use crate::segment::{render_segment, RenderSettings, RenderState};

/// Where the pipeline reads, works and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root for job temp dirs
    pub work_dir: PathBuf,
    /// Directory receiving final outputs
    pub output_dir: PathBuf,
    /// Base for relative part locations
    pub input_root: PathBuf,
    pub render: RenderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/reelmaker"),
            output_dir: PathBuf::from("./outputs"),
            input_root: PathBuf::from("."),
            render: RenderSettings::default(),
        }
    }
}

/// Job-level failures. `Display` is the reason shown to users.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unable to prepare job workspace: {0}")]
    Workspace(std::io::Error),

    #[error("No clips were generated from the inputs.")]
    NoSegmentsRendered,

    #[error("Video concatenation failed: {0}")]
    Concat(String),

    #[error("Output file was not created")]
    OutputMissing,

    #[error("Unable to read output duration")]
    OutputProbe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        output_path: PathBuf,
        duration_seconds: f64,
        segments_rendered: usize,
        concat_path: ConcatPath,
    },
    Failure {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure reason, `None` on success.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failure { reason } => Some(reason),
            Self::Success { .. } => None,
        }
    }
}

/// Orchestrator stages, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    NotStarted,
    Rendering,
    Concatenating,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Rendering => "rendering",
            Self::Concatenating => "concatenating",
            Self::Done => "done",
        }
    }
}

/// Renders [`VideoJob`]s through a [`MediaBackend`].
#[derive(Clone)]
pub struct AssemblyPipeline {
    backend: Arc<dyn MediaBackend>,
    config: PipelineConfig,
}

impl AssemblyPipeline {
    pub fn new(backend: Arc<dyn MediaBackend>, config: PipelineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Final output path for `job`.
    pub fn output_path(&self, job: &VideoJob) -> PathBuf {
        self.config.output_dir.join(&job.output_file_name)
    }

    /// Temp dir owned by `job`, keyed by its video id.
    pub fn temp_dir(&self, job: &VideoJob) -> PathBuf {
        self.config.work_dir.join(id_file_key(&job.video_id))
    }

    fn resolve_source(&self, source: &Path) -> PathBuf {
        if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.config.input_root.join(source)
        }
    }

    /// Render `job` into its output file.
    pub async fn render(&self, job: &VideoJob) -> Outcome {
        let started = Instant::now();
        info!(
            video_id = %job.video_id,
            parts = job.parts.len(),
            requested_secs = job.requested_duration(),
            "Starting assembly"
        );

        let outcome = match self.run(job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let PipelineError::OutputProbe(detail) = &e {
                    warn!(video_id = %job.video_id, "Output probe failed: {}", detail);
                }
                Outcome::Failure {
                    reason: e.to_string(),
                }
            }
        };

        self.enter(job, PipelineStage::Done);
        match &outcome {
            Outcome::Success {
                duration_seconds,
                segments_rendered,
                ..
            } => info!(
                video_id = %job.video_id,
                segments = segments_rendered,
                duration_secs = duration_seconds,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Assembly succeeded"
            ),
            Outcome::Failure { reason } => warn!(
                video_id = %job.video_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Assembly failed: {}",
                reason
            ),
        }
        outcome
    }

    async fn run(&self, job: &VideoJob) -> Result<Outcome, PipelineError> {
        self.enter(job, PipelineStage::NotStarted);
        let mut artifacts = TempArtifacts::create(self.temp_dir(job))
            .await
            .map_err(PipelineError::Workspace)?;

        let result = self.run_stages(job, &mut artifacts).await;

        let report = artifacts.cleanup().await;
        if !report.failed.is_empty() {
            warn!(
                video_id = %job.video_id,
                failed = report.failed.len(),
                "Some temp artifacts could not be removed"
            );
        }
        result
    }

    async fn run_stages(
        &self,
        job: &VideoJob,
        artifacts: &mut TempArtifacts,
    ) -> Result<Outcome, PipelineError> {
        let settings = &self.config.render;
        let mut state = RenderState::new();

        self.enter(job, PipelineStage::Rendering);
        for (index, part) in job.parts.iter().enumerate() {
            let source = self.resolve_source(&part.source_path);
            match render_segment(
                self.backend.as_ref(),
                settings,
                &mut state,
                artifacts,
                index,
                &source,
                part.start_seconds,
                part.end_seconds,
            )
            .await
            {
                Ok(path) => {
                    record_segment_rendered();
                    debug!(video_id = %job.video_id, index, segment = %path.display(), "Segment rendered");
                }
                Err(e) => {
                    record_segment_skipped(skip_reason(&e));
                    warn!(
                        video_id = %job.video_id,
                        index,
                        source = %source.display(),
                        "Skipping part: {}",
                        e
                    );
                }
            }
        }

        if state.segments().is_empty() {
            return Err(PipelineError::NoSegmentsRendered);
        }

        self.enter(job, PipelineStage::Concatenating);
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let output = self.output_path(job);
        let manifest = artifacts.register(MANIFEST_FILE_NAME);
        let fps = state.frame_rate_or(settings.fallback_fps);

        let concat_path = concat_segments(
            self.backend.as_ref(),
            settings,
            state.segments(),
            &manifest,
            &output,
            fps,
        )
        .await
        .map_err(|e| match e {
            MediaError::ConcatFailed(diagnostic) => PipelineError::Concat(diagnostic),
            MediaError::Io(io) => PipelineError::Io(io),
            other => PipelineError::Concat(other.summary()),
        })?;

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(PipelineError::OutputMissing);
        }

        let duration_seconds = self
            .backend
            .probe_duration(&output)
            .await
            .map_err(|e| PipelineError::OutputProbe(e.summary()))?;

        Ok(Outcome::Success {
            output_path: output,
            duration_seconds,
            segments_rendered: state.segments().len(),
            concat_path,
        })
    }

    fn enter(&self, job: &VideoJob, stage: PipelineStage) {
        debug!(video_id = %job.video_id, stage = stage.as_str(), "Pipeline stage");
    }
}

fn skip_reason(err: &MediaError) -> &'static str {
    match err {
        MediaError::FileNotFound(_) => "not_found",
        MediaError::SourceUnreadable(_) => "unreadable",
        MediaError::InvalidRange { .. } => "range",
        MediaError::Timeout(_) => "timeout",
        _ => "encode",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::SourceInfo;
    use crate::testing::ScriptedBackend;
    use reel_models::{PartSpec, VideoId};
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
            }
        }

        fn input(&self, name: &str) -> PathBuf {
            let dir = self.root.path().join("inputs");
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            std::fs::write(&path, b"source").unwrap();
            path
        }

        fn config(&self) -> PipelineConfig {
            PipelineConfig {
                work_dir: self.root.path().join("work"),
                output_dir: self.root.path().join("outputs"),
                input_root: self.root.path().join("inputs"),
                render: RenderSettings::default(),
            }
        }

        fn pipeline(&self, backend: ScriptedBackend) -> (AssemblyPipeline, Arc<ScriptedBackend>) {
            let backend = Arc::new(backend);
            (AssemblyPipeline::new(backend.clone(), self.config()), backend)
        }

        fn job_dir(&self, video_id: &str) -> PathBuf {
            self.root.path().join("work").join(video_id)
        }
    }

    fn hd(duration: f64) -> SourceInfo {
        SourceInfo {
            duration,
            width: 1920,
            height: 1080,
            fps: Some(25.0),
        }
    }

    fn job(parts: Vec<PartSpec>) -> VideoJob {
        VideoJob::new(VideoId::from("vid1"), parts, "Trip_vid1.mp4")
    }

    fn segment_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_temp_dirs_are_distinct_per_video() {
        let fx = Fixture::new();
        let (pipeline, _) = fx.pipeline(ScriptedBackend::new());
        let dirs: std::collections::HashSet<_> = ["a-b", "a.b", "a b", "a_b"]
            .iter()
            .map(|id| pipeline.temp_dir(&VideoJob::new(VideoId::from(*id), vec![], "x.mp4")))
            .collect();
        assert_eq!(dirs.len(), 4);
        for dir in &dirs {
            assert_eq!(dir.parent(), Some(fx.root.path().join("work").as_path()));
        }
    }

    #[tokio::test]
    async fn test_three_parts_render_matching_segments() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let (pipeline, backend) = fx.pipeline(ScriptedBackend::new().with_source(&src, hd(12.0)));

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&src, 0.0, 5.0),
                PartSpec::new(&src, 5.0, 10.0),
                PartSpec::new(&src, 2.0, 4.0),
            ]))
            .await;

        let Outcome::Success {
            output_path,
            duration_seconds,
            segments_rendered,
            concat_path,
        } = outcome
        else {
            panic!("expected success");
        };
        assert_eq!(segments_rendered, 3);
        assert_eq!(concat_path, ConcatPath::StreamCopy);
        assert_eq!(duration_seconds, 12.0);
        assert_eq!(output_path, fx.root.path().join("outputs/Trip_vid1.mp4"));

        let lines = segment_lines(&output_path);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("ss=0.000 t=5.000"));
        assert!(lines[1].contains("ss=5.000 t=5.000"));
        assert!(lines[2].contains("ss=2.000 t=2.000"));
        for line in &lines {
            assert!(line.contains("scale=1440:810"), "{}", line);
            assert!(line.ends_with("r=25"), "{}", line);
        }
        assert_eq!(
            backend.operations(),
            vec!["render_segment", "render_segment", "render_segment", "concat_copy"]
        );
    }

    #[tokio::test]
    async fn test_later_segments_forced_to_first_dimensions_and_rate() {
        let fx = Fixture::new();
        let wide = fx.input("wide.mp4");
        let tall = fx.input("tall.mp4");
        let backend = ScriptedBackend::new().with_source(&wide, hd(10.0)).with_source(
            &tall,
            SourceInfo {
                duration: 10.0,
                width: 1080,
                height: 1920,
                fps: Some(60.0),
            },
        );
        let (pipeline, _) = fx.pipeline(backend);

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&wide, 0.0, 3.0),
                PartSpec::new(&tall, 0.0, 3.0),
            ]))
            .await;

        let Outcome::Success { output_path, .. } = outcome else {
            panic!("expected success");
        };
        let lines = segment_lines(&output_path);
        assert!(lines[1].contains("src=tall.mp4"));
        assert!(lines[1].contains("scale=1440:810"));
        assert!(lines[1].ends_with("r=25"));
    }

    #[tokio::test]
    async fn test_invalid_middle_part_is_skipped() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let missing = fx.root.path().join("inputs/missing.mp4");
        let (pipeline, _) = fx.pipeline(ScriptedBackend::new().with_source(&src, hd(12.0)));

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&src, 0.0, 5.0),
                PartSpec::new(&missing, 0.0, 5.0),
                PartSpec::new(&src, 2.0, 4.0),
            ]))
            .await;

        let Outcome::Success {
            output_path,
            segments_rendered,
            duration_seconds,
            ..
        } = outcome
        else {
            panic!("expected success");
        };
        assert_eq!(segments_rendered, 2);
        assert_eq!(duration_seconds, 7.0);
        assert_eq!(segment_lines(&output_path).len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_and_failed_encode_are_skipped() {
        let fx = Fixture::new();
        let good = fx.input("good.mp4");
        let broken = fx.input("broken.mp4");
        let backend = ScriptedBackend::new()
            .with_source(&good, hd(12.0))
            .with_source(&broken, hd(12.0))
            .fail_render(&broken);
        let (pipeline, _) = fx.pipeline(backend);

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&good, 10.0, 20.0),
                PartSpec::new(&broken, 0.0, 5.0),
                PartSpec::new(&good, 0.0, 12.0),
            ]))
            .await;

        assert!(outcome.is_success(), "{:?}", outcome);
        if let Outcome::Success { segments_rendered, .. } = outcome {
            assert_eq!(segments_rendered, 1);
        }
    }

    #[tokio::test]
    async fn test_zero_valid_parts_fails_and_removes_temp_dir() {
        let fx = Fixture::new();
        let unreadable = fx.input("corrupt.mp4");
        let (pipeline, backend) = fx.pipeline(ScriptedBackend::new());

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&unreadable, 0.0, 5.0),
                PartSpec::new("nowhere.mp4", 0.0, 5.0),
            ]))
            .await;

        assert_eq!(outcome.reason(), Some("No clips were generated from the inputs."));
        assert!(!fx.job_dir("vid1").exists());
        assert!(backend.operations().is_empty());
        assert!(!fx.root.path().join("outputs/Trip_vid1.mp4").exists());
    }

    #[tokio::test]
    async fn test_fast_path_failure_falls_back_to_reencode() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let (pipeline, backend) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&src, hd(12.0))
                .fail_stream_copy(),
        );

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&src, 0.0, 5.0),
                PartSpec::new(&src, 5.0, 10.0),
            ]))
            .await;

        let Outcome::Success { concat_path, output_path, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(concat_path, ConcatPath::Reencode);
        assert_eq!(segment_lines(&output_path).len(), 2);

        let calls = backend.calls();
        let reencode = calls.iter().find(|c| c.operation == "concat_reencode").unwrap();
        let args = &reencode.args;
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(&args[..i], &["-y", "-f", "concat", "-safe", "0"]);
        assert_eq!(
            &args[i + 2..args.len() - 1],
            &["-c:v", "libx264", "-r", "25", "-an", "-threads", "1"]
        );
    }

    #[tokio::test]
    async fn test_both_concat_paths_failing_reports_diagnostic() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let (pipeline, _) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&src, hd(12.0))
                .fail_stream_copy()
                .fail_reencode(),
        );

        let outcome = pipeline.render(&job(vec![PartSpec::new(&src, 0.0, 5.0)])).await;

        assert_eq!(
            outcome.reason(),
            Some("Video concatenation failed: [concat] concat_reencode: codec parameters mismatch")
        );
        assert!(!fx.root.path().join("outputs/Trip_vid1.mp4").exists());
        assert!(!fx.job_dir("vid1").exists());
    }

    #[tokio::test]
    async fn test_missing_output_and_probe_failure() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let parts = vec![PartSpec::new(&src, 0.0, 5.0)];

        let (pipeline, _) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&src, hd(12.0))
                .skip_concat_output(),
        );
        let outcome = pipeline.render(&job(parts.clone())).await;
        assert_eq!(outcome.reason(), Some("Output file was not created"));

        let (pipeline, _) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&src, hd(12.0))
                .fail_output_probe(),
        );
        let outcome = pipeline.render(&job(parts)).await;
        assert_eq!(outcome.reason(), Some("Unable to read output duration"));
    }

    #[tokio::test]
    async fn test_no_temp_files_remain_after_success() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let (pipeline, _) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&src, hd(12.0))
                .fail_stream_copy(),
        );

        let outcome = pipeline
            .render(&job(vec![
                PartSpec::new(&src, 0.0, 5.0),
                PartSpec::new(&src, 5.0, 10.0),
            ]))
            .await;

        assert!(outcome.is_success());
        assert!(!fx.job_dir("vid1").exists());
        assert!(std::fs::read_dir(fx.root.path().join("work"))
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_second_run_overwrites_first() {
        let fx = Fixture::new();
        let first = fx.input("first.mp4");
        let second = fx.input("second.mp4");
        let (pipeline, _) = fx.pipeline(
            ScriptedBackend::new()
                .with_source(&first, hd(12.0))
                .with_source(&second, hd(12.0)),
        );

        pipeline
            .render(&job(vec![
                PartSpec::new(&first, 0.0, 5.0),
                PartSpec::new(&first, 5.0, 10.0),
                PartSpec::new(&first, 2.0, 4.0),
            ]))
            .await;
        let outcome = pipeline.render(&job(vec![PartSpec::new(&second, 1.0, 3.0)])).await;

        let Outcome::Success { output_path, .. } = outcome else {
            panic!("expected success");
        };
        let lines = segment_lines(&output_path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("src=second.mp4"));
    }

    #[tokio::test]
    async fn test_relative_sources_resolve_against_input_root() {
        let fx = Fixture::new();
        let src = fx.input("clip.mp4");
        let (pipeline, _) = fx.pipeline(ScriptedBackend::new().with_source(&src, hd(12.0)));

        let outcome = pipeline.render(&job(vec![PartSpec::new("clip.mp4", 0.0, 2.0)])).await;
        assert!(outcome.is_success(), "{:?}", outcome);
    }

    #[tokio::test]
    async fn test_missing_frame_rate_uses_fallback() {
        let fx = Fixture::new();
        let src = fx.input("a.mp4");
        let info = SourceInfo {
            fps: None,
            ..hd(12.0)
        };
        let (pipeline, _) = fx.pipeline(ScriptedBackend::new().with_source(&src, info));

        let outcome = pipeline.render(&job(vec![PartSpec::new(&src, 0.0, 2.0)])).await;
        let Outcome::Success { output_path, .. } = outcome else {
            panic!("expected success");
        };
        assert!(segment_lines(&output_path)[0].ends_with("r=30"));
    }
}
