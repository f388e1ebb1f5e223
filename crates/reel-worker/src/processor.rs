//! Render job processing: the record state machine around the pipeline.
//!
//! ```text
//! queued ──validate──► processing ──render──► completed
//!   │                      │
//!   └── invalid parts ─────┴── any failure ──► failed
//! ```
//!
//! The processor is the only writer of a record while a job runs. Every
//! write goes through [`VideoRepository::apply`], which rejects it if the
//! record has moved on, so a duplicate delivery never clobbers another
//! worker's result. Writes carry the job id, so retrying one whose reply was
//! lost is accepted as already applied.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reel_media::{AssemblyPipeline, Outcome};
use reel_models::{
    format_hms, output_file_name, validate_parts, StatusUpdate, VideoJob, VideoRecord, VideoStatus,
};
use reel_queue::RenderVideoJob;
use reel_store::{StoreError, VideoRepository};

use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics::record_status_write_failure;
use crate::retry::{retry_async, RetryConfig};

/// Reason stored when the record vanished before the job ran.
pub const VIDEO_NOT_FOUND: &str = "Video not found";
/// Reason stored when the pipeline reported an output that is not on disk.
pub const OUTPUT_NOT_CREATED: &str = "Output file was not created";

/// What happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Record moved to `completed`.
    Completed {
        output_location: String,
        result_duration: String,
    },
    /// Record moved to `failed` with `reason`; `recorded` is false when no
    /// record could be written (missing record).
    Failed { reason: String, recorded: bool },
    /// Job ignored because the record was not `queued`.
    Skipped { status: VideoStatus },
}

impl JobOutcome {
    /// Label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Skipped { .. } => "skipped",
        }
    }

    /// The record reached a terminal state, so the job's dedup key can go.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Skipped { .. })
    }
}

/// Drives one [`RenderVideoJob`] from `queued` to a terminal status.
#[derive(Clone)]
pub struct RenderJobProcessor {
    repo: Arc<dyn VideoRepository>,
    pipeline: AssemblyPipeline,
    job_timeout: Duration,
    retry: RetryConfig,
}

impl RenderJobProcessor {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        pipeline: AssemblyPipeline,
        job_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            pipeline,
            job_timeout,
            retry: RetryConfig::new("store"),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Process one job to completion.
    ///
    /// Errors are store failures that outlived the retries; every render
    /// failure is reported as [`JobOutcome::Failed`] instead.
    pub async fn process(&self, job: &RenderVideoJob) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(job, "render_video");
        logger.log_start("loading video record");

        let Some(record) = self.load_record(job).await? else {
            logger.log_error(VIDEO_NOT_FOUND);
            return Ok(JobOutcome::Failed {
                reason: VIDEO_NOT_FOUND.to_string(),
                recorded: false,
            });
        };

        if record.status != VideoStatus::Queued {
            logger.log_warning(&format!(
                "record is {} instead of queued, skipping",
                record.status
            ));
            return Ok(JobOutcome::Skipped {
                status: record.status,
            });
        }

        let parts = self.load_parts(job).await?;
        let specs = match validate_parts(&parts) {
            Ok(specs) => specs,
            Err(e) => {
                let reason = e.to_string();
                logger.log_error(&reason);
                return self.finish(job, &logger, StatusUpdate::failed(reason)).await;
            }
        };

        let processing = StatusUpdate::processing(job.job_id.as_str());
        match self.write_status(job, &processing).await {
            Ok(()) => {}
            Err(StoreError::Transition(e)) => {
                logger.log_warning(&format!("lost the record to another worker: {}", e));
                return Ok(JobOutcome::Skipped { status: e.from });
            }
            Err(e) => return Err(e.into()),
        }

        let video_job = VideoJob::new(
            record.video_id.clone(),
            specs,
            output_file_name(&record.video_title, &record.video_id),
        );
        logger.log_progress(&format!(
            "rendering {} parts into {}",
            video_job.parts.len(),
            video_job.output_file_name
        ));

        let update = self.render(&video_job, &logger).await;
        self.finish(job, &logger, update).await
    }

    /// Run the pipeline under the job timeout and map its outcome to the
    /// terminal status update.
    async fn render(&self, video_job: &VideoJob, logger: &JobLogger) -> StatusUpdate {
        let started = Instant::now();
        let render = self.pipeline.render(video_job);
        let outcome = match tokio::time::timeout(self.job_timeout, render).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The pipeline future was dropped mid-render; its temp guard
                // cleaned the work dir, the output may be partial.
                remove_partial_output(&self.pipeline.output_path(video_job)).await;
                Outcome::Failure {
                    reason: format!(
                        "Video rendering timed out after {} seconds",
                        self.job_timeout.as_secs()
                    ),
                }
            }
        };

        match outcome {
            Outcome::Success {
                output_path,
                duration_seconds,
                segments_rendered,
                concat_path,
            } => {
                if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
                    logger.log_error(OUTPUT_NOT_CREATED);
                    return StatusUpdate::failed(OUTPUT_NOT_CREATED);
                }
                logger.log_progress(&format!(
                    "{} of {} parts rendered, joined via {} path in {:.1}s",
                    segments_rendered,
                    video_job.parts.len(),
                    concat_path.as_str(),
                    started.elapsed().as_secs_f64()
                ));
                StatusUpdate::completed(
                    output_path.to_string_lossy().to_string(),
                    format_hms(duration_seconds),
                )
            }
            Outcome::Failure { reason } => {
                logger.log_error(&reason);
                StatusUpdate::failed(reason)
            }
        }
    }

    async fn finish(
        &self,
        job: &RenderVideoJob,
        logger: &JobLogger,
        update: StatusUpdate,
    ) -> WorkerResult<JobOutcome> {
        let update = update.for_job(job.job_id.as_str());
        if let Err(e) = self.write_status(job, &update).await {
            record_status_write_failure(update.status.as_str());
            logger.log_error(&format!("failed to record {} status: {}", update.status, e));
            return Err(e.into());
        }

        let outcome = match update.status {
            VideoStatus::Completed => JobOutcome::Completed {
                output_location: update.output_location.unwrap_or_default(),
                result_duration: update.result_duration.unwrap_or_default(),
            },
            _ => JobOutcome::Failed {
                reason: update.error_reason.unwrap_or_default(),
                recorded: true,
            },
        };
        logger.log_completion(outcome.as_str());
        Ok(outcome)
    }

    async fn load_record(&self, job: &RenderVideoJob) -> Result<Option<VideoRecord>, StoreError> {
        retry_async(
            &self.retry.named("get_video"),
            StoreError::is_retryable,
            || self.repo.get_video(&job.video_id),
        )
        .await
    }

    async fn load_parts(&self, job: &RenderVideoJob) -> Result<Vec<reel_models::VideoPart>, StoreError> {
        retry_async(
            &self.retry.named("list_parts"),
            StoreError::is_retryable,
            || self.repo.list_parts(&job.video_id),
        )
        .await
    }

    /// Apply a transition, retrying transport failures only.
    async fn write_status(&self, job: &RenderVideoJob, update: &StatusUpdate) -> Result<(), StoreError> {
        retry_async(
            &self.retry.named(format!("set_status_{}", update.status)),
            StoreError::is_retryable,
            || self.repo.apply(&job.video_id, update),
        )
        .await
    }
}

async fn remove_partial_output(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove partial output: {}", e);
        }
    }
}
