//! Enqueue side of a render: move a record to `queued` and publish its job.

use tracing::{info, warn};

use reel_models::{StatusUpdate, VideoId};
use reel_queue::{QueueError, RenderJobPublisher, RenderVideoJob};
use reel_store::{StoreError, VideoRepository};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_enqueued;

/// Reason stored when the job could not be published after the record was queued.
pub const ENQUEUE_FAILED: &str = "Failed to enqueue render job";

/// Request a render of `video_id`.
///
/// The record is moved to `queued` (stamped with the new job id) before the
/// job is published, so a worker never sees a job whose record is still in
/// its previous state. If publishing fails the record is moved on to
/// `failed` and the queue error is returned.
///
/// Rejects records that already have a render queued or processing.
pub async fn enqueue_render(
    repo: &dyn VideoRepository,
    publisher: &dyn RenderJobPublisher,
    video_id: &VideoId,
) -> WorkerResult<RenderVideoJob> {
    let record = repo
        .get_video(video_id)
        .await?
        .ok_or_else(|| WorkerError::VideoNotFound(video_id.to_string()))?;

    if record.status.is_in_flight() {
        return Err(WorkerError::AlreadyInFlight {
            video_id: video_id.to_string(),
            status: record.status,
        });
    }

    let job = RenderVideoJob::new(video_id.clone());
    match repo
        .apply(video_id, &StatusUpdate::queued(job.job_id.as_str()))
        .await
    {
        Ok(()) => {}
        // Another dispatcher won the record between the read and the write.
        Err(StoreError::Transition(e)) => {
            return Err(WorkerError::AlreadyInFlight {
                video_id: video_id.to_string(),
                status: e.from,
            })
        }
        Err(e) => return Err(e.into()),
    }

    match publish(publisher, &job).await {
        Ok(message_id) => {
            record_enqueued();
            info!(
                job_id = %job.job_id,
                video_id = %video_id,
                message_id = %message_id,
                "Render job enqueued"
            );
            Ok(job)
        }
        Err(e) => {
            warn!(video_id = %video_id, "Failed to publish render job: {}", e);
            let reason = format!("{}: {}", ENQUEUE_FAILED, e);
            if let Err(store_err) = repo.apply(video_id, &StatusUpdate::failed(reason)).await {
                warn!(video_id = %video_id, "Failed to record enqueue failure: {}", store_err);
            }
            Err(e.into())
        }
    }
}

/// Publish, clearing a stale dedup key once.
///
/// The record was just moved to `queued` by this call, so no other job for it
/// can be pending; a dedup key still present belongs to a job that died
/// without clearing it.
async fn publish(
    publisher: &dyn RenderJobPublisher,
    job: &RenderVideoJob,
) -> Result<String, QueueError> {
    match publisher.enqueue(job).await {
        Err(QueueError::Duplicate(key)) => {
            warn!(video_id = %job.video_id, "Clearing stale dedup key {}", key);
            publisher.clear_dedup(&job.video_id).await?;
            publisher.enqueue(job).await
        }
        other => other,
    }
}
