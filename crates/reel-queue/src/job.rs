//! Job payloads carried on the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{JobId, VideoId};

/// Render the video record `video_id`.
///
/// The record's parts are looked up by the worker; the payload carries
/// nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Record to render
    pub video_id: VideoId,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl RenderVideoJob {
    pub fn new(video_id: VideoId) -> Self {
        Self {
            job_id: JobId::new(),
            video_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        render_idempotency_key(&self.video_id)
    }
}

/// At most one render job per record is pending at a time.
pub fn render_idempotency_key(video_id: &VideoId) -> String {
    format!("render:{}", video_id)
}
