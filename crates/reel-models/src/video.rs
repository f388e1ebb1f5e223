//! Video record models and the record-level status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a video record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Render status of a video record.
///
/// ```text
/// created ──► queued ──► processing ──► completed
///               ▲   │          │
///               │   └──────────┴──────► failed
///               └── completed / failed (re-enqueue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Record exists, never enqueued
    #[default]
    Created,
    /// Render job is waiting in the queue
    Queued,
    /// A worker is rendering the video
    Processing,
    /// Output rendered and verified
    Completed,
    /// Render failed; `error_reason` holds why
    Failed,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 5] = [
        VideoStatus::Created,
        VideoStatus::Queued,
        VideoStatus::Processing,
        VideoStatus::Completed,
        VideoStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Created => "created",
            VideoStatus::Queued => "queued",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    /// States a record may be in for a transition into `self` to be accepted.
    pub fn allowed_sources(&self) -> &'static [VideoStatus] {
        match self {
            VideoStatus::Created => &[],
            VideoStatus::Queued => &[
                VideoStatus::Created,
                VideoStatus::Completed,
                VideoStatus::Failed,
            ],
            VideoStatus::Processing => &[VideoStatus::Queued],
            VideoStatus::Completed => &[VideoStatus::Processing],
            VideoStatus::Failed => &[VideoStatus::Queued, VideoStatus::Processing],
        }
    }

    /// Check whether a record in this state may move to `next`.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        next.allowed_sources().contains(self)
    }

    /// A render job is pending or running for the record.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, VideoStatus::Queued | VideoStatus::Processing)
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VideoStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown video status '{}'", s))
    }
}

/// Optional record fields touched by status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    JobId,
    OutputLocation,
    ErrorReason,
    ResultDuration,
}

impl RecordField {
    /// Persisted field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::JobId => "job_id",
            RecordField::OutputLocation => "output_location",
            RecordField::ErrorReason => "error_reason",
            RecordField::ResultDuration => "result_duration",
        }
    }
}

/// Transition rejected because the record is not in an allowed source state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: VideoStatus,
    pub to: VideoStatus,
}

/// A single status transition with the fields it stamps.
///
/// Built through the named constructors so every transition carries exactly
/// the fields that belong to it; the store applies it atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: VideoStatus,
    pub job_id: Option<String>,
    pub output_location: Option<String>,
    pub error_reason: Option<String>,
    pub result_duration: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    fn bare(status: VideoStatus) -> Self {
        Self {
            status,
            job_id: None,
            output_location: None,
            error_reason: None,
            result_duration: None,
            at: Utc::now(),
        }
    }

    /// Record was pushed onto the render queue as `job_id`.
    pub fn queued(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::bare(VideoStatus::Queued)
        }
    }

    /// A worker picked up `job_id` and is about to render.
    pub fn processing(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::bare(VideoStatus::Processing)
        }
    }

    /// Output exists at `output_location` and lasts `result_duration`.
    pub fn completed(output_location: impl Into<String>, result_duration: impl Into<String>) -> Self {
        Self {
            output_location: Some(output_location.into()),
            result_duration: Some(result_duration.into()),
            ..Self::bare(VideoStatus::Completed)
        }
    }

    /// Render failed with a single human-readable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Self::bare(VideoStatus::Failed)
        }
    }

    /// Attribute the write to `job_id`, so a retry of it can be recognised.
    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// The record already holds this status from the same job, i.e. this is
    /// a retried write whose first attempt landed.
    pub fn is_replay_on(&self, record: &VideoRecord) -> bool {
        record.status == self.status && self.job_id.is_some() && record.job_id == self.job_id
    }

    /// Fields this transition sets, as persisted name/value pairs.
    pub fn set_fields(&self) -> Vec<(RecordField, &str)> {
        [
            (RecordField::JobId, self.job_id.as_deref()),
            (RecordField::OutputLocation, self.output_location.as_deref()),
            (RecordField::ErrorReason, self.error_reason.as_deref()),
            (RecordField::ResultDuration, self.result_duration.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }

    /// Fields this transition clears.
    ///
    /// `output_location` is only ever left set by `completed`, so a record never
    /// points at an output that was not verified.
    pub fn cleared_fields(&self) -> &'static [RecordField] {
        match self.status {
            VideoStatus::Created => &[],
            VideoStatus::Queued => &[RecordField::ErrorReason],
            VideoStatus::Processing => &[
                RecordField::ErrorReason,
                RecordField::OutputLocation,
                RecordField::ResultDuration,
            ],
            VideoStatus::Completed => &[RecordField::ErrorReason],
            VideoStatus::Failed => &[RecordField::OutputLocation, RecordField::ResultDuration],
        }
    }
}

/// Video record as persisted by the store.
///
/// Only the render-related fields are modelled; everything else about a video
/// belongs to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique video ID
    pub video_id: VideoId,

    /// Human title, used to derive the output file name
    #[serde(default)]
    pub video_title: String,

    /// Render status
    #[serde(default)]
    pub status: VideoStatus,

    /// Queue job currently or last responsible for the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Final output path, set only once the output was verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,

    /// Failure reason (if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Output duration as `HH:MM:SS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_duration: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last transition timestamp
    pub last_modified: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a new record in the `created` state.
    pub fn new(video_id: VideoId, video_title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            video_id,
            video_title: video_title.into(),
            status: VideoStatus::Created,
            job_id: None,
            output_location: None,
            error_reason: None,
            result_duration: None,
            created_at: now,
            last_modified: now,
        }
    }

    /// Apply a status transition in place.
    ///
    /// Replaying an update from the job that already wrote it is a no-op.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), TransitionError> {
        if update.is_replay_on(self) {
            return Ok(());
        }
        if !self.status.can_transition_to(update.status) {
            return Err(TransitionError {
                from: self.status,
                to: update.status,
            });
        }

        for field in update.cleared_fields() {
            *self.field_mut(*field) = None;
        }
        for (field, value) in update.set_fields() {
            *self.field_mut(field) = Some(value.to_string());
        }
        self.status = update.status;
        self.last_modified = update.at;
        Ok(())
    }

    fn field_mut(&mut self, field: RecordField) -> &mut Option<String> {
        match field {
            RecordField::JobId => &mut self.job_id,
            RecordField::OutputLocation => &mut self.output_location,
            RecordField::ErrorReason => &mut self.error_reason,
            RecordField::ResultDuration => &mut self.result_duration,
        }
    }
}
