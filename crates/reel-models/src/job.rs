//! Render job definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{PartSpec, VideoId};

/// Unique identifier for a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
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

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated render request handed to the assembly pipeline.
///
/// Parts are kept in caller order; the pipeline never reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    /// Record the job renders; also keys the job's temp directory
    pub video_id: VideoId,
    /// Ordered parts
    pub parts: Vec<PartSpec>,
    /// File name of the final output inside the output directory
    pub output_file_name: String,
}

impl VideoJob {
    pub fn new(video_id: VideoId, parts: Vec<PartSpec>, output_file_name: impl Into<String>) -> Self {
        Self {
            video_id,
            parts,
            output_file_name: output_file_name.into(),
        }
    }

    /// Total requested content length in seconds.
    pub fn requested_duration(&self) -> f64 {
        self.parts.iter().map(PartSpec::duration).sum()
    }
}
