//! Repository seam over video records and their parts.

use async_trait::async_trait;
use reel_models::{StatusUpdate, VideoId, VideoPart, VideoRecord};

use crate::error::StoreResult;

/// Storage for video records and parts.
///
/// `apply` is the only way a record's status changes. Implementations must
/// check the current status against [`StatusUpdate::status`]'s allowed
/// sources and write the update in one atomic step, returning
/// [`StoreError::Transition`](crate::StoreError::Transition) when the record
/// is in the wrong state.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Fetch a record, `None` when it does not exist.
    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<VideoRecord>>;

    /// All parts of a video, ordered by part number (unnumbered last).
    async fn list_parts(&self, id: &VideoId) -> StoreResult<Vec<VideoPart>>;

    /// Atomically apply a status transition.
    async fn apply(&self, id: &VideoId, update: &StatusUpdate) -> StoreResult<()>;

    /// Create or replace a record.
    async fn put_video(&self, record: &VideoRecord) -> StoreResult<()>;

    /// Create or replace a part.
    async fn put_part(&self, part: &VideoPart) -> StoreResult<()>;
}

pub(crate) fn sort_parts(parts: &mut [VideoPart]) {
    parts.sort_by(|a, b| {
        (a.part_number.is_none(), a.part_number, &a.video_parts_id).cmp(&(
            b.part_number.is_none(),
            b.part_number,
            &b.video_parts_id,
        ))
    });
}
