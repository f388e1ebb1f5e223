//! In-process repository for tests and local runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use reel_models::{StatusUpdate, VideoId, VideoPart, VideoRecord};

use crate::error::{StoreError, StoreResult};
use crate::repository::{sort_parts, VideoRepository};

#[derive(Debug, Default)]
pub struct InMemoryVideoRepository {
    videos: RwLock<HashMap<VideoId, VideoRecord>>,
    parts: RwLock<HashMap<VideoId, Vec<VideoPart>>>,
    failing_applies: AtomicU32,
    lost_replies: AtomicU32,
}

impl InMemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` `apply` calls with a retryable error.
    pub fn fail_next_applies(&self, count: u32) {
        self.failing_applies.store(count, Ordering::SeqCst);
    }

    /// Let the next `count` `apply` calls land, then report a retryable
    /// error as if the reply was lost on the way back.
    pub fn lose_next_replies(&self, count: u32) {
        self.lost_replies.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        take_one(&self.failing_applies)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn get_video(&self, id: &VideoId) -> StoreResult<Option<VideoRecord>> {
        Ok(self.videos.read().await.get(id).cloned())
    }

    async fn list_parts(&self, id: &VideoId) -> StoreResult<Vec<VideoPart>> {
        let mut parts = self.parts.read().await.get(id).cloned().unwrap_or_default();
        sort_parts(&mut parts);
        Ok(parts)
    }

    async fn apply(&self, id: &VideoId, update: &StatusUpdate) -> StoreResult<()> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut videos = self.videos.write().await;
        let record = videos
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        record.apply(update)?;
        if take_one(&self.lost_replies) {
            return Err(StoreError::Unavailable("reply lost".to_string()));
        }
        Ok(())
    }

    async fn put_video(&self, record: &VideoRecord) -> StoreResult<()> {
        self.videos
            .write()
            .await
            .insert(record.video_id.clone(), record.clone());
        Ok(())
    }

    async fn put_part(&self, part: &VideoPart) -> StoreResult<()> {
        let mut parts = self.parts.write().await;
        let list = parts.entry(part.video_id.clone()).or_default();
        list.retain(|p| p.video_parts_id != part.video_parts_id);
        list.push(part.clone());
        Ok(())
    }
}
