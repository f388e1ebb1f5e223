//! Job queue using Redis Streams.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use reel_models::VideoId;

use crate::error::{QueueError, QueueResult};
use crate::job::{render_idempotency_key, RenderVideoJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Lifetime of a dedup key if the job never reaches a terminal state
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:jobs".to_string(),
            consumer_group: "reel:workers".to_string(),
            dedup_ttl: Duration::from_secs(4 * 3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.stream_name, idempotency_key)
    }
}

/// Publishing side of the render queue.
#[async_trait]
pub trait RenderJobPublisher: Send + Sync {
    /// Push a job; fails with [`QueueError::Duplicate`] while another job for
    /// the same record is pending.
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<String>;

    /// Allow a new job for `video_id` to be enqueued.
    async fn clear_dedup(&self, video_id: &VideoId) -> QueueResult<()>;
}

/// Consuming side of the render queue.
#[async_trait]
pub trait RenderJobConsumer: Send + Sync {
    /// Create the consumer group if it does not exist.
    async fn init(&self) -> QueueResult<()>;

    /// Read up to `count` new jobs as `(message_id, job)`, blocking for at
    /// most `block_ms`.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, RenderVideoJob)>>;

    /// Mark a consumed job as done.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;
}

/// Both sides of the queue, as the worker needs them.
pub trait RenderJobQueue: RenderJobPublisher + RenderJobConsumer {}

impl<T: RenderJobPublisher + RenderJobConsumer> RenderJobQueue for T {}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Read up to `count` new jobs, blocking for at most `block_ms`.
    ///
    /// Malformed payloads are acknowledged and dropped.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, RenderVideoJob)>> {
        let mut conn = self.conn().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        let Some(result) = result else {
            return Ok(jobs);
        };

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                let Some(payload) = entry.get::<String>("job") else {
                    warn!("Stream entry {} has no job payload", message_id);
                    self.ack(&message_id).await.ok();
                    continue;
                };
                match serde_json::from_str::<RenderVideoJob>(&payload) {
                    Ok(job) => {
                        debug!(job_id = %job.job_id, video_id = %job.video_id, "Consumed job from stream");
                        jobs.push((message_id, job));
                    }
                    Err(e) => {
                        warn!("Failed to parse job payload: {}", e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(jobs)
    }
}

#[async_trait]
impl RenderJobConsumer for JobQueue {
    async fn init(&self) -> QueueResult<()> {
        JobQueue::init(self).await
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, RenderVideoJob)>> {
        JobQueue::consume(self, consumer_name, block_ms, count).await
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        JobQueue::ack(self, message_id).await
    }
}

#[async_trait]
impl RenderJobPublisher for JobQueue {
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();
        let dedup_key = self.config.dedup_key(&idempotency_key);

        // SET NX claims the key and checks for a pending job in one step
        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.job_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(e.into());
            }
        };

        info!(
            "Enqueued job {} for video {} with message ID {}",
            job.job_id, job.video_id, message_id
        );
        Ok(message_id)
    }

    async fn clear_dedup(&self, video_id: &VideoId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let key = self.config.dedup_key(&render_idempotency_key(video_id));
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }
}

/// Queue that keeps jobs in process memory.
///
/// Published jobs are handed out by `consume` in order; acknowledged message
/// ids are kept for inspection.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: Mutex<HashSet<String>>,
    published: Mutex<Vec<RenderVideoJob>>,
    deliveries: Mutex<VecDeque<(String, RenderVideoJob)>>,
    acked: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<RenderVideoJob> {
        self.published.lock().await.clone()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.acked.lock().await.clone()
    }

    /// Whether a job for `video_id` still holds its dedup key.
    pub async fn is_pending(&self, video_id: &VideoId) -> bool {
        self.pending
            .lock()
            .await
            .contains(&render_idempotency_key(video_id))
    }
}

#[async_trait]
impl RenderJobPublisher for MemoryQueue {
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<String> {
        let key = job.idempotency_key();
        if !self.pending.lock().await.insert(key.clone()) {
            return Err(QueueError::Duplicate(key));
        }
        let mut published = self.published.lock().await;
        published.push(job.clone());
        let message_id = format!("{}-0", published.len());
        self.deliveries
            .lock()
            .await
            .push_back((message_id.clone(), job.clone()));
        Ok(message_id)
    }

    async fn clear_dedup(&self, video_id: &VideoId) -> QueueResult<()> {
        self.pending
            .lock()
            .await
            .remove(&render_idempotency_key(video_id));
        Ok(())
    }
}

#[async_trait]
impl RenderJobConsumer for MemoryQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn consume(
        &self,
        _consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, RenderVideoJob)>> {
        let jobs: Vec<_> = {
            let mut deliveries = self.deliveries.lock().await;
            let take = count.min(deliveries.len());
            deliveries.drain(..take).collect()
        };
        if jobs.is_empty() {
            // Stand in for the blocking read without holding the caller up long
            tokio::time::sleep(Duration::from_millis(block_ms.min(10))).await;
        }
        Ok(jobs)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.acked.lock().await.push(message_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_scoped_to_stream() {
        let config = QueueConfig::default();
        assert_eq!(config.dedup_key("render:v1"), "reel:jobs:dedup:render:v1");
    }

    #[tokio::test]
    async fn test_memory_queue_dedups_until_cleared() {
        let queue = MemoryQueue::new();
        let id = VideoId::from("v1");

        queue.enqueue(&RenderVideoJob::new(id.clone())).await.unwrap();
        let err = queue
            .enqueue(&RenderVideoJob::new(id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(_)));
        assert!(queue.is_pending(&id).await);

        queue.clear_dedup(&id).await.unwrap();
        assert!(!queue.is_pending(&id).await);
        queue.enqueue(&RenderVideoJob::new(id)).await.unwrap();
        assert_eq!(queue.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_queue_delivers_in_order_and_records_acks() {
        let queue = MemoryQueue::new();
        let first = RenderVideoJob::new(VideoId::from("v1"));
        let second = RenderVideoJob::new(VideoId::from("v2"));
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        let batch = queue.consume("c", 0, 1).await.unwrap();
        assert_eq!(batch, vec![("1-0".to_string(), first)]);
        let batch = queue.consume("c", 0, 5).await.unwrap();
        assert_eq!(batch, vec![("2-0".to_string(), second)]);
        assert!(queue.consume("c", 0, 5).await.unwrap().is_empty());

        queue.ack("1-0").await.unwrap();
        assert_eq!(queue.acked().await, vec!["1-0".to_string()]);
    }
}
