//! Redis Streams render job queue.
//!
//! This crate provides:
//! - The `RenderVideoJob` payload
//! - Enqueueing with a per-record dedup key
//! - Consumer-group reads and acknowledgement for workers

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{render_idempotency_key, RenderVideoJob};
pub use queue::{
    JobQueue, MemoryQueue, QueueConfig, RenderJobConsumer, RenderJobPublisher, RenderJobQueue,
};
