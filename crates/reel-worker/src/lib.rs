//! Video assembly worker.
//!
//! This crate provides:
//! - The render job processor driving a record from `queued` to a result
//! - The enqueue dispatcher used by producers of render requests
//! - Job executor with bounded concurrency and graceful shutdown
//! - Worker configuration, retries, structured job logging and metrics

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod retry;

pub use config::WorkerConfig;
pub use dispatch::enqueue_render;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use processor::{JobOutcome, RenderJobProcessor};
pub use retry::{retry_async, RetryConfig};
