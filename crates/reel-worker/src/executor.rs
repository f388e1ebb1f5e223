//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_queue::{RenderJobConsumer, RenderJobPublisher, RenderJobQueue, RenderVideoJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::{record_job, set_jobs_in_flight};
use crate::processor::{JobOutcome, RenderJobProcessor};

/// Job executor that consumes render jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn RenderJobQueue>,
    processor: Arc<RenderJobProcessor>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn RenderJobQueue>,
        processor: RenderJobProcessor,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            processor: Arc::new(processor),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until [`JobExecutor::shutdown`] is called, then drain in-flight jobs.
    ///
    /// Shutdown is checked between reads rather than raced against one, so a
    /// batch that was read is always spawned. Reads block for at most a
    /// second, which bounds how long shutdown waits for the loop.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping executor");
                break;
            }
            if let Err(e) = self.consume_jobs().await {
                error!("Error consuming jobs: {}", e);
                // Back off on error; nothing is in hand, so shutdown may cut it short
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}, exiting anyway",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Read as many jobs as there are free slots and spawn them.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(
                &self.consumer_name,
                1000, // Block for 1 second
                available.min(5),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let processor = Arc::clone(&self.processor);
            let queue = Arc::clone(&self.queue);
            let semaphore = Arc::clone(&self.job_semaphore);
            let max_jobs = self.config.max_concurrent_jobs;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            set_jobs_in_flight(max_jobs - semaphore.available_permits());

            tokio::spawn(async move {
                Self::execute_job(processor, queue, message_id, job).await;
                drop(permit);
                set_jobs_in_flight(max_jobs - semaphore.available_permits());
            });
        }

        Ok(())
    }

    /// Process one job, then settle it on the queue.
    async fn execute_job(
        processor: Arc<RenderJobProcessor>,
        queue: Arc<dyn RenderJobQueue>,
        message_id: String,
        job: RenderVideoJob,
    ) {
        let started = Instant::now();
        info!("Executing job {} for video {}", job.job_id, job.video_id);

        let result = processor.process(&job).await;
        match &result {
            Ok(outcome) => {
                info!("Job {} finished: {}", job.job_id, outcome.as_str());
                record_job(outcome.as_str(), started.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!("Job {} errored: {}", job.job_id, e);
                record_job("error", started.elapsed().as_secs_f64());
            }
        }

        settle_job(queue.as_ref(), &message_id, &job, &result).await;
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        // Stored even when `run` has not subscribed yet
        self.shutdown.send_replace(true);
    }
}

/// Acknowledge a processed job and release its dedup key once the record is
/// terminal.
///
/// Every job is acknowledged: the processor has already written the outcome
/// to the record, and a redelivered job for a record that is no longer
/// `queued` would only be skipped. A skipped job or a store error leaves the
/// key alone, since another job may still own the record.
async fn settle_job<Q: RenderJobQueue + ?Sized>(
    queue: &Q,
    message_id: &str,
    job: &RenderVideoJob,
    result: &WorkerResult<JobOutcome>,
) {
    if let Err(e) = queue.ack(message_id).await {
        error!("Failed to ack job {}: {}", job.job_id, e);
    }
    if releases_dedup(result) {
        if let Err(e) = queue.clear_dedup(&job.video_id).await {
            warn!("Failed to clear dedup key for job {}: {}", job.job_id, e);
        }
    }
}

fn releases_dedup(result: &WorkerResult<JobOutcome>) -> bool {
    matches!(result, Ok(outcome) if outcome.is_terminal())
}
