//! Video assembly worker binary.

use std::sync::Arc;

use tracing::{error, info};

use reel_media::{AssemblyPipeline, FfmpegBackend};
use reel_queue::JobQueue;
use reel_store::RedisVideoRepository;
use reel_worker::logging::init_tracing;
use reel_worker::metrics::init_metrics;
use reel_worker::{JobExecutor, RenderJobProcessor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    if let Some(port) = config.metrics_port {
        match init_metrics(port) {
            Ok(()) => info!("Metrics exporter listening on port {}", port),
            Err(e) => error!("Failed to start metrics exporter: {}", e),
        }
    }

    let backend = match FfmpegBackend::detect(Some(config.ffmpeg_timeout)) {
        Ok(b) => b,
        Err(e) => {
            error!("FFmpeg tools unavailable: {}", e);
            std::process::exit(1);
        }
    };

    let repo = match RedisVideoRepository::new(&config.redis_url, config.store_key_prefix.clone()) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to create video store: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = AssemblyPipeline::new(Arc::new(backend), config.pipeline_config());
    let processor = RenderJobProcessor::new(Arc::new(repo), pipeline, config.job_timeout);
    let executor = Arc::new(JobExecutor::new(config, Arc::new(queue), processor));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
