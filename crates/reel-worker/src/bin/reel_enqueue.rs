//! Request a render of one video record.

use clap::Parser;
use tracing::info;

use reel_models::VideoId;
use reel_queue::{JobQueue, QueueConfig};
use reel_store::RedisVideoRepository;
use reel_worker::enqueue_render;
use reel_worker::logging::init_tracing;

#[derive(Debug, Parser)]
#[command(name = "reel-enqueue", about = "Queue a video record for rendering")]
struct Args {
    /// Video record to render
    video_id: String,

    /// Redis URL of the record store
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Key prefix of the record store
    #[arg(long, env = "STORE_KEY_PREFIX", default_value = "reel")]
    prefix: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let repo = RedisVideoRepository::new(&args.redis_url, args.prefix)?;
    let queue = JobQueue::new(QueueConfig {
        redis_url: args.redis_url,
        ..QueueConfig::from_env()
    })?;
    queue.init().await?;

    let job = enqueue_render(&repo, &queue, &VideoId::from(args.video_id)).await?;
    info!(job_id = %job.job_id, video_id = %job.video_id, "Queued");
    println!("{}", job.job_id);
    Ok(())
}
