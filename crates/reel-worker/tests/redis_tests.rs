//! Record store and queue tests against a live Redis (`REDIS_URL`).

use reel_models::{StatusUpdate, VideoId, VideoPart, VideoRecord, VideoStatus};
use reel_queue::{JobQueue, QueueConfig, RenderJobPublisher};
use reel_store::{RedisVideoRepository, StoreError, VideoRepository};
use reel_worker::{enqueue_render, WorkerError};

fn redis_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn unique(name: &str) -> String {
    format!("reel-test-{}-{}", name, uuid::Uuid::new_v4().simple())
}

fn queue_for(stream: &str) -> JobQueue {
    JobQueue::new(QueueConfig {
        redis_url: redis_url(),
        stream_name: stream.to_string(),
        consumer_group: format!("{}:workers", stream),
        ..QueueConfig::default()
    })
    .expect("Failed to create queue")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_record_transitions_are_atomic() {
    let repo = RedisVideoRepository::new(&redis_url(), unique("store")).unwrap();
    let id = VideoId::from("v1");
    repo.put_video(&VideoRecord::new(id.clone(), "Title")).await.unwrap();

    repo.apply(&id, &StatusUpdate::queued("job-1")).await.unwrap();
    repo.apply(&id, &StatusUpdate::processing("job-1")).await.unwrap();
    let err = repo
        .apply(&id, &StatusUpdate::processing("job-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Transition(_)));

    repo.apply(&id, &StatusUpdate::completed("/out/a.mp4", "00:00:10"))
        .await
        .unwrap();
    let record = repo.get_video(&id).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert_eq!(record.job_id.as_deref(), Some("job-1"));
    assert_eq!(record.output_location.as_deref(), Some("/out/a.mp4"));
    assert_eq!(record.result_duration.as_deref(), Some("00:00:10"));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retried_write_from_same_job_is_accepted() {
    let repo = RedisVideoRepository::new(&redis_url(), unique("replay")).unwrap();
    let id = VideoId::from("v1");
    repo.put_video(&VideoRecord::new(id.clone(), "Title")).await.unwrap();

    repo.apply(&id, &StatusUpdate::queued("job-1")).await.unwrap();
    repo.apply(&id, &StatusUpdate::processing("job-1")).await.unwrap();
    repo.apply(&id, &StatusUpdate::processing("job-1")).await.unwrap();

    let done = StatusUpdate::completed("/out/a.mp4", "00:00:10").for_job("job-1");
    repo.apply(&id, &done).await.unwrap();
    repo.apply(&id, &done).await.unwrap();

    let record = repo.get_video(&id).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Completed);
    assert_eq!(record.output_location.as_deref(), Some("/out/a.mp4"));

    let err = repo
        .apply(&id, &StatusUpdate::completed("/out/b.mp4", "00:00:10").for_job("job-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Transition(_)));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_parts_come_back_ordered() {
    let repo = RedisVideoRepository::new(&redis_url(), unique("parts")).unwrap();
    let id = VideoId::from("v1");
    for number in [3u32, 1, 2] {
        repo.put_part(&VideoPart {
            video_parts_id: format!("p{}", number),
            video_id: id.clone(),
            file_location: Some("a.mp4".to_string()),
            start_time: Some("00:00:00".to_string()),
            end_time: Some("00:00:01".to_string()),
            part_number: Some(number),
        })
        .await
        .unwrap();
    }

    let numbers: Vec<_> = repo
        .list_parts(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.part_number)
        .collect();
    assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack_cycle() {
    let repo = RedisVideoRepository::new(&redis_url(), unique("cycle")).unwrap();
    let stream = unique("jobs");
    let queue = queue_for(&stream);
    queue.init().await.expect("Failed to initialize queue");

    let id = VideoId::from("v1");
    repo.put_video(&VideoRecord::new(id.clone(), "Title")).await.unwrap();

    let job = enqueue_render(&repo, &queue, &id).await.unwrap();
    let err = enqueue_render(&repo, &queue, &id).await.unwrap_err();
    assert!(matches!(err, WorkerError::AlreadyInFlight { .. }));

    let jobs = queue.consume("test-consumer", 1000, 5).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed, &job);

    queue.ack(message_id).await.unwrap();
    queue.clear_dedup(&id).await.unwrap();
    assert!(queue.consume("test-consumer", 100, 5).await.unwrap().is_empty());
}
