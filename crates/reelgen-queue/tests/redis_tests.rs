//! Redis-backed queue and state store tests.

use std::sync::Arc;
use std::time::Duration;

use reelgen_models::{JobId, Stage};
use reelgen_queue::{
    CheckpointStore, GenerateVideoJob, JobLease, JobQueue, LeaseAcquisition, QueueConfig,
    QueueError, RedisStateStore,
};

fn test_queue() -> JobQueue {
    dotenvy::dotenv().ok();
    let config = QueueConfig {
        stream_name: format!("reelgen:test:jobs:{}", JobId::new()),
        dlq_stream_name: format!("reelgen:test:dlq:{}", JobId::new()),
        retry_base: Duration::from_secs(1),
        retry_max: Duration::from_secs(2),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).expect("Failed to create queue")
}

fn test_job() -> GenerateVideoJob {
    GenerateVideoJob::new(JobId::new(), "test_user", "a lighthouse keeper's last night")
        .expect("valid prompt")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = test_queue();
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job();
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let deliveries = queue.consume("test-consumer", 1000, 1).await.expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].job, job);
    assert_eq!(deliveries[0].attempts_made, 0);

    queue.ack(&deliveries[0].message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_enqueue_rejected() {
    let queue = test_queue();
    queue.init().await.unwrap();

    let job = test_job();
    queue.enqueue(&job).await.unwrap();
    assert!(matches!(queue.enqueue(&job).await, Err(QueueError::Duplicate(_))));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_scheduled_retry_is_redelivered_with_attempt_count() {
    let queue = test_queue();
    queue.init().await.unwrap();
    queue.enqueue(&test_job()).await.unwrap();

    let delivery = queue.consume("worker-a", 1000, 1).await.unwrap().remove(0);
    let delay = queue.schedule_retry(&delivery.message_id).await.unwrap();
    assert_eq!(delay, Duration::from_secs(1));

    // Not due yet.
    let early = queue.claim_due("worker-b", Duration::from_secs(60), 10).await.unwrap();
    assert!(early.is_empty());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let due = queue.claim_due("worker-b", Duration::from_secs(60), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].message_id, delivery.message_id);
    assert_eq!(due[0].attempts_made, 1);

    queue.dlq(&due[0], "gave up").await.unwrap();
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.get_retry_count(&delivery.message_id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_touched_delivery_is_not_orphaned() {
    let queue = test_queue();
    queue.init().await.unwrap();
    queue.enqueue(&test_job()).await.unwrap();

    let delivery = queue.consume("worker-a", 1000, 1).await.unwrap().remove(0);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    queue.touch("worker-a", &delivery.message_id).await.unwrap();

    let claimed = queue.claim_due("worker-b", Duration::from_secs(1), 10).await.unwrap();
    assert!(claimed.is_empty());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let claimed = queue.claim_due("worker-b", Duration::from_secs(1), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_checkpoint_and_lease() {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let backend = Arc::new(RedisStateStore::new(&url).unwrap());

    let checkpoints = CheckpointStore::new(backend.clone());
    let job_id = JobId::new();
    checkpoints.mark_completed(&job_id, "test_user", Stage::Script).await;
    checkpoints.mark_failed(&job_id, "test_user", Stage::Images).await;
    let checkpoint = checkpoints.get(&job_id).await.expect("checkpoint stored");
    assert!(checkpoint.is_completed(Stage::Script));
    assert_eq!(checkpoint.last_failed_step, Some(Stage::Images));
    checkpoints.delete(&job_id).await;
    assert!(checkpoints.get(&job_id).await.is_none());

    let leases = JobLease::new(backend, Duration::from_secs(30));
    let LeaseAcquisition::Acquired(lease) = leases.acquire(&job_id).await else {
        panic!("expected lease");
    };
    assert_eq!(leases.acquire(&job_id).await, LeaseAcquisition::Held);
    leases.release(lease).await;
}
