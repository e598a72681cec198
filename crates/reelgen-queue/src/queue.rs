//! Job queue using Redis Streams.
//!
//! A delivery that fails with a retryable error is left pending in the
//! consumer group. [`JobQueue::schedule_retry`] bumps its attempt counter and
//! records when it may be redelivered; [`JobQueue::claim_due`] hands it back
//! out once that time has passed. Entries held by a crashed consumer carry no
//! schedule and are reclaimed once idle for longer than the claim threshold.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, GenerateVideoJob};

/// Minimum idle time for claiming a due retry, so two workers polling at the
/// same moment cannot both take it.
const DUE_CLAIM_MIN_IDLE_MS: u64 = 1000;

/// Pending entries inspected per claim scan. In-flight deliveries share the
/// pending list, so the scan looks past the first `count` entries.
const PENDING_SCAN_LIMIT: usize = 100;

/// Retry bookkeeping keys live for a day.
const RETRY_KEY_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Redelivery delay after the first failed attempt
    pub retry_base: Duration,
    /// Upper bound on the redelivery delay
    pub retry_max: Duration,
    /// How long a submitted job blocks duplicates
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reelgen:jobs".to_string(),
            consumer_group: "reelgen:workers".to_string(),
            dlq_stream_name: "reelgen:dlq".to_string(),
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(300),
            dedup_ttl: Duration::from_secs(3600),
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
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or(defaults.dlq_stream_name),
            retry_base: std::env::var("QUEUE_RETRY_BASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_base),
            retry_max: std::env::var("QUEUE_RETRY_MAX_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_max),
            dedup_ttl: defaults.dedup_ttl,
        }
    }

    /// Redelivery delay after `attempt` failed attempts: `base * 2^(attempt-1)`,
    /// capped at `retry_max`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max)
    }
}

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

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn retry_key(message_id: &str) -> String {
        format!("reelgen:retry:{}", message_id)
    }

    fn retry_at_key(message_id: &str) -> String {
        format!("reelgen:retry_at:{}", message_id)
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

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

    /// Enqueue a generation job. Rejects a resubmission of the same job
    /// within the dedup window.
    pub async fn enqueue(&self, job: &GenerateVideoJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();
        let dedup_key = format!("reelgen:dedup:{}", idempotency_key);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
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
                // Let the caller resubmit.
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            job_id = %job.job_id,
            message_id = %message_id,
            "Enqueued generation job"
        );

        Ok(message_id)
    }

    /// Acknowledge a delivery and drop its retry bookkeeping.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

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

        conn.del::<_, ()>(&[Self::retry_key(message_id), Self::retry_at_key(message_id)])
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a delivery to the dead letter queue.
    pub async fn dlq(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(&delivery.job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .arg("attempts")
            .arg(delivery.attempt_number())
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;

        warn!(job_id = %delivery.job.job_id, "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Read new deliveries for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

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

        let Some(result) = result else {
            return Ok(Vec::new());
        };

        let mut deliveries = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(delivery) = self.to_delivery(entry).await? {
                    debug!(job_id = %delivery.job.job_id, "Consumed job from stream");
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    /// Claim pending deliveries that are due for another attempt: scheduled
    /// retries whose time has come, and unscheduled entries idle for at least
    /// `orphan_min_idle` (their consumer died).
    pub async fn claim_due(
        &self,
        consumer_name: &str,
        orphan_min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(PENDING_SCAN_LIMIT.max(count))
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let now_ms = Utc::now().timestamp_millis();
        let orphan_min_idle_ms = orphan_min_idle.as_millis() as u64;
        let mut deliveries = Vec::new();

        for entry in pending.ids {
            if deliveries.len() >= count {
                break;
            }

            let retry_at: Option<i64> = conn.get(Self::retry_at_key(&entry.id)).await?;
            let min_idle_ms = match retry_at {
                Some(at) if at <= now_ms => DUE_CLAIM_MIN_IDLE_MS,
                Some(_) => continue,
                None if entry.last_delivered_ms as u64 >= orphan_min_idle_ms => orphan_min_idle_ms,
                None => continue,
            };

            let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(consumer_name)
                .arg(min_idle_ms)
                .arg(&entry.id)
                .query_async(&mut conn)
                .await?;

            for stream_entry in claimed.ids {
                conn.del::<_, ()>(Self::retry_at_key(&stream_entry.id)).await?;
                if let Some(delivery) = self.to_delivery(stream_entry).await? {
                    info!(
                        job_id = %delivery.job.job_id,
                        attempts_made = delivery.attempts_made,
                        scheduled = retry_at.is_some(),
                        "Claimed pending job"
                    );
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    /// Record a failed attempt and schedule redelivery. Returns the delay
    /// before the entry becomes claimable.
    pub async fn schedule_retry(&self, message_id: &str) -> QueueResult<Duration> {
        let attempts = self.increment_retry(message_id).await?;
        let delay = self.config.retry_delay(attempts);

        let mut conn = self.connection().await?;
        let retry_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.set_ex::<_, _, ()>(
            Self::retry_at_key(message_id),
            retry_at,
            RETRY_KEY_TTL_SECS as u64,
        )
        .await?;

        debug!(message_id = %message_id, attempts, delay_secs = delay.as_secs(), "Scheduled retry");
        Ok(delay)
    }

    /// Re-claim an in-flight delivery for its current consumer, resetting its
    /// idle time so it is not mistaken for an orphan.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<Vec<String>>(&mut conn)
            .await?;

        Ok(())
    }

    /// Failed attempts recorded for a message.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;
        let count: Option<u32> = conn.get(Self::retry_key(message_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment the failed-attempt counter for a message.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = Self::retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_KEY_TTL_SECS).await?;
        Ok(count)
    }

    async fn to_delivery(
        &self,
        entry: redis::streams::StreamId,
    ) -> QueueResult<Option<Delivery>> {
        let message_id = entry.id.clone();

        let Some(redis::Value::BulkString(payload)) = entry.map.get("job") else {
            warn!(message_id = %message_id, "Stream entry has no job payload");
            self.ack(&message_id).await.ok();
            return Ok(None);
        };

        let payload_str = String::from_utf8_lossy(payload);
        match serde_json::from_str::<GenerateVideoJob>(&payload_str) {
            Ok(job) => {
                let attempts_made = self.get_retry_count(&message_id).await?;
                Ok(Some(Delivery {
                    message_id,
                    job,
                    attempts_made,
                }))
            }
            Err(e) => {
                warn!(message_id = %message_id, "Failed to parse job payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(&message_id).await.ok();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "reelgen:jobs");
        assert_eq!(config.consumer_group, "reelgen:workers");
        assert_eq!(config.dlq_stream_name, "reelgen:dlq");
    }

    #[test]
    fn test_retry_delay_is_exponential_and_capped() {
        let config = QueueConfig {
            retry_base: Duration::from_secs(5),
            retry_max: Duration::from_secs(60),
            ..QueueConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_secs(5));
        assert_eq!(config.retry_delay(2), Duration::from_secs(10));
        assert_eq!(config.retry_delay(3), Duration::from_secs(20));
        assert_eq!(config.retry_delay(5), Duration::from_secs(60));
        assert_eq!(config.retry_delay(40), Duration::from_secs(60));
    }
}
