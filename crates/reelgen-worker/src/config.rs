//! Worker configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// In-process delay added per previous attempt before a retry starts
    pub retry_step: Duration,
    /// Cap on the in-process retry delay
    pub retry_max_delay: Duration,
    /// TTL of progress records
    pub progress_ttl: Duration,
    /// TTL of checkpoints; must outlive progress records
    pub checkpoint_ttl: Duration,
    /// TTL of the per-job lease; must exceed [`WorkerConfig::longest_attempt`]
    pub lease_ttl: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker scans for due retries and orphaned jobs
    pub claim_interval: Duration,
    /// Minimum idle time before an unscheduled pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for refreshing job ownership while processing (prevents premature reclamation)
    pub job_heartbeat_interval: Duration,
    /// Delay between render farm status polls
    pub render_poll_interval: Duration,
    /// Longest the render stage waits for the farm
    pub render_max_wait: Duration,
    /// Prometheus listener port; metrics are not exported when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_attempts: 3,
            retry_step: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(30),
            progress_ttl: Duration::from_secs(3600),
            checkpoint_ttl: Duration::from_secs(2 * 3600),
            lease_ttl: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            job_heartbeat_interval: Duration::from_secs(30),
            render_poll_interval: Duration::from_secs(5),
            render_max_wait: Duration::from_secs(600),
            metrics_port: None,
        }
    }
}

/// Time allowed per non-render stage when sizing the job lease.
pub const LEASE_STAGE_ALLOWANCE: Duration = Duration::from_secs(120);

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            max_attempts: std::env::var("WORKER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            retry_step: env_secs("WORKER_RETRY_STEP_SECS", defaults.retry_step),
            retry_max_delay: env_secs("WORKER_RETRY_MAX_DELAY_SECS", defaults.retry_max_delay),
            progress_ttl: env_secs("WORKER_PROGRESS_TTL_SECS", defaults.progress_ttl),
            checkpoint_ttl: env_secs("WORKER_CHECKPOINT_TTL_SECS", defaults.checkpoint_ttl),
            lease_ttl: env_secs("WORKER_LEASE_TTL_SECS", defaults.lease_ttl),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", defaults.claim_min_idle),
            job_heartbeat_interval: env_secs(
                "WORKER_JOB_HEARTBEAT_SECS",
                defaults.job_heartbeat_interval,
            ),
            render_poll_interval: env_secs(
                "RENDER_POLL_INTERVAL_SECS",
                defaults.render_poll_interval,
            ),
            render_max_wait: env_secs("RENDER_MAX_WAIT_SECS", defaults.render_max_wait),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Reject settings that break resumption or crash recovery.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "WORKER_MAX_JOBS must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "WORKER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.progress_ttl >= self.checkpoint_ttl {
            return Err(ConfigError::Invalid(format!(
                "progress TTL ({}s) must be shorter than checkpoint TTL ({}s)",
                self.progress_ttl.as_secs(),
                self.checkpoint_ttl.as_secs()
            )));
        }
        if self.claim_min_idle <= self.job_heartbeat_interval {
            return Err(ConfigError::Invalid(format!(
                "claim min idle ({}s) must exceed the job heartbeat interval ({}s)",
                self.claim_min_idle.as_secs(),
                self.job_heartbeat_interval.as_secs()
            )));
        }
        if self.lease_ttl <= self.longest_attempt() {
            return Err(ConfigError::Invalid(format!(
                "lease TTL ({}s) must exceed the longest attempt ({}s)",
                self.lease_ttl.as_secs(),
                self.longest_attempt().as_secs()
            )));
        }
        if self.claim_interval.is_zero() || self.job_heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "claim and heartbeat intervals must be positive".to_string(),
            ));
        }
        if self.render_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "RENDER_POLL_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound on one attempt: the retry delay, four remote stages and
    /// the render wait.
    pub fn longest_attempt(&self) -> Duration {
        self.retry_max_delay + LEASE_STAGE_ALLOWANCE * 4 + self.render_max_wait
    }

    /// Retries available after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}
