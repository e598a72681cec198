//! Structured logging.
//!
//! [`init_tracing`] installs the subscriber for both binaries; [`JobLogger`]
//! gives every job-lifecycle line the same structured fields.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelgen_models::{JobId, Stage};

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, ANSI text
/// otherwise. `RUST_LOG` overrides the default `reelgen=info` directive.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reelgen=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job_id: &JobId, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, attempt = self.attempt, "Job started: {}", message);
    }

    pub fn log_stage_started(&self, stage: Stage) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn log_stage_completed(&self, stage: Stage, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            stage = %stage,
            elapsed_secs,
            "Stage completed"
        );
    }

    pub fn log_stage_skipped(&self, stage: Stage) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            stage = %stage,
            "Stage already completed, skipping"
        );
    }

    pub fn log_stage_failed(&self, stage: Stage, error: &str) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            stage = %stage,
            "Stage failed: {}", error
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, attempt = self.attempt, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, attempt = self.attempt, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, attempt = self.attempt, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span carrying the job id and attempt for everything logged inside it.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, attempt = self.attempt)
    }
}
