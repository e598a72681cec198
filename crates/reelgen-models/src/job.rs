//! Job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Minimum prompt length in characters, after trimming.
pub const MIN_PROMPT_CHARS: u64 = 10;

/// Maximum prompt length in characters, after trimming.
pub const MAX_PROMPT_CHARS: u64 = 500;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Durable lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted and not yet finished
    #[default]
    Processing,
    /// No further retries remain
    Failed,
    /// Render succeeded
    Complete,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Failed => "failed",
            JobStatus::Complete => "complete",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Complete)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("Invalid prompt: must be between {min} and {max} characters (got {len})")]
    Length { len: usize, min: u64, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} is already {status} and cannot transition")]
pub struct JobTransitionError {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Validate)]
struct PromptInput {
    #[validate(length(min = 10, max = 500))]
    prompt: String,
}

/// Trim and validate a user prompt.
pub fn validate_prompt(raw: &str) -> Result<String, PromptError> {
    let input = PromptInput {
        prompt: raw.trim().to_string(),
    };

    match input.validate() {
        Ok(()) => Ok(input.prompt),
        Err(_) => Err(PromptError::Length {
            len: input.prompt.chars().count(),
            min: MIN_PROMPT_CHARS,
            max: MAX_PROMPT_CHARS,
        }),
    }
}

/// One user-submitted unit of work.
///
/// Stage outputs live in the external record store; this type only carries
/// what the orchestrator needs to read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub owner_id: String,
    pub prompt: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in the processing state.
    pub fn new(owner_id: impl Into<String>, prompt: &str) -> Result<Self, PromptError> {
        let prompt = validate_prompt(prompt)?;
        let now = Utc::now();

        Ok(Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            prompt,
            status: JobStatus::Processing,
            video_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the job complete with its final video URL.
    pub fn complete(&mut self, video_url: impl Into<String>) -> Result<(), JobTransitionError> {
        self.ensure_not_terminal()?;
        self.status = JobStatus::Complete;
        self.video_url = Some(video_url.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job permanently failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobTransitionError> {
        self.ensure_not_terminal()?;
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<(), JobTransitionError> {
        if self.is_terminal() {
            return Err(JobTransitionError {
                job_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}
