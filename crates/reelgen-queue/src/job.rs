//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use reelgen_models::{validate_prompt, Job, JobId, PromptError};

/// Job to run the generation pipeline for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateVideoJob {
    /// Job ID (same as the durable job record)
    pub job_id: JobId,
    /// Submitting user
    pub owner_id: String,
    /// Validated prompt
    pub prompt: String,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl GenerateVideoJob {
    /// Create a queue job for an existing job id, validating the prompt.
    pub fn new(
        job_id: JobId,
        owner_id: impl Into<String>,
        prompt: &str,
    ) -> Result<Self, PromptError> {
        Ok(Self {
            job_id,
            owner_id: owner_id.into(),
            prompt: validate_prompt(prompt)?,
            created_at: Utc::now(),
        })
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("generate:{}:{}", self.owner_id, self.job_id)
    }
}

impl From<&Job> for GenerateVideoJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            prompt: job.prompt.clone(),
            created_at: job.created_at,
        }
    }
}

/// A job handed to a consumer, with the queue's own attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Stream entry ID
    pub message_id: String,
    pub job: GenerateVideoJob,
    /// Failed attempts recorded so far; 0 on first delivery
    pub attempts_made: u32,
}

impl Delivery {
    /// 1-based number of the attempt this delivery represents.
    pub fn attempt_number(&self) -> u32 {
        self.attempts_made + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_job_validates_prompt() {
        let job = GenerateVideoJob::new(JobId::from_string("j1"), "u1", "  a lighthouse at dawn  ")
            .unwrap();
        assert_eq!(job.prompt, "a lighthouse at dawn");
        assert_eq!(job.idempotency_key(), "generate:u1:j1");

        assert!(GenerateVideoJob::new(JobId::new(), "u1", "short").is_err());
    }

    #[test]
    fn test_job_serialization() {
        let job = GenerateVideoJob::new(JobId::from_string("j1"), "u1", "a lighthouse at dawn")
            .unwrap();
        let json = serde_json::to_string(&job).unwrap();
        let parsed: GenerateVideoJob = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_from_job_record() {
        let record = Job::new("u1", "a lighthouse at dawn").unwrap();
        let job = GenerateVideoJob::from(&record);
        assert_eq!(job.job_id, record.id);
        assert_eq!(job.prompt, record.prompt);
    }
}
