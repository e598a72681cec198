//! Progress records for client polling.
//!
//! A progress record is an advisory snapshot of what a job is doing right now.
//! It lives under a short TTL and its absence never means the job failed;
//! readers fall back to the durable job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sanitize::sanitize_error_text;
use crate::{JobId, Stage};

/// Live status shown to clients. The first five values double as
/// "currently executing this stage".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Script,
    Images,
    Audio,
    Captions,
    Render,
    Retrying,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Script => "script",
            ProgressStatus::Images => "images",
            ProgressStatus::Audio => "audio",
            ProgressStatus::Captions => "captions",
            ProgressStatus::Render => "render",
            ProgressStatus::Retrying => "retrying",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        }
    }

    /// The stage being executed, for the stage-valued statuses.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProgressStatus::Script => Some(Stage::Script),
            ProgressStatus::Images => Some(Stage::Images),
            ProgressStatus::Audio => Some(Stage::Audio),
            ProgressStatus::Captions => Some(Stage::Captions),
            ProgressStatus::Render => Some(Stage::Render),
            _ => None,
        }
    }
}

impl From<Stage> for ProgressStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Script => ProgressStatus::Script,
            Stage::Images => ProgressStatus::Images,
            Stage::Audio => ProgressStatus::Audio,
            Stage::Captions => ProgressStatus::Captions,
            Stage::Render => ProgressStatus::Render,
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Best-effort cause category shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Connectivity,
    ServiceUnavailable,
    Storage,
    #[default]
    Generic,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Connectivity => "connectivity",
            FailureCategory::ServiceUnavailable => "service_unavailable",
            FailureCategory::Storage => "storage",
            FailureCategory::Generic => "generic",
        }
    }

    /// Fixed user-facing sentence for the category.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureCategory::Connectivity => {
                "We couldn't reach one of our generation services."
            }
            FailureCategory::ServiceUnavailable => {
                "A generation service is temporarily unavailable."
            }
            FailureCategory::Storage => "We couldn't save the generated files.",
            FailureCategory::Generic => "Something went wrong while generating your video.",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub owner_id: String,
    pub status: ProgressStatus,
    /// Human-readable description of the current action
    pub step: String,
    /// Exact stage being executed or retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<Stage>,
    /// Present only while further attempts are possible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// User-facing error summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Diagnostic error text (sanitized)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<FailureCategory>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn base(
        job_id: &JobId,
        owner_id: &str,
        status: ProgressStatus,
        step: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.clone(),
            owner_id: owner_id.to_string(),
            status,
            step: step.into(),
            current_step_id: None,
            retry_count: None,
            max_retries: None,
            error: None,
            last_error: None,
            retry_reason: None,
            error_category: None,
            updated_at: Utc::now(),
        }
    }

    /// A stage is about to be dispatched.
    pub fn stage_started(job_id: &JobId, owner_id: &str, stage: Stage) -> Self {
        let mut record = Self::base(job_id, owner_id, stage.into(), stage.description());
        record.current_step_id = Some(stage);
        record
    }

    /// A new attempt is about to resume at `stage`.
    pub fn retrying(
        job_id: &JobId,
        owner_id: &str,
        stage: Stage,
        retry_count: u32,
        max_retries: u32,
    ) -> Self {
        let mut record = Self::base(
            job_id,
            owner_id,
            ProgressStatus::Retrying,
            format!(
                "Retrying {} (attempt {} of {})",
                stage.as_str(),
                retry_count,
                max_retries
            ),
        );
        record.current_step_id = Some(stage);
        record.retry_count = Some(retry_count);
        record.max_retries = Some(max_retries);
        record
    }

    /// The pipeline finished.
    pub fn completed(job_id: &JobId, owner_id: &str) -> Self {
        Self::base(job_id, owner_id, ProgressStatus::Completed, "Video ready")
    }

    /// An attempt failed at `stage`.
    pub fn failed(
        job_id: &JobId,
        owner_id: &str,
        stage: Option<Stage>,
        category: FailureCategory,
        diagnostic: impl Into<String>,
    ) -> Self {
        let step = match stage {
            Some(stage) => format!("Failed while {}", stage.description().to_lowercase()),
            None => "Failed".to_string(),
        };
        let mut record = Self::base(job_id, owner_id, ProgressStatus::Error, step);
        record.current_step_id = stage;
        record.error = Some(category.user_message().to_string());
        record.last_error = Some(diagnostic.into());
        record.error_category = Some(category);
        record
    }

    /// Attach retry bookkeeping, signalling that another attempt will run.
    pub fn with_retry(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = Some(retry_count);
        self.max_retries = Some(max_retries);
        self.retry_reason = self.last_error.clone();
        self
    }

    /// Whether clients should expect another automatic attempt.
    pub fn will_retry(&self) -> bool {
        self.retry_count.is_some() && self.max_retries.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            ProgressStatus::Completed => true,
            ProgressStatus::Error => !self.will_retry(),
            _ => false,
        }
    }

    /// Copy with every free-text error field sanitized.
    pub fn sanitized(mut self) -> Self {
        self.error = self.error.as_deref().map(sanitize_error_text);
        self.last_error = self.last_error.as_deref().map(sanitize_error_text);
        self.retry_reason = self.retry_reason.as_deref().map(sanitize_error_text);
        self
    }
}
