//! Shared data models for the Reelgen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job status and prompt validation
//! - Pipeline stages and per-job checkpoints
//! - Progress records polled by clients
//! - Caption payloads consumed by the render stage
//! - Error-text sanitization applied before anything is persisted

pub mod caption;
pub mod checkpoint;
pub mod job;
pub mod progress;
pub mod sanitize;
pub mod stage;

// Re-export common types
pub use caption::{render_duration_secs, Caption, DEFAULT_RENDER_DURATION_SECS};
pub use checkpoint::{next_stage, Checkpoint, CompletedSteps, NextStage};
pub use job::{validate_prompt, Job, JobId, JobStatus, JobTransitionError, PromptError};
pub use progress::{FailureCategory, ProgressRecord, ProgressStatus};
pub use sanitize::{
    sanitize_error_text, REDACTED_BEARER, REDACTED_IP, REDACTED_PATH, REDACTED_TOKEN,
};
pub use stage::{ParseStageError, Stage};
