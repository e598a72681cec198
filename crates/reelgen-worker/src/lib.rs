//! Resumable generation pipeline worker.
//!
//! This crate provides:
//! - The five-stage pipeline driver with checkpointed resume
//! - Failure classification and the retry coordinator
//! - Stage executors backed by the content service and render farm
//! - The queue-driven job executor with graceful shutdown
//! - A read-side status view for clients

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod executor;
pub mod job_store;
pub mod logging;
pub mod metrics;
pub mod remote;
pub mod render;
pub mod retry;
pub mod stages;
pub mod status;

pub use classifier::{failure_category, is_retryable, is_retryable_message};
pub use config::WorkerConfig;
pub use coordinator::{AttemptFailure, AttemptOutcome, RetryCoordinator};
pub use driver::{DriverOutcome, PipelineDriver, StageFailure};
pub use error::{ConfigError, StageError, StageResult, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use job_store::JobStore;
pub use logging::{init_tracing, JobLogger};
pub use remote::{build_registry, ContentJobStore, RemoteStage};
pub use render::{RenderFarm, RenderPoll, RenderStage};
pub use retry::{FailureTracker, RetryPolicy};
pub use stages::{StageExecutor, StageRegistry};
pub use status::{JobStatusView, StatusReader};
