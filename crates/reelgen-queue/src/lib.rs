//! Redis Streams job queue and per-job state stores.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams, with scheduled redelivery and DLQ
//! - The checkpoint store (durable resume state)
//! - The progress publisher (short-lived status for polling clients)
//! - A per-job lease

pub mod backend;
pub mod checkpoint;
pub mod error;
pub mod job;
pub mod lease;
pub mod progress;
pub mod queue;

pub use backend::{MemoryStateStore, RedisStateStore, StateStore};
pub use checkpoint::{CheckpointStore, CHECKPOINT_KEY_PREFIX, CHECKPOINT_TTL};
pub use error::{QueueError, QueueResult};
pub use job::{Delivery, GenerateVideoJob};
pub use lease::{JobLease, Lease, LeaseAcquisition, LEASE_KEY_PREFIX};
pub use progress::{ProgressStore, PROGRESS_KEY_PREFIX, PROGRESS_TTL};
pub use queue::{JobQueue, QueueConfig};
