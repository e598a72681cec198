//! Checkpoint store: durable per-job resume state.
//!
//! Reads never fail the caller; an unreachable store reads as "no checkpoint",
//! which only costs redundant work. Writes are logged and swallowed. A write
//! first loads the current record and is skipped when that load fails, so a
//! stage that was recorded complete is never overwritten with `false`.

use std::sync::Arc;
use std::time::Duration;

use reelgen_models::{Checkpoint, JobId, Stage};
use tracing::{debug, warn};

use crate::backend::StateStore;
use crate::error::QueueResult;

pub const CHECKPOINT_KEY_PREFIX: &str = "reelgen:checkpoint:";

/// Default checkpoint TTL (2 hours).
pub const CHECKPOINT_TTL: Duration = Duration::from_secs(2 * 3600);

#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_ttl(store, CHECKPOINT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(job_id: &JobId) -> String {
        format!("{}{}", CHECKPOINT_KEY_PREFIX, job_id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the checkpoint, reading an unreachable store as absent.
    pub async fn get(&self, job_id: &JobId) -> Option<Checkpoint> {
        match self.load(job_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(job_id = %job_id, "Checkpoint read failed, treating as absent: {}", e);
                None
            }
        }
    }

    /// Record `stage` as completed.
    pub async fn mark_completed(&self, job_id: &JobId, owner_id: &str, stage: Stage) {
        self.update(job_id, owner_id, "completed", |checkpoint| {
            checkpoint.mark_completed(stage)
        })
        .await;
    }

    /// Record `stage` as the most recent failure. Completed stages are kept.
    pub async fn mark_failed(&self, job_id: &JobId, owner_id: &str, stage: Stage) {
        self.update(job_id, owner_id, "failed", |checkpoint| {
            checkpoint.mark_failed(stage)
        })
        .await;
    }

    /// Remove the checkpoint after the pipeline has finished.
    pub async fn delete(&self, job_id: &JobId) {
        match self.store.delete(&Self::key(job_id)).await {
            Ok(()) => debug!(job_id = %job_id, "Deleted checkpoint"),
            Err(e) => warn!(job_id = %job_id, "Failed to delete checkpoint: {}", e),
        }
    }

    async fn load(&self, job_id: &JobId) -> QueueResult<Option<Checkpoint>> {
        let Some(raw) = self.store.get(&Self::key(job_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                // Unparseable records carry nothing to preserve.
                warn!(job_id = %job_id, "Discarding corrupt checkpoint: {}", e);
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        job_id: &JobId,
        owner_id: &str,
        action: &str,
        apply: impl FnOnce(&mut Checkpoint),
    ) {
        let mut checkpoint = match self.load(job_id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => Checkpoint::new(job_id.clone(), owner_id),
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    action,
                    "Skipping checkpoint write, current record unreadable: {}", e
                );
                return;
            }
        };

        apply(&mut checkpoint);

        let payload = match serde_json::to_string(&checkpoint) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %job_id, "Failed to serialize checkpoint: {}", e);
                return;
            }
        };

        match self.store.set_ex(&Self::key(job_id), &payload, self.ttl).await {
            Ok(()) => debug!(job_id = %job_id, action, "Checkpoint updated"),
            Err(e) => warn!(job_id = %job_id, action, "Failed to persist checkpoint: {}", e),
        }
    }
}
