//! Progress publisher: short-lived status records for client polling.
//!
//! Publishing is a side effect only. Failures are logged and never reach the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use reelgen_models::{JobId, ProgressRecord};
use tracing::{debug, warn};

use crate::backend::StateStore;

pub const PROGRESS_KEY_PREFIX: &str = "reelgen:progress:";

/// Default progress TTL (1 hour).
pub const PROGRESS_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct ProgressStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_ttl(store, PROGRESS_TTL)
    }

    pub fn with_ttl(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(job_id: &JobId) -> String {
        format!("{}{}", PROGRESS_KEY_PREFIX, job_id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Upsert the record for its job. Free-text error fields are sanitized
    /// before anything is written.
    pub async fn publish(&self, record: &ProgressRecord) {
        let record = record.clone().sanitized();
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %record.job_id, "Failed to serialize progress record: {}", e);
                return;
            }
        };

        match self
            .store
            .set_ex(&Self::key(&record.job_id), &payload, self.ttl)
            .await
        {
            Ok(()) => debug!(job_id = %record.job_id, status = %record.status, "Published progress"),
            Err(e) => warn!(job_id = %record.job_id, "Failed to publish progress: {}", e),
        }
    }

    /// Current record, if any. Absence means "unknown", never "failed".
    pub async fn read(&self, job_id: &JobId) -> Option<ProgressRecord> {
        let raw = match self.store.get(&Self::key(job_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(job_id = %job_id, "Progress read failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(job_id = %job_id, "Ignoring malformed progress record: {}", e);
                None
            }
        }
    }

    pub async fn clear(&self, job_id: &JobId) {
        if let Err(e) = self.store.delete(&Self::key(job_id)).await {
            warn!(job_id = %job_id, "Failed to clear progress: {}", e);
        }
    }
}
