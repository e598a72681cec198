//! Per-job lease.
//!
//! Two deliveries of the same job must not run the pipeline at once. The
//! lease is a `SET NX EX` key holding a random token and released with
//! compare-and-delete, so a holder whose lease expired cannot drop a lease
//! taken by someone else.

use std::sync::Arc;
use std::time::Duration;

use reelgen_models::JobId;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::StateStore;

pub const LEASE_KEY_PREFIX: &str = "reelgen:lease:";

/// A held lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    token: String,
}

/// Result of trying to take a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquisition {
    Acquired(Lease),
    /// Another attempt holds the lease.
    Held,
    /// The store could not be reached. Callers proceed without a lease.
    Unavailable,
}

#[derive(Clone)]
pub struct JobLease {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl JobLease {
    /// `ttl` must exceed the longest attempt.
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(job_id: &JobId) -> String {
        format!("{}{}", LEASE_KEY_PREFIX, job_id)
    }

    pub async fn acquire(&self, job_id: &JobId) -> LeaseAcquisition {
        let token = Uuid::new_v4().to_string();
        match self.store.set_nx_ex(&Self::key(job_id), &token, self.ttl).await {
            Ok(true) => {
                debug!(job_id = %job_id, "Lease acquired");
                LeaseAcquisition::Acquired(Lease {
                    job_id: job_id.clone(),
                    token,
                })
            }
            Ok(false) => LeaseAcquisition::Held,
            Err(e) => {
                warn!(job_id = %job_id, "Lease store unavailable, running unleased: {}", e);
                LeaseAcquisition::Unavailable
            }
        }
    }

    pub async fn release(&self, lease: Lease) {
        match self
            .store
            .delete_if_eq(&Self::key(&lease.job_id), &lease.token)
            .await
        {
            Ok(true) => debug!(job_id = %lease.job_id, "Lease released"),
            Ok(false) => warn!(job_id = %lease.job_id, "Lease expired before release"),
            Err(e) => warn!(job_id = %lease.job_id, "Failed to release lease: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStateStore;

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let backend = Arc::new(MemoryStateStore::new());
        let leases = JobLease::new(backend.clone(), Duration::from_secs(60));
        let job_id = JobId::from_string("job-1");

        let LeaseAcquisition::Acquired(lease) = leases.acquire(&job_id).await else {
            panic!("expected first acquisition to succeed");
        };
        assert_eq!(leases.acquire(&job_id).await, LeaseAcquisition::Held);

        leases.release(lease).await;
        assert!(matches!(
            leases.acquire(&job_id).await,
            LeaseAcquisition::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_lease() {
        let backend = Arc::new(MemoryStateStore::new());
        let leases = JobLease::new(backend.clone(), Duration::from_millis(10));
        let job_id = JobId::from_string("job-1");

        let LeaseAcquisition::Acquired(stale) = leases.acquire(&job_id).await else {
            panic!("expected acquisition");
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let LeaseAcquisition::Acquired(_fresh) = leases.acquire(&job_id).await else {
            panic!("expected acquisition after expiry");
        };
        leases.release(stale).await;
        assert_eq!(leases.acquire(&job_id).await, LeaseAcquisition::Held);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let backend = Arc::new(MemoryStateStore::new());
        backend.set_offline(true);
        let leases = JobLease::new(backend, Duration::from_secs(60));
        assert_eq!(
            leases.acquire(&JobId::from_string("job-1")).await,
            LeaseAcquisition::Unavailable
        );
    }
}
