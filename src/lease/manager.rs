// Lease manager - handles creation, acquisition, renewal and destruction

use super::{LeaseId, LeaseSpec, RenewalSignal};
use crate::store::{CoordinationStore, KvPair, SessionEntry};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Wait between renewal attempts after a transient failure
const RENEW_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Manages the lifecycle of exactly one lease
#[derive(Debug)]
pub struct LeaseManager {
    store: Arc<dyn CoordinationStore>,

    spec: LeaseSpec,

    /// Current lease, `None` before create and after destroy
    lease: Mutex<Option<LeaseId>>,

    /// Successful renewals of the current lease
    renewals: AtomicU32,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn CoordinationStore>, spec: LeaseSpec) -> Self {
        Self {
            store,
            spec,
            lease: Mutex::new(None),
            renewals: AtomicU32::new(0),
        }
    }

    pub fn spec(&self) -> &LeaseSpec {
        &self.spec
    }

    pub fn lease_id(&self) -> Option<LeaseId> {
        self.lease.lock().clone()
    }

    pub fn renewal_count(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Request a new lease from the store. No retry: a failure aborts the attempt.
    pub async fn create(&self) -> Result<LeaseId> {
        if let Some(lease_id) = self.lease_id() {
            return Err(Error::LeaseAlreadyCreated { lease_id });
        }

        let lease_id = self
            .store
            .session_create(&SessionEntry::from(&self.spec))
            .await?;
        debug!(
            "created lease {} (ttl {:?}, behavior {})",
            lease_id, self.spec.ttl, self.spec.behavior
        );

        *self.lease.lock() = Some(lease_id.clone());
        self.renewals.store(0, Ordering::SeqCst);
        Ok(lease_id)
    }

    /// Try to bind the lock record at `key` to our lease.
    /// `Ok(false)` means another lease holds it.
    pub async fn acquire(&self, key: &str, value: &[u8]) -> Result<bool> {
        let lease_id = self.lease_id().ok_or(Error::NoLease)?;
        let held = self
            .store
            .kv_acquire(&KvPair::new(key, value, lease_id.clone()))
            .await?;
        debug!("lease {} acquire {:?}: {}", lease_id, key, held);
        Ok(held)
    }

    /// Refresh the lease every ttl/2 until `signal` is closed.
    ///
    /// Returns `Ok(())` once the signal closes. Returns an error when the store
    /// no longer knows the lease, or when it could not be reached for a full
    /// TTL since the last successful renewal.
    pub async fn renew_periodically(&self, signal: RenewalSignal) -> Result<()> {
        let lease_id = self.lease_id().ok_or(Error::NoLease)?;
        let ttl = self.spec.ttl;
        let interval = self.spec.renewal_interval();
        let mut wait = interval;
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                _ = signal.closed() => {
                    debug!("renewal of lease {} stopped", lease_id);
                    return Ok(());
                }
                _ = sleep(wait) => {}
            }

            match self.store.session_renew(&lease_id, ttl).await {
                Ok(()) => {
                    last_renewed = Instant::now();
                    wait = interval;
                    let count = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!("renewed lease {} ({} renewals)", lease_id, count);
                }
                Err(Error::StoreUnavailable(reason)) => {
                    let elapsed = last_renewed.elapsed();
                    if elapsed >= ttl {
                        return Err(Error::StoreUnavailable(format!(
                            "lease {} not renewed for {:?}: {}",
                            lease_id, elapsed, reason
                        )));
                    }
                    warn!("renewal of lease {} failed, retrying: {}", lease_id, reason);
                    wait = RENEW_RETRY_INTERVAL.min(interval).min(ttl - elapsed);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Invalidate the lease; owned lock records follow the expiry behavior.
    ///
    /// Idempotent: destroying a lease that is gone, or was never created, succeeds.
    pub async fn destroy(&self) -> Result<()> {
        // The id stays recorded until the store has answered, so a destroy
        // that is dropped midway can still be retried
        let Some(lease_id) = self.lease_id() else {
            return Ok(());
        };

        match self.store.session_destroy(&lease_id).await {
            Ok(()) => debug!("destroyed lease {}", lease_id),
            Err(Error::LeaseAlreadyInvalid { .. }) => debug!("lease {} already gone", lease_id),
            Err(e) => return Err(e),
        }

        let mut lease = self.lease.lock();
        if lease.as_ref() == Some(&lease_id) {
            *lease = None;
        }
        Ok(())
    }
}
