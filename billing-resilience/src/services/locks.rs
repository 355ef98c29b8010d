//! Per-account exclusivity and in-flight charge claims.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per account. Accounts never share a lock.
///
/// Guards are not reentrant: code holding an account guard must not call back
/// into anything that locks the same account.
#[derive(Debug, Default, Clone)]
pub struct AccountLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let mutex = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Payment failures with a charge currently in flight in this process.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    claims: Arc<DashSet<Uuid>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `failure_id`; `None` when another task already holds it.
    pub fn claim(&self, failure_id: Uuid) -> Option<InFlightClaim> {
        self.claims.insert(failure_id).then(|| InFlightClaim {
            claims: Arc::clone(&self.claims),
            failure_id,
        })
    }

    pub fn contains(&self, failure_id: Uuid) -> bool {
        self.claims.contains(&failure_id)
    }
}

/// Releases the claim on drop.
#[derive(Debug)]
pub struct InFlightClaim {
    claims: Arc<DashSet<Uuid>>,
    failure_id: Uuid,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.failure_id);
    }
}
