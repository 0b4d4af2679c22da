//! Cluster-wide named locks so a scheduled job runs on one node at a time.
//!
//! A lock row carries its owner and an expiry instant. Acquisition succeeds
//! when the row is absent, expired or already owned by the caller, and is a
//! single compare-and-set statement against the shared store. A dead node's
//! lock simply lapses after its time-to-live.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::clock::Clock;
use crate::db::{lock_repo, Database, DatabaseError};
use crate::error::{EvalError, Result};

/// Result of a lock attempt that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Another owner holds a live lock.
    Contended,
}

/// Result of a release that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The caller did not hold the lock (it expired and was taken over, or
    /// was never acquired).
    NotHeld,
}

/// The lock operation itself failed; the lock state is unknown.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock store unavailable: {0}")]
    Store(#[from] DatabaseError),

    #[error("invalid lock ttl: {0:?}")]
    InvalidTtl(Duration),
}

/// Named, expiring mutual exclusion shared by every node.
pub trait ClusterLock: Send + Sync {
    fn obtain(
        &self,
        lock_id: &str,
        executor_id: &str,
        ttl: Duration,
    ) -> std::result::Result<LockOutcome, LockError>;

    fn release(
        &self,
        lock_id: &str,
        executor_id: &str,
    ) -> std::result::Result<ReleaseOutcome, LockError>;
}

/// Lock backed by the `cluster_locks` table of the shared database.
pub struct SqliteClusterLock {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteClusterLock {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl ClusterLock for SqliteClusterLock {
    fn obtain(
        &self,
        lock_id: &str,
        executor_id: &str,
        ttl: Duration,
    ) -> std::result::Result<LockOutcome, LockError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).map_err(|_| LockError::InvalidTtl(ttl))?;
        if ttl_ms == 0 {
            return Err(LockError::InvalidTtl(ttl));
        }
        let now_ms = self.clock.now_millis();
        let acquired = lock_repo::try_acquire(
            &self.db,
            lock_id,
            executor_id,
            now_ms,
            now_ms.saturating_add(ttl_ms),
        )?;
        if acquired {
            log::debug!("Lock {} acquired by {}", lock_id, executor_id);
            Ok(LockOutcome::Acquired)
        } else {
            Ok(LockOutcome::Contended)
        }
    }

    fn release(
        &self,
        lock_id: &str,
        executor_id: &str,
    ) -> std::result::Result<ReleaseOutcome, LockError> {
        if lock_repo::release(&self.db, lock_id, executor_id)? {
            log::debug!("Lock {} released by {}", lock_id, executor_id);
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::NotHeld)
        }
    }
}

/// Runs `f` while holding `lock_id`.
///
/// Contention maps to [`EvalError::LockContention`] and a failed lock
/// operation to [`EvalError::LockFailure`]; in both cases `f` is not run.
/// The lock is released afterwards whether or not `f` succeeded.
pub fn run_exclusive<T, F>(
    lock: &dyn ClusterLock,
    lock_id: &str,
    executor_id: &str,
    ttl: Duration,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match lock.obtain(lock_id, executor_id, ttl) {
        Ok(LockOutcome::Acquired) => {}
        Ok(LockOutcome::Contended) => {
            return Err(EvalError::LockContention {
                lock_id: lock_id.to_string(),
            })
        }
        Err(source) => {
            return Err(EvalError::LockFailure {
                lock_id: lock_id.to_string(),
                source,
            })
        }
    }

    let result = f();

    match lock.release(lock_id, executor_id) {
        Ok(ReleaseOutcome::Released) => {}
        Ok(ReleaseOutcome::NotHeld) => {
            log::warn!("Lock {} expired before {} finished", lock_id, executor_id)
        }
        Err(e) => log::error!("Failed to release lock {}: {}", lock_id, e),
    }

    result
}
