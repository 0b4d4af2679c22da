//! Cluster lock rows. Every mutation is a single compare-and-set statement.

use rusqlite::params;

use super::{Database, DatabaseError};

/// Takes the lock if it is free, expired, or already held by `owner_id`.
/// Returns true when this call now holds the lock.
pub fn try_acquire(
    db: &Database,
    lock_id: &str,
    owner_id: &str,
    now_ms: i64,
    expires_at_ms: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO cluster_locks (lock_id, owner_id, expires_at, acquired_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (lock_id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 expires_at = excluded.expires_at,
                 acquired_at = excluded.acquired_at
             WHERE cluster_locks.expires_at <= ?4 OR cluster_locks.owner_id = excluded.owner_id",
            params![lock_id, owner_id, expires_at_ms, now_ms],
        )?;
        Ok(changed == 1)
    })
}

/// Deletes the lock only if `owner_id` holds it. Returns true when released.
pub fn release(db: &Database, lock_id: &str, owner_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM cluster_locks WHERE lock_id = ?1 AND owner_id = ?2",
            params![lock_id, owner_id],
        )?;
        Ok(changed == 1)
    })
}

/// Returns the current holder and expiry of a lock, expired or not.
pub fn holder(db: &Database, lock_id: &str) -> Result<Option<(String, i64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT owner_id, expires_at FROM cluster_locks WHERE lock_id = ?1")?;
        let rows = stmt.query_map(params![lock_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        super::first_row(rows)
    })
}
