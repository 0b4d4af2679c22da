//! Response progress: only the start/end markers the resolver needs.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Database, DatabaseError};

/// Records that a user opened the evaluation for a group.
pub fn start(
    db: &Database,
    eval_id: i64,
    user_id: &str,
    group_id: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO responses (eval_id, user_id, group_id, start_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![eval_id, user_id, group_id, at],
        )?;
        Ok(())
    })
}

/// Marks a response as submitted, creating it if it was never started.
pub fn complete(
    db: &Database,
    eval_id: i64,
    user_id: &str,
    group_id: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO responses (eval_id, user_id, group_id, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (eval_id, user_id, group_id) DO UPDATE SET end_time = excluded.end_time",
            params![eval_id, user_id, group_id, at],
        )?;
        Ok(())
    })
}

/// Counts submitted responses for an evaluation.
pub fn count_completed(db: &Database, eval_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE eval_id = ?1 AND end_time IS NOT NULL",
            params![eval_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
