//! Resumable job checkpoints, keyed by (job type, evaluation).
//!
//! A checkpoint is written after each group of a dispatch run completes and
//! removed when the run finishes. A row that survives means the run was
//! interrupted and the next run resumes after `current_group_id`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{first_row, Database, DatabaseError};

/// Progress of an in-flight or interrupted per-group dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderStatus {
    pub total_groups: u32,
    pub processed_count: u32,
    /// Last group that was fully processed.
    pub current_group_id: String,
}

fn from_row(row: &Row<'_>) -> Result<ReminderStatus, rusqlite::Error> {
    Ok(ReminderStatus {
        total_groups: row.get("total_groups")?,
        processed_count: row.get("processed_count")?,
        current_group_id: row.get("current_group_id")?,
    })
}

/// Reads the checkpoint for a job and evaluation, if any.
pub fn find(
    db: &Database,
    job_type: &str,
    eval_id: i64,
) -> Result<Option<ReminderStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT total_groups, processed_count, current_group_id
             FROM job_checkpoints WHERE job_type = ?1 AND eval_id = ?2",
        )?;
        let rows = stmt.query_map(params![job_type, eval_id], from_row)?;
        first_row(rows)
    })
}

/// Writes (or replaces) the checkpoint in a single transaction.
pub fn save(
    db: &Database,
    job_type: &str,
    eval_id: i64,
    status: &ReminderStatus,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        tx.execute(
            "INSERT INTO job_checkpoints (job_type, eval_id, total_groups, processed_count,
             current_group_id, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (job_type, eval_id) DO UPDATE SET
                 total_groups = excluded.total_groups,
                 processed_count = excluded.processed_count,
                 current_group_id = excluded.current_group_id,
                 updated_at = excluded.updated_at",
            params![
                job_type,
                eval_id,
                status.total_groups,
                status.processed_count,
                status.current_group_id,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Removes the checkpoint, returning the job to idle.
pub fn clear(db: &Database, job_type: &str, eval_id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM job_checkpoints WHERE job_type = ?1 AND eval_id = ?2",
            params![job_type, eval_id],
        )?;
        Ok(())
    })
}
