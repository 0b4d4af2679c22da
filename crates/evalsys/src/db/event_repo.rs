//! Audit trail of notification runs and lifecycle changes.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Database, DatabaseError};

/// A recorded audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub event_name: String,
    pub eval_id: Option<i64>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Appends an event.
pub fn record(
    db: &Database,
    event_name: &str,
    eval_id: Option<i64>,
    detail: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO eval_events (event_name, eval_id, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![event_name, eval_id, detail, now],
        )?;
        Ok(())
    })
}

/// Lists the events recorded for an evaluation, oldest first.
pub fn list_for_eval(db: &Database, eval_id: i64) -> Result<Vec<EventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT event_name, eval_id, detail, created_at FROM eval_events
             WHERE eval_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![eval_id], |r| {
                Ok(EventRow {
                    event_name: r.get(0)?,
                    eval_id: r.get(1)?,
                    detail: r.get(2)?,
                    created_at: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
