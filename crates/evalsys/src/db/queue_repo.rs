//! Consolidated email queue: one row per (user, evaluation, group) awaiting
//! a digest email. Rows are selected by `prepare`, read page by page while
//! sending, and consumed one recipient at a time once their digest is out.
//! Rows of a failed send stay queued for the next run; `clear_processed`
//! drops whatever no longer qualifies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::assignment_repo::{self, SentColumn};
use super::{Database, DatabaseError};
use crate::model::UnknownVariant;

/// Which digest a queue row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Available,
    Reminder,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Available => "available",
            QueueKind::Reminder => "reminder",
        }
    }

    /// Assignment timestamp stamped when this digest is sent.
    pub fn sent_column(&self) -> SentColumn {
        match self {
            QueueKind::Available => SentColumn::Available,
            QueueKind::Reminder => SentColumn::Reminder,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(QueueKind::Available),
            "reminder" => Ok(QueueKind::Reminder),
            other => Err(UnknownVariant::new("queue kind", other)),
        }
    }
}

/// All pending work for one user in one digest.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecipient {
    pub user_id: String,
    /// Distinct evaluations, ordered by id.
    pub eval_ids: Vec<i64>,
    /// Earliest due date among the user's evaluations, if any has one.
    pub earliest_due: Option<DateTime<Utc>>,
}

/// Evaluator assignments that should receive a digest of `kind`. `?3` is
/// the suppression cutoff for reminders.
fn eligibility(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Available => "e.state = 'active' AND au.available_email_sent IS NULL",
        QueueKind::Reminder => {
            "e.state IN ('active', 'graceperiod')
             AND NOT EXISTS (SELECT 1 FROM responses r WHERE r.eval_id = au.eval_id
                 AND r.user_id = au.user_id AND r.group_id = au.group_id AND r.end_time IS NOT NULL)
             AND (?3 IS NULL OR au.available_email_sent IS NULL OR au.available_email_sent < ?3)
             AND (?3 IS NULL OR au.reminder_email_sent IS NULL OR au.reminder_email_sent < ?3)"
        }
    }
}

const ELIGIBLE_FROM: &str = "FROM assign_users au
         JOIN evaluations e ON e.id = au.eval_id
         JOIN assign_groups g ON g.eval_id = au.eval_id AND g.group_id = au.group_id
         WHERE au.assign_type = 'evaluator' AND au.status != 'removed'
           AND g.status != 'removed' AND g.instructor_approval = 1 AND g.published = 1";

fn purge_sql(kind: QueueKind) -> String {
    format!(
        "DELETE FROM email_queue WHERE kind = ?1 AND NOT EXISTS (
             SELECT 1 {} AND au.eval_id = email_queue.eval_id
               AND au.user_id = email_queue.user_id AND au.group_id = email_queue.group_id
               AND {})",
        ELIGIBLE_FROM,
        eligibility(kind)
    )
}

fn purge(
    conn: &Connection,
    kind: QueueKind,
    cutoff: Option<DateTime<Utc>>,
) -> Result<usize, DatabaseError> {
    let sql = purge_sql(kind);
    let removed = match kind {
        QueueKind::Available => conn.execute(&sql, params![kind.as_str()])?,
        QueueKind::Reminder => conn.execute(&sql, params![kind.as_str(), Option::<i64>::None, cutoff])?,
    };
    Ok(removed)
}

/// Fills the queue with evaluators who should receive a digest.
///
/// Rows left behind by an interrupted run are dropped first when their
/// assignment no longer qualifies (already stamped, submitted, closed).
/// `cutoff` suppresses users who were already emailed after that instant.
/// Returns the number of rows added.
pub fn prepare(
    db: &Database,
    kind: QueueKind,
    cutoff: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    let fill = format!(
        "INSERT OR IGNORE INTO email_queue (kind, user_id, eval_id, group_id, due_date, created_at)
         SELECT ?1, au.user_id, au.eval_id, au.group_id, e.due_date, ?2
         {} AND {}",
        ELIGIBLE_FROM,
        eligibility(kind)
    );
    db.with_tx(|tx| {
        let purged = purge(tx, kind, cutoff)?;
        if purged > 0 {
            log::info!("Dropped {} stale {} queue row(s)", purged, kind);
        }
        let added = match kind {
            QueueKind::Available => tx.execute(&fill, params![kind.as_str(), now])?,
            QueueKind::Reminder => tx.execute(&fill, params![kind.as_str(), now, cutoff])?,
        };
        Ok(added as u64)
    })
}

/// Clears rows whose assignment no longer needs this digest. Rows of
/// recipients whose send failed still qualify and stay for the next run.
pub fn clear_processed(
    db: &Database,
    kind: QueueKind,
    cutoff: Option<DateTime<Utc>>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| Ok(purge(conn, kind, cutoff)? as u64))
}

/// Returns up to `page_size` distinct queued users whose id sorts after
/// `after`, ordered by user id. Consumed users drop out of the queue, so
/// callers walk it with the last user id they saw rather than an offset.
pub fn fetch_page(
    db: &Database,
    kind: QueueKind,
    after: Option<&str>,
    page_size: u32,
) -> Result<Vec<QueuedRecipient>, DatabaseError> {
    db.with_conn(|conn| {
        let mut users_stmt = conn.prepare(
            "SELECT DISTINCT user_id FROM email_queue
             WHERE kind = ?1 AND (?2 IS NULL OR user_id > ?2)
             ORDER BY user_id LIMIT ?3",
        )?;
        let user_ids: Vec<String> = users_stmt
            .query_map(params![kind.as_str(), after, page_size], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows_stmt = conn.prepare(
            "SELECT DISTINCT eval_id, due_date FROM email_queue
             WHERE kind = ?1 AND user_id = ?2 ORDER BY eval_id",
        )?;
        let mut recipients = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let rows: Vec<(i64, Option<DateTime<Utc>>)> = rows_stmt
                .query_map(params![kind.as_str(), user_id], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let earliest_due = rows.iter().filter_map(|(_, due)| *due).min();
            let mut eval_ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
            eval_ids.dedup();
            recipients.push(QueuedRecipient {
                user_id,
                eval_ids,
                earliest_due,
            });
        }
        Ok(recipients)
    })
}

/// Stamps the recipient's assignments as emailed and removes their queue
/// rows in one transaction. Returns the number of rows removed.
pub fn consume(
    db: &Database,
    kind: QueueKind,
    recipient: &QueuedRecipient,
    at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_tx(|tx| {
        assignment_repo::stamp_sent(tx, kind.sent_column(), &recipient.user_id, &recipient.eval_ids, at)?;
        let removed = tx.execute(
            "DELETE FROM email_queue WHERE kind = ?1 AND user_id = ?2",
            params![kind.as_str(), recipient.user_id],
        )?;
        Ok(removed as u64)
    })
}

/// Counts distinct users waiting in the queue.
pub fn count_recipients(db: &Database, kind: QueueKind) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM email_queue WHERE kind = ?1",
            params![kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
