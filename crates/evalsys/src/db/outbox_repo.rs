//! Outbound mail written for an external relay to deliver.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A message waiting in (or delivered from) the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub id: i64,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

fn from_row(row: &Row<'_>) -> Result<OutboxRow, rusqlite::Error> {
    Ok(OutboxRow {
        id: row.get("id")?,
        from_address: row.get("from_address")?,
        to_address: row.get("to_address")?,
        subject: row.get("subject")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
        sent_at: row.get("sent_at")?,
    })
}

/// Queues one message per address.
pub fn enqueue(
    db: &Database,
    from: &str,
    to: &[String],
    subject: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "INSERT INTO outbox (from_address, to_address, subject, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for address in to {
            stmt.execute(params![from, address, subject, body, now])?;
        }
        Ok(())
    })
}

/// Lists messages not yet picked up by the relay, oldest first.
pub fn list_unsent(db: &Database, limit: u32) -> Result<Vec<OutboxRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM outbox WHERE sent_at IS NULL ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks a message as handed to the relay.
pub fn mark_sent(db: &Database, id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE outbox SET sent_at = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}
