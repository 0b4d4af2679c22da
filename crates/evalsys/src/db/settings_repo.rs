//! Persisted runtime settings. Values are stored as JSON; SQL NULL means
//! the setting was explicitly cleared.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Stored state of one setting row.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredSetting {
    Missing,
    Null,
    Value(serde_json::Value),
}

/// Loads a setting row by name.
pub fn find(db: &Database, name: &str) -> Result<StoredSetting, DatabaseError> {
    db.with_conn(|conn| {
        let row: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        match row {
            None => Ok(StoredSetting::Missing),
            Some(None) => Ok(StoredSetting::Null),
            Some(Some(raw)) => serde_json::from_str(&raw)
                .map(StoredSetting::Value)
                .map_err(|_| DatabaseError::Decode {
                    column: "settings.value",
                    value: raw,
                }),
        }
    })
}

/// Stores a setting; `None` stores an explicit null.
pub fn upsert(
    db: &Database,
    name: &str,
    value: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let raw = value.map(|v| v.to_string());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![name, raw, now],
        )?;
        Ok(())
    })
}
