//! User directory: maps user ids to addresses and locales.

use rusqlite::{params, Row};

use super::{first_row, Database, DatabaseError};
use crate::model::User;

fn from_row(row: &Row<'_>) -> Result<User, rusqlite::Error> {
    Ok(User {
        user_id: row.get("user_id")?,
        email: row.get("email")?,
        display_name: row.get("display_name")?,
        locale: row.get("locale")?,
    })
}

/// Inserts or replaces a directory entry.
pub fn upsert(db: &Database, user: &User) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (user_id, email, display_name, locale) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id) DO UPDATE SET email = excluded.email,
                 display_name = excluded.display_name, locale = excluded.locale",
            params![user.user_id, user.email, user.display_name, user.locale],
        )?;
        Ok(())
    })
}

/// Finds a user by id.
pub fn find_by_id(db: &Database, user_id: &str) -> Result<Option<User>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM users WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], from_row)?;
        first_row(rows)
    })
}

/// Loads the users for the given ids, preserving the order of `user_ids`.
/// Unknown ids are skipped.
pub fn find_many(db: &Database, user_ids: &[String]) -> Result<Vec<User>, DatabaseError> {
    let mut users = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        if let Some(user) = find_by_id(db, user_id)? {
            users.push(user);
        }
    }
    Ok(users)
}
