//! Versioned schema changes, recorded in `_migrations`.
//!
//! Column additions check `PRAGMA table_info` first so a database patched
//! by hand still migrates cleanly.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN; skip if column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_evaluations_table",
        sql: include_str!("sql/001_create_evaluations.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_assignment_tables",
        sql: include_str!("sql/002_create_assignments.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_users_and_responses_tables",
        sql: include_str!("sql/003_create_users_and_responses.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_email_templates_table",
        sql: include_str!("sql/004_create_email_templates.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "create_job_checkpoints_table",
        sql: include_str!("sql/005_create_job_checkpoints.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 6,
        description: "create_cluster_locks_table",
        sql: include_str!("sql/006_create_cluster_locks.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 7,
        description: "create_settings_table",
        sql: include_str!("sql/007_create_settings.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 8,
        description: "create_email_queue_outbox_events",
        sql: include_str!("sql/008_create_email_queue.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 9,
        description: "add_next_reminder_at_to_evaluations",
        sql: include_str!("sql/009_add_next_reminder_at.sql"),
        kind: MigrationKind::AddColumn {
            table: "evaluations",
            column: "next_reminder_at",
        },
    },
];

/// Applies every migration newer than the recorded version. Each one runs
/// in its own transaction together with its `_migrations` row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let tx = conn.unchecked_transaction()?;
    let needed = match &migration.kind {
        MigrationKind::Standard => true,
        MigrationKind::AddColumn { table, column } => !has_column(&tx, table, column)?,
    };
    if needed {
        log::info!("Applying schema v{}: {}", migration.version, migration.description);
        tx.execute_batch(migration.sql).map_err(failed)?;
    } else {
        log::debug!("Schema v{} already present, recording only", migration.version);
    }
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit()?;
    Ok(())
}

/// Whether `table` has `column`, via `PRAGMA table_info`.
fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);

        let templates: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM email_templates WHERE default_template = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(templates, 7);
    }

    #[test]
    fn test_has_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE test_tbl (id TEXT, name TEXT);")
            .unwrap();

        assert!(has_column(&conn, "test_tbl", "id").unwrap());
        assert!(!has_column(&conn, "test_tbl", "missing").unwrap());
        assert!(has_column(&conn, "bad;name", "id").is_err());
    }

    #[test]
    fn test_evaluations_have_next_reminder_at() {
        let conn = migrated();
        assert!(has_column(&conn, "evaluations", "next_reminder_at").unwrap());
    }

    #[test]
    fn test_add_column_skipped_when_present() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn.execute_batch(include_str!("sql/001_create_evaluations.sql"))
            .unwrap();
        conn.execute_batch(include_str!("sql/009_add_next_reminder_at.sql"))
            .unwrap();

        // Tables already exist; v9 must be skipped rather than fail.
        run_all(&conn).unwrap();
        assert!(has_column(&conn, "evaluations", "next_reminder_at").unwrap());
    }
}
