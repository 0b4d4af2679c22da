//! Evaluation repository: CRUD operations for the `evaluations` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{first_row, parse_column, Database, DatabaseError};
use crate::model::{EvalState, Evaluation};

fn from_row(row: &Row<'_>) -> Result<Evaluation, rusqlite::Error> {
    Ok(Evaluation {
        id: Some(row.get("id")?),
        owner: row.get("owner")?,
        title: row.get("title")?,
        state: parse_column(row, "state")?,
        start_date: row.get("start_date")?,
        due_date: row.get("due_date")?,
        stop_date: row.get("stop_date")?,
        view_date: row.get("view_date")?,
        student_view_results: row.get("student_view_results")?,
        instructor_view_results: row.get("instructor_view_results")?,
        student_view_date: row.get("student_view_date")?,
        instructor_view_date: row.get("instructor_view_date")?,
        instructor_opt: parse_column(row, "instructor_opt")?,
        instructor_adds_items: row.get("instructor_adds_items")?,
        allow_edit_responses: row.get("allow_edit_responses")?,
        reminder_days: row.get("reminder_days")?,
        reminder_from_email: row.get("reminder_from_email")?,
        locked: row.get("locked")?,
        results_sharing: parse_column(row, "results_sharing")?,
        anonymous: row.get("anonymous")?,
        next_reminder_at: row.get("next_reminder_at")?,
    })
}

/// Inserts a new evaluation and returns its id.
pub fn insert(db: &Database, eval: &Evaluation, now: DateTime<Utc>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO evaluations (owner, title, state, start_date, due_date, stop_date,
             view_date, student_view_results, instructor_view_results, student_view_date,
             instructor_view_date, instructor_opt, instructor_adds_items, allow_edit_responses,
             reminder_days, reminder_from_email, locked, results_sharing, anonymous,
             next_reminder_at, created_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?21)",
            params![
                eval.owner,
                eval.title,
                eval.state.as_str(),
                eval.start_date,
                eval.due_date,
                eval.stop_date,
                eval.view_date,
                eval.student_view_results,
                eval.instructor_view_results,
                eval.student_view_date,
                eval.instructor_view_date,
                eval.instructor_opt.as_str(),
                eval.instructor_adds_items,
                eval.allow_edit_responses,
                eval.reminder_days,
                eval.reminder_from_email,
                eval.locked,
                eval.results_sharing.as_str(),
                eval.anonymous,
                eval.next_reminder_at,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Overwrites every mutable column of a saved evaluation.
/// Returns false when no row has that id.
pub fn update(db: &Database, eval: &Evaluation, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let Some(id) = eval.id else {
        return Ok(false);
    };
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE evaluations SET owner=?2, title=?3, state=?4, start_date=?5, due_date=?6,
             stop_date=?7, view_date=?8, student_view_results=?9, instructor_view_results=?10,
             student_view_date=?11, instructor_view_date=?12, instructor_opt=?13,
             instructor_adds_items=?14, allow_edit_responses=?15, reminder_days=?16,
             reminder_from_email=?17, locked=?18, results_sharing=?19, anonymous=?20,
             next_reminder_at=?21, last_modified=?22
             WHERE id=?1",
            params![
                id,
                eval.owner,
                eval.title,
                eval.state.as_str(),
                eval.start_date,
                eval.due_date,
                eval.stop_date,
                eval.view_date,
                eval.student_view_results,
                eval.instructor_view_results,
                eval.student_view_date,
                eval.instructor_view_date,
                eval.instructor_opt.as_str(),
                eval.instructor_adds_items,
                eval.allow_edit_responses,
                eval.reminder_days,
                eval.reminder_from_email,
                eval.locked,
                eval.results_sharing.as_str(),
                eval.anonymous,
                eval.next_reminder_at,
                now,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Persists only the state column.
pub fn update_state(
    db: &Database,
    id: i64,
    state: EvalState,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE evaluations SET state = ?2, last_modified = ?3 WHERE id = ?1",
            params![id, state.as_str(), now],
        )?;
        Ok(changed == 1)
    })
}

/// Records when the next reminder run for an evaluation is due.
pub fn set_next_reminder_at(
    db: &Database,
    id: i64,
    next: Option<DateTime<Utc>>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE evaluations SET next_reminder_at = ?2 WHERE id = ?1",
            params![id, next],
        )?;
        Ok(())
    })
}

/// Finds an evaluation by its id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<Evaluation>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM evaluations WHERE id = ?1")?;
        let rows = stmt.query_map(params![id], from_row)?;
        first_row(rows)
    })
}

/// Lists evaluations whose persisted state is one of `states`, ordered by id.
pub fn list_by_states(db: &Database, states: &[EvalState]) -> Result<Vec<Evaluation>, DatabaseError> {
    if states.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (1..=states.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT * FROM evaluations WHERE state IN ({}) ORDER BY id",
            placeholders.join(", ")
        );
        let names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(names), from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists every evaluation that is not sticky (partial or deleted).
pub fn list_recomputable(db: &Database) -> Result<Vec<Evaluation>, DatabaseError> {
    list_by_states(
        db,
        &[
            EvalState::InQueue,
            EvalState::Active,
            EvalState::GracePeriod,
            EvalState::Closed,
            EvalState::Viewable,
        ],
    )
}

/// Lists open evaluations with reminders enabled whose next reminder is due.
pub fn list_due_for_reminder(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<Evaluation>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM evaluations
             WHERE state IN ('active', 'graceperiod')
               AND reminder_days > 0
               AND (next_reminder_at IS NULL OR next_reminder_at <= ?1)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![now], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample(title: &str) -> Evaluation {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut eval = Evaluation::new("admin", title, start);
        eval.due_date = Some(start + Duration::days(14));
        eval
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let now = Utc::now();
        let id = insert(&db, &sample("Midterm"), now).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert_eq!(found.title, "Midterm");
        assert_eq!(found.state, EvalState::Partial);
        assert_eq!(found.due_date, sample("x").due_date);
        assert!(find_by_id(&db, id + 100).unwrap().is_none());
    }

    #[test]
    fn test_update_and_update_state() {
        let db = test_db();
        let now = Utc::now();
        let id = insert(&db, &sample("Midterm"), now).unwrap();

        let mut eval = find_by_id(&db, id).unwrap().unwrap();
        eval.title = "Midterm (revised)".to_string();
        eval.reminder_days = 3;
        assert!(update(&db, &eval, now).unwrap());

        assert!(update_state(&db, id, EvalState::Active, now).unwrap());
        let reloaded = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(reloaded.title, "Midterm (revised)");
        assert_eq!(reloaded.reminder_days, 3);
        assert_eq!(reloaded.state, EvalState::Active);

        assert!(!update(&db, &sample("unsaved"), now).unwrap());
    }

    #[test]
    fn test_list_recomputable_skips_sticky_states() {
        let db = test_db();
        let now = Utc::now();
        let partial = insert(&db, &sample("draft"), now).unwrap();
        let active = insert(&db, &sample("open"), now).unwrap();
        let deleted = insert(&db, &sample("gone"), now).unwrap();
        update_state(&db, active, EvalState::Active, now).unwrap();
        update_state(&db, deleted, EvalState::Deleted, now).unwrap();

        let ids: Vec<i64> = list_recomputable(&db)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![active]);
        assert!(!ids.contains(&partial));
    }

    #[test]
    fn test_list_due_for_reminder() {
        let db = test_db();
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();

        let mut due = sample("due");
        due.state = EvalState::Active;
        due.reminder_days = 2;
        let due_id = insert(&db, &due, now).unwrap();

        let mut later = sample("later");
        later.state = EvalState::Active;
        later.reminder_days = 2;
        later.next_reminder_at = Some(now + Duration::days(1));
        insert(&db, &later, now).unwrap();

        let mut disabled = sample("disabled");
        disabled.state = EvalState::Active;
        insert(&db, &disabled, now).unwrap();

        let ids: Vec<i64> = list_due_for_reminder(&db, now)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![due_id]);
    }
}
