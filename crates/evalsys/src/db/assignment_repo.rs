//! Assignment repository: the `assign_groups` and `assign_users` tables.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{parse_column, Database, DatabaseError};
use crate::model::{AssignGroup, AssignStatus, AssignType, AssignUser, EvalState, IncludeConstant};

fn group_from_row(row: &Row<'_>) -> Result<AssignGroup, rusqlite::Error> {
    Ok(AssignGroup {
        id: Some(row.get("id")?),
        eval_id: row.get("eval_id")?,
        group_id: row.get("group_id")?,
        group_title: row.get("group_title")?,
        instructor_approval: row.get("instructor_approval")?,
        instructors_view_results: row.get("instructors_view_results")?,
        students_view_results: row.get("students_view_results")?,
        published: row.get("published")?,
        status: parse_column(row, "status")?,
    })
}

fn user_from_row(row: &Row<'_>) -> Result<AssignUser, rusqlite::Error> {
    Ok(AssignUser {
        id: Some(row.get("id")?),
        eval_id: row.get("eval_id")?,
        user_id: row.get("user_id")?,
        group_id: row.get("group_id")?,
        assign_type: parse_column(row, "assign_type")?,
        status: parse_column(row, "status")?,
        list_order: row.get("list_order")?,
        available_email_sent: row.get("available_email_sent")?,
        reminder_email_sent: row.get("reminder_email_sent")?,
    })
}

/// Filter for assignment user queries. Every `None` field is unconstrained.
#[derive(Debug, Default, Clone)]
pub struct AssignUserFilter {
    pub eval_id: Option<i64>,
    pub user_id: Option<String>,
    /// An empty list matches nothing.
    pub group_ids: Option<Vec<String>>,
    pub assign_type: Option<AssignType>,
    /// `None` matches every status.
    pub statuses: Option<Vec<AssignStatus>>,
    pub include: Option<IncludeConstant>,
    pub eval_state: Option<EvalState>,
    /// Skips assignments in anonymous evaluations.
    pub exclude_anonymous: bool,
}

/// Inserts a group assignment and returns its id.
pub fn insert_group(
    db: &Database,
    group: &AssignGroup,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO assign_groups (eval_id, group_id, group_title, instructor_approval,
             instructors_view_results, students_view_results, published, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                group.eval_id,
                group.group_id,
                group.group_title,
                group.instructor_approval,
                group.instructors_view_results,
                group.students_view_results,
                group.published,
                group.status.as_str(),
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Inserts a user assignment and returns its id.
pub fn insert_user(
    db: &Database,
    user: &AssignUser,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO assign_users (eval_id, user_id, group_id, assign_type, status,
             list_order, available_email_sent, reminder_email_sent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.eval_id,
                user.user_id,
                user.group_id,
                user.assign_type.as_str(),
                user.status.as_str(),
                user.list_order,
                user.available_email_sent,
                user.reminder_email_sent,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Flips a group assignment's status. Rows are never physically deleted.
pub fn set_group_status(
    db: &Database,
    eval_id: i64,
    group_id: &str,
    status: AssignStatus,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE assign_groups SET status = ?3 WHERE eval_id = ?1 AND group_id = ?2",
            params![eval_id, group_id, status.as_str()],
        )?;
        Ok(changed == 1)
    })
}

/// Records an instructor's approval decision for an opt-in/opt-out group.
pub fn set_group_approval(
    db: &Database,
    eval_id: i64,
    group_id: &str,
    approved: bool,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE assign_groups SET instructor_approval = ?3 WHERE eval_id = ?1 AND group_id = ?2",
            params![eval_id, group_id, approved],
        )?;
        Ok(changed == 1)
    })
}

/// Flips the status of every assignment a user holds in an evaluation.
pub fn set_user_status(
    db: &Database,
    eval_id: i64,
    user_id: &str,
    status: AssignStatus,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE assign_users SET status = ?3 WHERE eval_id = ?1 AND user_id = ?2",
            params![eval_id, user_id, status.as_str()],
        )?;
        Ok(changed as u64)
    })
}

/// Lists the non-removed groups of an evaluation in stable id order.
pub fn list_groups_for_eval(
    db: &Database,
    eval_id: i64,
    approved_only: bool,
) -> Result<Vec<AssignGroup>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM assign_groups
             WHERE eval_id = ?1 AND status != 'removed'
               AND (?2 = 0 OR instructor_approval = 1)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![eval_id, approved_only], group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Builds the WHERE clause shared by [`query_users`] and [`count_users`].
fn build_conditions(filter: &AssignUserFilter) -> Option<(String, Vec<Box<dyn ToSql>>)> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(eval_id) = filter.eval_id {
        param_values.push(Box::new(eval_id));
        conditions.push(format!("au.eval_id = ?{}", param_values.len()));
    }
    if let Some(ref user_id) = filter.user_id {
        param_values.push(Box::new(user_id.clone()));
        conditions.push(format!("au.user_id = ?{}", param_values.len()));
    }
    if let Some(ref group_ids) = filter.group_ids {
        if group_ids.is_empty() {
            return None;
        }
        let mut placeholders = Vec::with_capacity(group_ids.len());
        for group_id in group_ids {
            param_values.push(Box::new(group_id.clone()));
            placeholders.push(format!("?{}", param_values.len()));
        }
        conditions.push(format!("au.group_id IN ({})", placeholders.join(", ")));
    }
    if let Some(assign_type) = filter.assign_type {
        param_values.push(Box::new(assign_type.as_str()));
        conditions.push(format!("au.assign_type = ?{}", param_values.len()));
    }
    if let Some(ref statuses) = filter.statuses {
        if statuses.is_empty() {
            return None;
        }
        let mut placeholders = Vec::with_capacity(statuses.len());
        for status in statuses {
            param_values.push(Box::new(status.as_str()));
            placeholders.push(format!("?{}", param_values.len()));
        }
        conditions.push(format!("au.status IN ({})", placeholders.join(", ")));
    }
    if let Some(state) = filter.eval_state {
        param_values.push(Box::new(state.as_str()));
        conditions.push(format!("e.state = ?{}", param_values.len()));
    }

    let completed = "SELECT 1 FROM responses r WHERE r.eval_id = au.eval_id \
                     AND r.user_id = au.user_id AND r.group_id = au.group_id";
    match filter.include {
        Some(IncludeConstant::NonTakers) => {
            conditions.push(format!("NOT EXISTS ({} AND r.end_time IS NOT NULL)", completed))
        }
        Some(IncludeConstant::Responders) => {
            conditions.push(format!("EXISTS ({} AND r.end_time IS NOT NULL)", completed))
        }
        Some(IncludeConstant::InProgress) => {
            conditions.push(format!("EXISTS ({} AND r.end_time IS NULL)", completed))
        }
        Some(IncludeConstant::All) | None => {}
    }

    if filter.exclude_anonymous {
        conditions.push("e.anonymous = 0".to_string());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    Some((where_clause, param_values))
}

/// Queries user assignments, ordered by evaluation, group, list order and user.
pub fn query_users(
    db: &Database,
    filter: &AssignUserFilter,
) -> Result<Vec<AssignUser>, DatabaseError> {
    let Some((where_clause, param_values)) = build_conditions(filter) else {
        return Ok(Vec::new());
    };
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT au.* FROM assign_users au JOIN evaluations e ON e.id = au.eval_id {}
             ORDER BY au.eval_id, au.group_id, au.list_order, au.user_id, au.id",
            where_clause
        );
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts user assignments matching the filter without loading them.
pub fn count_users(db: &Database, filter: &AssignUserFilter) -> Result<u64, DatabaseError> {
    let Some((where_clause, param_values)) = build_conditions(filter) else {
        return Ok(0);
    };
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT COUNT(*) FROM assign_users au JOIN evaluations e ON e.id = au.eval_id {}",
            where_clause
        );
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&sql, params_ref.as_slice(), |r| r.get(0))?;
        Ok(total)
    })
}

/// Which notification timestamp to stamp on an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentColumn {
    Available,
    Reminder,
}

/// Stamps the available/reminder sent time on a user's evaluator assignments.
pub fn mark_email_sent(
    db: &Database,
    column: SentColumn,
    user_id: &str,
    eval_ids: &[i64],
    at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    if eval_ids.is_empty() {
        return Ok(0);
    }
    db.with_conn(|conn| stamp_sent(conn, column, user_id, eval_ids, at))
}

/// Connection-level form of [`mark_email_sent`], for callers that already
/// hold a transaction.
pub(crate) fn stamp_sent(
    conn: &Connection,
    column: SentColumn,
    user_id: &str,
    eval_ids: &[i64],
    at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    if eval_ids.is_empty() {
        return Ok(0);
    }
    let column_name = match column {
        SentColumn::Available => "available_email_sent",
        SentColumn::Reminder => "reminder_email_sent",
    };
    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(at), Box::new(user_id.to_string())];
    let mut placeholders = Vec::with_capacity(eval_ids.len());
    for id in eval_ids {
        param_values.push(Box::new(*id));
        placeholders.push(format!("?{}", param_values.len()));
    }
    let sql = format!(
        "UPDATE assign_users SET {} = ?1
         WHERE user_id = ?2 AND assign_type = 'evaluator' AND eval_id IN ({})",
        column_name,
        placeholders.join(", ")
    );
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let changed = conn.execute(&sql, params_ref.as_slice())?;
    Ok(changed as u64)
}
