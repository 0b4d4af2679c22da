//! Email template repository.

use rusqlite::{params, OptionalExtension, Row};

use super::{first_row, parse_column, Database, DatabaseError};
use crate::model::{EmailTemplate, TemplateType};

fn from_row(row: &Row<'_>) -> Result<EmailTemplate, rusqlite::Error> {
    Ok(EmailTemplate {
        id: Some(row.get("id")?),
        template_type: parse_column(row, "template_type")?,
        eval_id: row.get("eval_id")?,
        subject: row.get("subject")?,
        message: row.get("message")?,
        default_template: row.get("default_template")?,
    })
}

/// Finds the system default template of a type.
pub fn find_default(
    db: &Database,
    template_type: TemplateType,
) -> Result<Option<EmailTemplate>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM email_templates WHERE template_type = ?1 AND eval_id IS NULL",
        )?;
        let rows = stmt.query_map(params![template_type.as_str()], from_row)?;
        first_row(rows)
    })
}

/// Finds an evaluation's override of a template type.
pub fn find_for_eval(
    db: &Database,
    template_type: TemplateType,
    eval_id: i64,
) -> Result<Option<EmailTemplate>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM email_templates WHERE template_type = ?1 AND eval_id = ?2",
        )?;
        let rows = stmt.query_map(params![template_type.as_str(), eval_id], from_row)?;
        first_row(rows)
    })
}

/// Inserts or replaces an evaluation override and returns its id.
pub fn save_override(db: &Database, template: &EmailTemplate) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO email_templates (template_type, eval_id, subject, message, default_template)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT (template_type, eval_id) WHERE eval_id IS NOT NULL
             DO UPDATE SET subject = excluded.subject, message = excluded.message",
            params![
                template.template_type.as_str(),
                template.eval_id,
                template.subject,
                template.message,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM email_templates WHERE template_type = ?1 AND eval_id = ?2",
            params![template.template_type.as_str(), template.eval_id],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

/// Deletes an evaluation override. Returns whether one existed.
pub fn delete_override(
    db: &Database,
    template_type: TemplateType,
    eval_id: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM email_templates WHERE template_type = ?1 AND eval_id = ?2",
                params![template_type.as_str(), eval_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = id {
            conn.execute("DELETE FROM email_templates WHERE id = ?1", params![id])?;
        }
        Ok(id.is_some())
    })
}
