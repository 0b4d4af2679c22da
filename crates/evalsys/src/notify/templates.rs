//! Template lookup and per-evaluation overrides.

use crate::db::{evaluation_repo, template_repo, Database};
use crate::error::{EvalError, Result};
use crate::model::{EmailTemplate, TemplateType};
use crate::notify::composer::validate_tokens;

/// Returns the evaluation's override of `template_type`, else the system
/// default. Fails with `ConfigurationMissing` when neither exists.
pub fn find_template(
    db: &Database,
    template_type: TemplateType,
    eval_id: Option<i64>,
) -> Result<EmailTemplate> {
    if let Some(id) = eval_id {
        if let Some(template) = template_repo::find_for_eval(db, template_type, id)? {
            return Ok(template);
        }
    }
    template_repo::find_default(db, template_type)?.ok_or_else(|| EvalError::ConfigurationMissing {
        template_type: template_type.as_str().to_string(),
        eval_id,
    })
}

fn unlocked_eval(db: &Database, eval_id: i64) -> Result<()> {
    let eval = evaluation_repo::find_by_id(db, eval_id)?
        .ok_or_else(|| EvalError::not_found("evaluation", eval_id))?;
    if eval.locked {
        return Err(EvalError::InvalidState(format!(
            "evaluation {} is locked; its templates cannot change",
            eval_id
        )));
    }
    Ok(())
}

/// Stores an evaluation-specific template. The evaluation must not be
/// locked and the text may only use known tokens.
pub fn save_template_override(db: &Database, template: &EmailTemplate) -> Result<i64> {
    let Some(eval_id) = template.eval_id else {
        return Err(EvalError::InvalidArgument(
            "system default templates cannot be modified".to_string(),
        ));
    };
    unlocked_eval(db, eval_id)?;
    validate_tokens(&template.subject)?;
    validate_tokens(&template.message)?;
    Ok(template_repo::save_override(db, template)?)
}

/// Drops an override so the system default applies again.
pub fn delete_template_override(
    db: &Database,
    template_type: TemplateType,
    eval_id: i64,
) -> Result<()> {
    unlocked_eval(db, eval_id)?;
    template_repo::delete_override(db, template_type, eval_id)?;
    Ok(())
}
