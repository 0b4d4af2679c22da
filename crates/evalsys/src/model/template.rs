//! Email templates: system defaults and per-evaluation overrides.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UnknownVariant;

/// The notification a template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Created,
    Available,
    Reminder,
    Results,
    Submitted,
    ConsolidatedAvailable,
    ConsolidatedReminder,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Created => "created",
            TemplateType::Available => "available",
            TemplateType::Reminder => "reminder",
            TemplateType::Results => "results",
            TemplateType::Submitted => "submitted",
            TemplateType::ConsolidatedAvailable => "consolidated_available",
            TemplateType::ConsolidatedReminder => "consolidated_reminder",
        }
    }
}

impl FromStr for TemplateType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TemplateType::Created),
            "available" => Ok(TemplateType::Available),
            "reminder" => Ok(TemplateType::Reminder),
            "results" => Ok(TemplateType::Results),
            "submitted" => Ok(TemplateType::Submitted),
            "consolidated_available" => Ok(TemplateType::ConsolidatedAvailable),
            "consolidated_reminder" => Ok(TemplateType::ConsolidatedReminder),
            other => Err(UnknownVariant::new("template type", other)),
        }
    }
}

/// A subject and body with `${Token}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Option<i64>,
    pub template_type: TemplateType,
    /// `None` for the system default of this type.
    pub eval_id: Option<i64>,
    pub subject: String,
    pub message: String,
    pub default_template: bool,
}

impl EmailTemplate {
    /// Creates an unsaved evaluation-specific override.
    pub fn for_eval(template_type: TemplateType, eval_id: i64, subject: &str, message: &str) -> Self {
        Self {
            id: None,
            template_type,
            eval_id: Some(eval_id),
            subject: subject.to_string(),
            message: message.to_string(),
            default_template: false,
        }
    }
}
