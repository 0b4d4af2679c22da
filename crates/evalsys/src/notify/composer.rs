//! Fills `${Token}` placeholders in subject and message templates.
//!
//! Substitution is a single literal pass: known tokens are replaced by their
//! value, unknown tokens are left as written. Templates branch only on the
//! presence of the `Show*` and `InProgress` flags, which always carry the
//! string `"true"` or `"false"`.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Locale, Utc};
use regex::Regex;

use crate::config::{SettingKey, Settings};
use crate::error::{EvalError, Result};
use crate::model::{AssignGroup, Evaluation, IncludeConstant, InstructorOpt};

static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z][A-Za-z0-9]*)\}").unwrap());

/// Rendered in place of the due date of an evaluation without one.
pub const NO_DUE_DATE_TEXT: &str = "(no due date)";
/// Rendered in place of the results date when none is scheduled.
pub const NO_RESULTS_DATE_TEXT: &str = "(when results are released)";

/// Every token a template may use.
pub const KNOWN_TOKENS: &[&str] = &[
    "EvalTitle",
    "EvalGroupTitle",
    "EvalStartDate",
    "EvalDueDate",
    "EvalResultsDate",
    "ShowOptInText",
    "ShowOptOutText",
    "ShowAddItemsText",
    "ShowAllowEditResponsesText",
    "InProgress",
    "URLtoTakeEval",
    "URLtoAddItems",
    "URLtoOptIn",
    "URLtoOptOut",
    "URLtoViewResults",
    "URLtoSystem",
    "HelpdeskEmail",
    "FromEmail",
    "EvalCount",
    "EarliestDueDate",
];

/// A composed email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub message: String,
}

/// Replaces every known `${Token}` in `template` with its value.
pub fn render(template: &str, replacements: &HashMap<&'static str, String>) -> String {
    RE_TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match replacements.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Fails with `InvalidArgument` if `text` uses a token that is never filled.
pub fn validate_tokens(text: &str) -> Result<()> {
    let unknown: Vec<&str> = RE_TOKEN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| !KNOWN_TOKENS.contains(name))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(EvalError::InvalidArgument(format!(
            "unknown template token(s): {}",
            unknown.join(", ")
        )))
    }
}

fn flag(value: bool) -> String {
    let text = if value { "true" } else { "false" };
    text.to_string()
}

/// Formats a date for `locale` (e.g. `en_US`, `de_DE`), with the time of
/// day when `with_time` is set. Unknown locales fall back to `en_US`.
pub fn format_date(date: DateTime<Utc>, with_time: bool, locale: &str) -> String {
    let locale = Locale::try_from(locale).unwrap_or(Locale::en_US);
    let pattern = if with_time { "%-d %B %Y %H:%M" } else { "%-d %B %Y" };
    date.format_localized(pattern, locale).to_string()
}

#[derive(Clone)]
pub struct NotificationComposer {
    settings: Settings,
}

impl NotificationComposer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn base_url(&self) -> Result<String> {
        let url = self.settings.get_text(SettingKey::ServerUrl)?.unwrap_or_default();
        Ok(url.trim_end_matches('/').to_string())
    }

    fn common_replacements(&self) -> Result<(HashMap<&'static str, String>, bool, String)> {
        let mut map = HashMap::new();
        let base = self.base_url()?;
        map.insert("URLtoSystem", base);
        map.insert(
            "HelpdeskEmail",
            self.settings.get_text(SettingKey::HelpdeskEmail)?.unwrap_or_default(),
        );
        map.insert(
            "FromEmail",
            self.settings.get_text(SettingKey::FromEmail)?.unwrap_or_default(),
        );
        let with_time = self.settings.get_bool(SettingKey::UseDateTime)?;
        let locale = self
            .settings
            .get_text(SettingKey::DefaultLocale)?
            .unwrap_or_else(|| "en_US".to_string());
        Ok((map, with_time, locale))
    }

    /// Builds the replacement map for one evaluation and (optionally) group.
    pub fn replacements(
        &self,
        eval: &Evaluation,
        group: Option<&AssignGroup>,
        include: Option<IncludeConstant>,
    ) -> Result<HashMap<&'static str, String>> {
        let (mut map, with_time, locale) = self.common_replacements()?;
        let date = |d: DateTime<Utc>| format_date(d, with_time, &locale);

        map.insert("EvalTitle", eval.title.clone());
        map.insert(
            "EvalGroupTitle",
            group.map(|g| g.group_title.clone()).unwrap_or_default(),
        );
        map.insert("EvalStartDate", date(eval.start_date));
        map.insert(
            "EvalDueDate",
            eval.due_date
                .map(date)
                .unwrap_or_else(|| NO_DUE_DATE_TEXT.to_string()),
        );
        map.insert(
            "EvalResultsDate",
            eval.view_date
                .map(date)
                .unwrap_or_else(|| NO_RESULTS_DATE_TEXT.to_string()),
        );

        map.insert("ShowOptInText", flag(eval.instructor_opt == InstructorOpt::OptIn));
        map.insert("ShowOptOutText", flag(eval.instructor_opt == InstructorOpt::OptOut));
        map.insert("ShowAddItemsText", flag(eval.instructor_adds_items > 0));
        map.insert("ShowAllowEditResponsesText", flag(eval.allow_edit_responses));
        map.insert("InProgress", flag(include == Some(IncludeConstant::InProgress)));

        // Every link targets the same entity; permissions decide what the user sees.
        let entity_url = match (eval.id, group) {
            (Some(id), Some(g)) => format!("{}/evaluation/{}/group/{}", map["URLtoSystem"], id, g.group_id),
            (Some(id), None) => format!("{}/evaluation/{}", map["URLtoSystem"], id),
            (None, _) => map["URLtoSystem"].clone(),
        };
        for key in [
            "URLtoTakeEval",
            "URLtoAddItems",
            "URLtoOptIn",
            "URLtoOptOut",
            "URLtoViewResults",
        ] {
            map.insert(key, entity_url.clone());
        }

        Ok(map)
    }

    /// Composes the subject and body for an evaluation notification.
    pub fn make_email_message(
        &self,
        message_template: &str,
        subject_template: &str,
        eval: &Evaluation,
        group: Option<&AssignGroup>,
        include: Option<IncludeConstant>,
    ) -> Result<EmailMessage> {
        let map = self.replacements(eval, group, include)?;
        Ok(EmailMessage {
            subject: render(subject_template, &map),
            message: render(message_template, &map),
        })
    }

    /// Composes a digest covering `eval_count` evaluations.
    pub fn make_consolidated_message(
        &self,
        message_template: &str,
        subject_template: &str,
        eval_count: usize,
        earliest_due: Option<DateTime<Utc>>,
    ) -> Result<EmailMessage> {
        let (mut map, with_time, locale) = self.common_replacements()?;
        map.insert("EvalCount", eval_count.to_string());
        map.insert(
            "EarliestDueDate",
            earliest_due
                .map(|d| format_date(d, with_time, &locale))
                .unwrap_or_else(|| NO_DUE_DATE_TEXT.to_string()),
        );
        Ok(EmailMessage {
            subject: render(subject_template, &map),
            message: render(message_template, &map),
        })
    }
}
