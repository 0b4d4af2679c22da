//! Links between evaluations and the groups or users taking part in them.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

/// Role a user plays in an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignType {
    /// Takes the evaluation.
    Evaluator,
    /// Is being evaluated (typically the instructor).
    Evaluatee,
    Assistant,
}

impl AssignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignType::Evaluator => "evaluator",
            AssignType::Evaluatee => "evaluatee",
            AssignType::Assistant => "assistant",
        }
    }
}

impl FromStr for AssignType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluator" => Ok(AssignType::Evaluator),
            "evaluatee" => Ok(AssignType::Evaluatee),
            "assistant" => Ok(AssignType::Assistant),
            other => Err(UnknownVariant::new("assign type", other)),
        }
    }
}

/// Status of an assignment. Removed rows are kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignStatus {
    /// Synchronised from group membership.
    Active,
    /// Added by hand, not tied to group membership.
    Unlinked,
    Removed,
}

impl AssignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignStatus::Active => "active",
            AssignStatus::Unlinked => "unlinked",
            AssignStatus::Removed => "removed",
        }
    }

    pub fn is_active_equivalent(&self) -> bool {
        !matches!(self, AssignStatus::Removed)
    }
}

impl FromStr for AssignStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" | "linked" => Ok(AssignStatus::Active),
            "unlinked" => Ok(AssignStatus::Unlinked),
            "removed" => Ok(AssignStatus::Removed),
            other => Err(UnknownVariant::new("assign status", other)),
        }
    }
}

/// Narrows a recipient set by response progress. Only meaningful for evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeConstant {
    All,
    /// Users without a completed response.
    #[serde(alias = "nontakers")]
    NonTakers,
    /// Users with a completed response.
    Responders,
    /// Users who started but have not completed a response.
    InProgress,
}

impl IncludeConstant {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncludeConstant::All => "all",
            IncludeConstant::NonTakers => "non_takers",
            IncludeConstant::Responders => "responders",
            IncludeConstant::InProgress => "in_progress",
        }
    }
}

impl FromStr for IncludeConstant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(IncludeConstant::All),
            "non_takers" | "nontakers" => Ok(IncludeConstant::NonTakers),
            "responders" => Ok(IncludeConstant::Responders),
            "in_progress" => Ok(IncludeConstant::InProgress),
            other => Err(UnknownVariant::new("include constant", other)),
        }
    }
}

/// An evaluation assigned to a group (course section, site, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignGroup {
    pub id: Option<i64>,
    pub eval_id: i64,
    pub group_id: String,
    /// Empty for ad hoc groups.
    pub group_title: String,
    /// False while an opt-in instructor has not approved the evaluation.
    pub instructor_approval: bool,
    pub instructors_view_results: bool,
    pub students_view_results: bool,
    pub published: bool,
    pub status: AssignStatus,
}

impl AssignGroup {
    pub fn new(eval_id: i64, group_id: &str, group_title: &str) -> Self {
        Self {
            id: None,
            eval_id,
            group_id: group_id.to_string(),
            group_title: group_title.to_string(),
            instructor_approval: true,
            instructors_view_results: true,
            students_view_results: false,
            published: true,
            status: AssignStatus::Active,
        }
    }
}

/// A single user's assignment within an evaluation group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignUser {
    pub id: Option<i64>,
    pub eval_id: i64,
    pub user_id: String,
    pub group_id: String,
    pub assign_type: AssignType,
    pub status: AssignStatus,
    pub list_order: i64,
    pub available_email_sent: Option<DateTime<Utc>>,
    pub reminder_email_sent: Option<DateTime<Utc>>,
}

impl AssignUser {
    pub fn new(eval_id: i64, user_id: &str, group_id: &str, assign_type: AssignType) -> Self {
        Self {
            id: None,
            eval_id,
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            assign_type,
            status: AssignStatus::Active,
            list_order: 0,
            available_email_sent: None,
            reminder_email_sent: None,
        }
    }
}

/// Directory entry used to resolve user ids into deliverable addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub locale: Option<String>,
}
