//! The evaluation aggregate and its lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

/// Lifecycle state of an evaluation.
///
/// `Partial` and `Deleted` are sticky: they are only ever set explicitly and
/// never recomputed from dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalState {
    Partial,
    InQueue,
    Active,
    GracePeriod,
    Closed,
    Viewable,
    Deleted,
}

impl EvalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalState::Partial => "partial",
            EvalState::InQueue => "inqueue",
            EvalState::Active => "active",
            EvalState::GracePeriod => "graceperiod",
            EvalState::Closed => "closed",
            EvalState::Viewable => "viewable",
            EvalState::Deleted => "deleted",
        }
    }

    /// States that are never derived from dates.
    pub fn is_sticky(&self) -> bool {
        matches!(self, EvalState::Partial | EvalState::Deleted)
    }

    /// States in which evaluators may still submit responses.
    pub fn is_open(&self) -> bool {
        matches!(self, EvalState::Active | EvalState::GracePeriod)
    }
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvalState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(EvalState::Partial),
            "inqueue" => Ok(EvalState::InQueue),
            "active" => Ok(EvalState::Active),
            "graceperiod" => Ok(EvalState::GracePeriod),
            "closed" => Ok(EvalState::Closed),
            "viewable" => Ok(EvalState::Viewable),
            "deleted" => Ok(EvalState::Deleted),
            other => Err(UnknownVariant::new("evaluation state", other)),
        }
    }
}

/// Whether instructors must take part, may opt in, or may opt out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructorOpt {
    Required,
    OptIn,
    OptOut,
}

impl InstructorOpt {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructorOpt::Required => "required",
            InstructorOpt::OptIn => "opt_in",
            InstructorOpt::OptOut => "opt_out",
        }
    }
}

impl FromStr for InstructorOpt {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(InstructorOpt::Required),
            "opt_in" => Ok(InstructorOpt::OptIn),
            "opt_out" => Ok(InstructorOpt::OptOut),
            other => Err(UnknownVariant::new("instructor opt", other)),
        }
    }
}

/// Who may see aggregated results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsSharing {
    Public,
    Visible,
    Private,
}

impl ResultsSharing {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultsSharing::Public => "public",
            ResultsSharing::Visible => "visible",
            ResultsSharing::Private => "private",
        }
    }
}

impl FromStr for ResultsSharing {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(ResultsSharing::Public),
            "visible" => Ok(ResultsSharing::Visible),
            "private" => Ok(ResultsSharing::Private),
            other => Err(UnknownVariant::new("results sharing", other)),
        }
    }
}

/// A configured survey instance with a lifecycle driven by its dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `None` until the evaluation has been saved.
    pub id: Option<i64>,
    pub owner: String,
    pub title: String,
    pub state: EvalState,
    pub start_date: DateTime<Utc>,
    /// `None` means the evaluation never closes on its own.
    pub due_date: Option<DateTime<Utc>>,
    /// End of the grace window; only meaningful after `due_date`.
    pub stop_date: Option<DateTime<Utc>>,
    pub view_date: Option<DateTime<Utc>>,
    pub student_view_results: bool,
    pub instructor_view_results: bool,
    pub student_view_date: Option<DateTime<Utc>>,
    pub instructor_view_date: Option<DateTime<Utc>>,
    pub instructor_opt: InstructorOpt,
    /// Number of items instructors may add to the template.
    pub instructor_adds_items: u32,
    pub allow_edit_responses: bool,
    /// Days between reminder runs; 0 disables reminders.
    pub reminder_days: u32,
    pub reminder_from_email: Option<String>,
    pub locked: bool,
    pub results_sharing: ResultsSharing,
    pub anonymous: bool,
    pub next_reminder_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// Creates an unsaved evaluation in the `partial` state.
    pub fn new(owner: &str, title: &str, start_date: DateTime<Utc>) -> Self {
        Self {
            id: None,
            owner: owner.to_string(),
            title: title.to_string(),
            state: EvalState::Partial,
            start_date,
            due_date: None,
            stop_date: None,
            view_date: None,
            student_view_results: false,
            instructor_view_results: true,
            student_view_date: None,
            instructor_view_date: None,
            instructor_opt: InstructorOpt::Required,
            instructor_adds_items: 0,
            allow_edit_responses: false,
            reminder_days: 0,
            reminder_from_email: None,
            locked: false,
            results_sharing: ResultsSharing::Visible,
            anonymous: false,
            next_reminder_at: None,
        }
    }

    /// The instant responses stop being accepted: stop date if set, otherwise due date.
    pub fn closing_date(&self) -> Option<DateTime<Utc>> {
        match (self.stop_date, self.due_date) {
            (Some(stop), Some(due)) if stop > due => Some(stop),
            (_, due) => due,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}
