//! Domain types shared by the lifecycle, resolver and notification layers.

pub mod assignment;
pub mod evaluation;
pub mod template;

pub use assignment::{AssignGroup, AssignStatus, AssignType, AssignUser, IncludeConstant, User};
pub use evaluation::{EvalState, Evaluation, InstructorOpt, ResultsSharing};
pub use template::{EmailTemplate, TemplateType};

/// Error returned when a stored or user-supplied name does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
