//! Resolves which assigned users take part in, or should hear about, an
//! evaluation.

use crate::db::assignment_repo::{self, AssignUserFilter};
use crate::db::{evaluation_repo, Database};
use crate::error::{EvalError, Result};
use crate::model::{AssignStatus, AssignType, AssignUser, EvalState, IncludeConstant};

/// Which assignment statuses to return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Everything except removed assignments.
    #[default]
    ActiveEquivalent,
    Only(Vec<AssignStatus>),
    /// Every status, removed included.
    Any,
}

impl StatusFilter {
    fn statuses(&self) -> Option<Vec<AssignStatus>> {
        match self {
            StatusFilter::ActiveEquivalent => Some(vec![AssignStatus::Active, AssignStatus::Unlinked]),
            StatusFilter::Only(statuses) => Some(statuses.clone()),
            StatusFilter::Any => None,
        }
    }
}

/// Filters for a participant lookup. At least one of `eval_id` and
/// `user_id` must be set.
#[derive(Debug, Clone, Default)]
pub struct ParticipantQuery {
    pub eval_id: Option<i64>,
    pub user_id: Option<String>,
    pub group_ids: Option<Vec<String>>,
    pub assign_type: Option<AssignType>,
    pub status: StatusFilter,
    pub include: Option<IncludeConstant>,
    pub eval_state: Option<EvalState>,
}

impl ParticipantQuery {
    pub fn for_eval(eval_id: i64) -> Self {
        Self {
            eval_id: Some(eval_id),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn groups(mut self, group_ids: Vec<String>) -> Self {
        self.group_ids = Some(group_ids);
        self
    }

    pub fn assign_type(mut self, assign_type: AssignType) -> Self {
        self.assign_type = Some(assign_type);
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn include(mut self, include: IncludeConstant) -> Self {
        self.include = Some(include);
        self
    }

    pub fn eval_state(mut self, state: EvalState) -> Self {
        self.eval_state = Some(state);
        self
    }

    fn to_filter(&self) -> Result<AssignUserFilter> {
        if self.eval_id.is_none() && self.user_id.is_none() {
            return Err(EvalError::InvalidArgument(
                "participant lookup needs an evaluation id or a user id".to_string(),
            ));
        }

        // Response-progress filters only apply to evaluators.
        let assign_type = match self.include {
            Some(_) => Some(AssignType::Evaluator),
            None => self.assign_type,
        };

        Ok(AssignUserFilter {
            eval_id: self.eval_id,
            user_id: self.user_id.clone(),
            group_ids: self.group_ids.clone(),
            assign_type,
            statuses: self.status.statuses(),
            include: self.include,
            eval_state: self.eval_state,
            exclude_anonymous: false,
        })
    }
}

pub fn get_participants_for_eval(db: &Database, query: &ParticipantQuery) -> Result<Vec<AssignUser>> {
    let filter = query.to_filter()?;
    Ok(assignment_repo::query_users(db, &filter)?)
}

/// Counts matching assignments. Anonymous evaluations always count 0,
/// including when the query spans a user's evaluations.
pub fn count_participants_for_eval(db: &Database, query: &ParticipantQuery) -> Result<u64> {
    let mut filter = query.to_filter()?;
    match query.eval_id {
        Some(eval_id) => {
            let eval = evaluation_repo::find_by_id(db, eval_id)?
                .ok_or_else(|| EvalError::not_found("evaluation", eval_id))?;
            if eval.anonymous {
                return Ok(0);
            }
        }
        None => filter.exclude_anonymous = true,
    }
    Ok(assignment_repo::count_users(db, &filter)?)
}

/// Distinct user ids of `assignments`, keeping first-seen order.
pub fn distinct_user_ids(assignments: &[AssignUser]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    assignments
        .iter()
        .filter(|a| seen.insert(a.user_id.as_str()))
        .map(|a| a.user_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_eval_or_user() {
        let db = Database::open_in_memory().unwrap();
        let err = get_participants_for_eval(&db, &ParticipantQuery::default()).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
        let err = count_participants_for_eval(&db, &ParticipantQuery::default()).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_include_forces_evaluator() {
        let query = ParticipantQuery::for_eval(1)
            .assign_type(AssignType::Evaluatee)
            .include(IncludeConstant::NonTakers);
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.assign_type, Some(AssignType::Evaluator));
    }

    #[test]
    fn test_status_filters() {
        assert_eq!(
            StatusFilter::ActiveEquivalent.statuses(),
            Some(vec![AssignStatus::Active, AssignStatus::Unlinked])
        );
        assert_eq!(StatusFilter::Any.statuses(), None);
    }

    #[test]
    fn test_distinct_user_ids_keeps_order() {
        let rows = vec![
            AssignUser::new(1, "b", "g1", AssignType::Evaluator),
            AssignUser::new(1, "a", "g1", AssignType::Evaluator),
            AssignUser::new(1, "b", "g2", AssignType::Evaluator),
        ];
        assert_eq!(distinct_user_ids(&rows), vec!["b".to_string(), "a".to_string()]);
    }
}
