//! Evaluation lifecycle: deriving the state from dates, persisting
//! transitions, and the administrative close/reopen/delete operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{SettingKey, Settings};
use crate::db::{evaluation_repo, event_repo, Database};
use crate::error::{EvalError, Result};
use crate::model::{EvalState, Evaluation};

/// Derives the state an evaluation should be in at `now`.
///
/// `partial` and `deleted` are returned unchanged. Boundary instants
/// belong to the later state. Without a due date an evaluation stays
/// active once started. Without a view date it stays closed.
pub fn compute_state(eval: &Evaluation, now: DateTime<Utc>) -> EvalState {
    if eval.state.is_sticky() {
        return eval.state;
    }
    if now < eval.start_date {
        return EvalState::InQueue;
    }
    let Some(due) = eval.due_date else {
        return EvalState::Active;
    };
    if now < due {
        return EvalState::Active;
    }
    if let Some(closing) = eval.closing_date() {
        if now < closing {
            return EvalState::GracePeriod;
        }
    }
    match eval.view_date {
        Some(view) if now >= view => EvalState::Viewable,
        _ => EvalState::Closed,
    }
}

/// Promotes open or closed states to `viewable` when view dates are ignored.
pub fn promote_viewable(state: EvalState, ignore_view_dates: bool) -> EvalState {
    match state {
        EvalState::Active | EvalState::GracePeriod | EvalState::Closed if ignore_view_dates => {
            EvalState::Viewable
        }
        other => other,
    }
}

/// A persisted state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub eval_id: i64,
    pub from: EvalState,
    pub to: EvalState,
}

#[derive(Clone)]
pub struct EvaluationService {
    db: Database,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl EvaluationService {
    pub fn new(db: Database, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            settings,
            clock,
        }
    }

    fn load(&self, eval_id: i64) -> Result<Evaluation> {
        evaluation_repo::find_by_id(&self.db, eval_id)?
            .ok_or_else(|| EvalError::not_found("evaluation", eval_id))
    }

    /// Recomputes and persists the state of one evaluation.
    pub fn update_evaluation_state(&self, eval_id: i64) -> Result<EvalState> {
        let mut eval = self.load(eval_id)?;
        self.return_and_fix_eval_state(&mut eval, true)
    }

    /// Recomputes the state of `eval` in place and, when `persist` is set
    /// and the evaluation has been saved before, stores a changed state.
    pub fn return_and_fix_eval_state(&self, eval: &mut Evaluation, persist: bool) -> Result<EvalState> {
        let now = self.clock.now();
        let computed = compute_state(eval, now);
        if computed == eval.state {
            return Ok(computed);
        }

        let previous = eval.state;
        eval.state = computed;
        if let (true, Some(id)) = (persist, eval.id) {
            evaluation_repo::update_state(&self.db, id, computed, now)?;
            event_repo::record(
                &self.db,
                "eval.state_changed",
                Some(id),
                &format!("{} -> {}", previous, computed),
                now,
            )?;
            log::info!("Evaluation {} moved from {} to {}", id, previous, computed);
        }
        Ok(computed)
    }

    /// Applies the global ignore-view-dates override to `state`.
    pub fn calculate_viewability(&self, state: EvalState) -> Result<EvalState> {
        let ignore = self.settings.get_bool(SettingKey::ViewResultsIgnoreDates)?;
        Ok(promote_viewable(state, ignore))
    }

    /// Recomputes every evaluation that is not partial or deleted and
    /// returns the transitions that were stored.
    pub fn refresh_all_states(&self) -> Result<Vec<StateTransition>> {
        let mut transitions = Vec::new();
        for mut eval in evaluation_repo::list_recomputable(&self.db)? {
            let from = eval.state;
            let to = self.return_and_fix_eval_state(&mut eval, true)?;
            if let (Some(eval_id), true) = (eval.id, from != to) {
                transitions.push(StateTransition { eval_id, from, to });
            }
        }
        log::debug!("State refresh stored {} transitions", transitions.len());
        Ok(transitions)
    }

    /// Ends an open evaluation now. A later stop date is dropped so no
    /// grace period follows.
    pub fn close_evaluation_early(&self, eval_id: i64) -> Result<Evaluation> {
        let mut eval = self.load(eval_id)?;
        let now = self.clock.now();
        if !compute_state(&eval, now).is_open() {
            return Err(EvalError::InvalidState(format!(
                "evaluation {} is {} and cannot be closed",
                eval_id, eval.state
            )));
        }

        eval.due_date = Some(now);
        if eval.stop_date.is_some_and(|stop| stop > now) {
            eval.stop_date = None;
        }
        self.save_with_state(eval, "eval.closed_early")
    }

    /// Moves the due date of a started evaluation into the future.
    pub fn reopen_evaluation(&self, eval_id: i64, new_due: DateTime<Utc>) -> Result<Evaluation> {
        let mut eval = self.load(eval_id)?;
        if eval.state.is_sticky() {
            return Err(EvalError::InvalidState(format!(
                "evaluation {} is {} and cannot be reopened",
                eval_id, eval.state
            )));
        }
        let now = self.clock.now();
        if new_due <= now {
            return Err(EvalError::InvalidArgument(format!(
                "new due date {} is not in the future",
                new_due
            )));
        }

        eval.due_date = Some(new_due);
        if eval.stop_date.is_some_and(|stop| stop < new_due) {
            eval.stop_date = None;
        }
        self.save_with_state(eval, "eval.reopened")
    }

    /// Marks an evaluation deleted. Assignments are kept.
    pub fn soft_delete_evaluation(&self, eval_id: i64) -> Result<()> {
        let eval = self.load(eval_id)?;
        if eval.state == EvalState::Deleted {
            return Ok(());
        }
        let now = self.clock.now();
        evaluation_repo::update_state(&self.db, eval_id, EvalState::Deleted, now)?;
        event_repo::record(
            &self.db,
            "eval.deleted",
            Some(eval_id),
            &format!("{} -> deleted", eval.state),
            now,
        )?;
        log::info!("Evaluation {} deleted", eval_id);
        Ok(())
    }

    fn save_with_state(&self, mut eval: Evaluation, event: &str) -> Result<Evaluation> {
        let now = self.clock.now();
        let previous = eval.state;
        eval.state = compute_state(&eval, now);
        evaluation_repo::update(&self.db, &eval, now)?;
        if let Some(id) = eval.id {
            event_repo::record(
                &self.db,
                event,
                Some(id),
                &format!("{} -> {}", previous, eval.state),
                now,
            )?;
        }
        Ok(eval)
    }
}
