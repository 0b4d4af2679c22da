//! Per-evaluation notification runs.
//!
//! Every family (created, available, reminder, results) walks the
//! evaluation's groups in id order, resolves recipients, composes one
//! message per group and hands it to the transport. A group that fails is
//! logged and skipped; the run carries on with the next group.
//!
//! Reminder runs are checkpointed: after each group the position is written
//! to `job_checkpoints`, and a later run for the same evaluation resumes
//! after the last recorded group. The checkpoint is removed once the loop
//! finishes.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{SettingKey, Settings};
use crate::db::assignment_repo::{self, SentColumn};
use crate::db::checkpoint_repo::{self, ReminderStatus};
use crate::db::{evaluation_repo, event_repo, Database};
use crate::error::{EvalError, Result};
use crate::model::{AssignGroup, AssignType, EmailTemplate, Evaluation, IncludeConstant, TemplateType};
use crate::notify::composer::NotificationComposer;
use crate::notify::templates::find_template;
use crate::notify::transport::{DeliveryOption, EmailTransport};
use crate::participants::{distinct_user_ids, get_participants_for_eval, ParticipantQuery};

/// Checkpoint job type for reminder runs.
pub const REMINDER_JOB: &str = "reminder";

/// What one family of notifications sends to whom.
struct GroupRun {
    event: &'static str,
    template: EmailTemplate,
    include: Option<IncludeConstant>,
    audience: fn(&Evaluation, &AssignGroup) -> Vec<AssignType>,
    stamp: Option<SentColumn>,
    checkpoint: bool,
}

/// Totals of one run, for the audit record and the operations summary.
#[derive(Debug, Default)]
struct RunTally {
    addresses: Vec<String>,
    groups_sent: u32,
    groups_failed: u32,
    sample_body: Option<String>,
}

fn evaluators(_: &Evaluation, _: &AssignGroup) -> Vec<AssignType> {
    vec![AssignType::Evaluator]
}

fn evaluatees(_: &Evaluation, _: &AssignGroup) -> Vec<AssignType> {
    vec![AssignType::Evaluatee]
}

fn results_audience(eval: &Evaluation, group: &AssignGroup) -> Vec<AssignType> {
    let mut types = Vec::new();
    if eval.student_view_results || group.students_view_results {
        types.push(AssignType::Evaluator);
    }
    if eval.instructor_view_results || group.instructors_view_results {
        types.push(AssignType::Evaluatee);
    }
    types
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    db: Database,
    settings: Settings,
    clock: Arc<dyn Clock>,
    composer: NotificationComposer,
    transport: Arc<dyn EmailTransport>,
}

impl NotificationDispatcher {
    pub fn new(
        db: Database,
        settings: Settings,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        let composer = NotificationComposer::new(settings.clone());
        Self {
            db,
            settings,
            clock,
            composer,
            transport,
        }
    }

    fn load_dispatchable(&self, eval_id: i64) -> Result<Evaluation> {
        let eval = evaluation_repo::find_by_id(&self.db, eval_id)?
            .ok_or_else(|| EvalError::not_found("evaluation", eval_id))?;
        if eval.state.is_sticky() {
            return Err(EvalError::InvalidState(format!(
                "evaluation {} is {}; no notifications are sent",
                eval_id, eval.state
            )));
        }
        Ok(eval)
    }

    fn delivery(&self) -> Result<DeliveryOption> {
        let raw = self
            .settings
            .get_text(SettingKey::EmailDeliveryOption)?
            .unwrap_or_default();
        Ok(raw.parse::<DeliveryOption>().unwrap_or_else(|_| {
            log::warn!("Unknown delivery option '{}', sending", raw);
            DeliveryOption::Send
        }))
    }

    fn from_address(&self, eval: &Evaluation) -> Result<String> {
        match eval.reminder_from_email.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(from) => Ok(from.to_string()),
            None => Ok(self.settings.get_text(SettingKey::FromEmail)?.unwrap_or_default()),
        }
    }

    /// Sends reminders for one evaluation and returns the addresses emailed.
    pub fn send_eval_reminder_notifications(
        &self,
        eval_id: i64,
        include: IncludeConstant,
    ) -> Result<Vec<String>> {
        let eval = self.load_dispatchable(eval_id)?;
        let run = GroupRun {
            event: "eval.reminder_sent",
            template: find_template(&self.db, TemplateType::Reminder, Some(eval_id))?,
            include: Some(include),
            audience: evaluators,
            stamp: Some(SentColumn::Reminder),
            checkpoint: self.settings.get_bool(SettingKey::EnableReminderStatus)?,
        };
        let groups = assignment_repo::list_groups_for_eval(&self.db, eval_id, true)?;
        self.run_groups(&eval, &groups, run)
    }

    /// Tells evaluators of approved groups that the evaluation is open.
    pub fn send_eval_available_notifications(&self, eval_id: i64) -> Result<Vec<String>> {
        let eval = self.load_dispatchable(eval_id)?;
        let run = GroupRun {
            event: "eval.available_sent",
            template: find_template(&self.db, TemplateType::Available, Some(eval_id))?,
            include: None,
            audience: evaluators,
            stamp: Some(SentColumn::Available),
            checkpoint: false,
        };
        let groups = assignment_repo::list_groups_for_eval(&self.db, eval_id, true)?;
        self.run_groups(&eval, &groups, run)
    }

    /// Tells the evaluatees of every assigned group about a new evaluation.
    pub fn send_eval_created_notifications(&self, eval_id: i64) -> Result<Vec<String>> {
        let eval = self.load_dispatchable(eval_id)?;
        let run = GroupRun {
            event: "eval.created_sent",
            template: find_template(&self.db, TemplateType::Created, Some(eval_id))?,
            include: None,
            audience: evaluatees,
            stamp: None,
            checkpoint: false,
        };
        let groups = assignment_repo::list_groups_for_eval(&self.db, eval_id, false)?;
        self.run_groups(&eval, &groups, run)
    }

    /// Announces viewable results to whoever may see them.
    pub fn send_eval_results_notifications(&self, eval_id: i64) -> Result<Vec<String>> {
        let eval = self.load_dispatchable(eval_id)?;
        let run = GroupRun {
            event: "eval.results_sent",
            template: find_template(&self.db, TemplateType::Results, Some(eval_id))?,
            include: None,
            audience: results_audience,
            stamp: None,
            checkpoint: false,
        };
        let groups = assignment_repo::list_groups_for_eval(&self.db, eval_id, true)?;
        self.run_groups(&eval, &groups, run)
    }

    /// Confirms a submitted response to the user who submitted it.
    pub fn send_eval_submission_confirmation(&self, user_id: &str, eval_id: i64) -> Result<Vec<String>> {
        let eval = self.load_dispatchable(eval_id)?;
        let mut query = ParticipantQuery::for_eval(eval_id).assign_type(AssignType::Evaluator);
        query.user_id = Some(user_id.to_string());
        let assignment = get_participants_for_eval(&self.db, &query)?
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::not_found("evaluator assignment", format!("{}/{}", eval_id, user_id)))?;

        let group = assignment_repo::list_groups_for_eval(&self.db, eval_id, false)?
            .into_iter()
            .find(|g| g.group_id == assignment.group_id);
        let template = find_template(&self.db, TemplateType::Submitted, Some(eval_id))?;
        let message = self.composer.make_email_message(
            &template.message,
            &template.subject,
            &eval,
            group.as_ref(),
            None,
        )?;
        let sent = self.transport.send_emails_to_users(
            &self.from_address(&eval)?,
            &[user_id.to_string()],
            &message.subject,
            &message.message,
            self.delivery()?,
        )?;
        event_repo::record(
            &self.db,
            "eval.submission_confirmed",
            Some(eval_id),
            user_id,
            self.clock.now(),
        )?;
        Ok(sent)
    }

    /// Index of the first group still to process, from the checkpoint.
    fn resume_index(&self, eval_id: i64, groups: &[AssignGroup]) -> Result<usize> {
        let Some(status) = checkpoint_repo::find(&self.db, REMINDER_JOB, eval_id)? else {
            return Ok(0);
        };
        match groups.iter().position(|g| g.group_id == status.current_group_id) {
            Some(pos) => {
                log::info!(
                    "Resuming reminders for evaluation {} after group {} ({}/{})",
                    eval_id,
                    status.current_group_id,
                    status.processed_count,
                    status.total_groups
                );
                Ok(pos + 1)
            }
            None => {
                log::warn!(
                    "Checkpoint group {} no longer assigned to evaluation {}; processing all groups",
                    status.current_group_id,
                    eval_id
                );
                Ok(0)
            }
        }
    }

    fn run_groups(&self, eval: &Evaluation, groups: &[AssignGroup], run: GroupRun) -> Result<Vec<String>> {
        let started = Instant::now();
        let eval_id = eval.id.ok_or_else(|| EvalError::InvalidArgument("evaluation is not saved".into()))?;
        let span = tracing::info_span!("notify", job = run.event, eval_id);
        let _guard = span.enter();

        let from = self.from_address(eval)?;
        let delivery = self.delivery()?;
        let skip = if run.checkpoint {
            self.resume_index(eval_id, groups)?
        } else {
            0
        };
        let total = u32::try_from(groups.len()).unwrap_or(u32::MAX);

        let mut tally = RunTally::default();
        for (index, group) in groups.iter().enumerate().skip(skip) {
            if group.published {
                match self.send_group(eval, group, &run, &from, delivery) {
                    Ok((sent, body)) => {
                        if !sent.is_empty() {
                            tally.groups_sent += 1;
                            tally.sample_body.get_or_insert(body);
                        }
                        tally.addresses.extend(sent);
                    }
                    Err(e) => {
                        tally.groups_failed += 1;
                        log::error!("Group {} of evaluation {} failed: {}", group.group_id, eval_id, e);
                    }
                }
            }

            if run.checkpoint {
                let status = ReminderStatus {
                    total_groups: total,
                    processed_count: u32::try_from(index + 1).unwrap_or(u32::MAX),
                    current_group_id: group.group_id.clone(),
                };
                checkpoint_repo::save(&self.db, REMINDER_JOB, eval_id, &status, self.clock.now())?;
            }
        }

        if run.checkpoint {
            checkpoint_repo::clear(&self.db, REMINDER_JOB, eval_id)?;
        }

        let detail = format!(
            "{} email(s) to {} group(s), {} group(s) failed",
            tally.addresses.len(),
            tally.groups_sent,
            tally.groups_failed
        );
        event_repo::record(&self.db, run.event, Some(eval_id), &detail, self.clock.now())?;
        log::info!("Evaluation {} {}: {}", eval_id, run.event, detail);

        self.send_job_completion_email(run.event, &tally, started);
        Ok(tally.addresses)
    }

    fn send_group(
        &self,
        eval: &Evaluation,
        group: &AssignGroup,
        run: &GroupRun,
        from: &str,
        delivery: DeliveryOption,
    ) -> Result<(Vec<String>, String)> {
        let mut user_ids = Vec::new();
        for assign_type in (run.audience)(eval, group) {
            let mut query = ParticipantQuery::for_eval(eval.id.unwrap_or_default())
                .groups(vec![group.group_id.clone()])
                .assign_type(assign_type);
            query.include = run.include;
            let rows = get_participants_for_eval(&self.db, &query)?;
            for user in distinct_user_ids(&rows) {
                if !user_ids.contains(&user) {
                    user_ids.push(user);
                }
            }
        }
        if user_ids.is_empty() {
            log::debug!("No recipients in group {}", group.group_id);
            return Ok((Vec::new(), String::new()));
        }

        let message = self.composer.make_email_message(
            &run.template.message,
            &run.template.subject,
            eval,
            Some(group),
            run.include,
        )?;
        let sent = self.transport.send_emails_to_users(
            from,
            &user_ids,
            &message.subject,
            &message.message,
            delivery,
        )?;

        if let (Some(column), Some(eval_id)) = (run.stamp, eval.id) {
            let now = self.clock.now();
            for user in &user_ids {
                assignment_repo::mark_email_sent(&self.db, column, user, &[eval_id], now)?;
            }
        }
        Ok((sent, message.message))
    }

    /// Mails the operations address a summary of a finished run. Failures
    /// are logged and never returned.
    fn send_job_completion_email(&self, job: &str, tally: &RunTally, started: Instant) {
        let outcome = (|| -> Result<()> {
            let Some(to) = self.settings.get_text(SettingKey::JobCompletionEmail)? else {
                return Ok(());
            };
            let from = self.settings.get_text(SettingKey::FromEmail)?.unwrap_or_default();
            let subject = format!("Job {} completed: {} email(s) sent", job, tally.addresses.len());
            let body = completion_body(job, tally, started, self.clock.now());
            self.transport
                .send_emails_to_addresses(&from, &[to], &subject, &body, self.delivery()?)?;
            Ok(())
        })();
        if let Err(e) = outcome {
            log::warn!("Could not send job completion email for {}: {}", job, e);
        }
    }
}

fn completion_body(job: &str, tally: &RunTally, started: Instant, finished: DateTime<Utc>) -> String {
    format!(
        "Job: {}\nFinished: {}\nElapsed: {} ms\nEmails sent: {}\nGroups sent: {}\nGroups failed: {}\n\nSample message:\n{}",
        job,
        finished.to_rfc3339(),
        started.elapsed().as_millis(),
        tally.addresses.len(),
        tally.groups_sent,
        tally.groups_failed,
        tally.sample_body.as_deref().unwrap_or("(none)")
    )
}
