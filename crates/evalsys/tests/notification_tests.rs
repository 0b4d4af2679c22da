//! Per-evaluation notification runs, checkpoint resume and recipient
//! resolution.

mod common;

use chrono::Duration;

use common::{open_response, submit, EvalBuilder, GroupBuilder, RecordingTransport, TestHarness};
use evalsys::db::checkpoint_repo::{self, ReminderStatus};
use evalsys::db::{evaluation_repo, event_repo};
use evalsys::model::{AssignType, EmailTemplate, EvalState, IncludeConstant, TemplateType};
use evalsys::notify::composer::NO_DUE_DATE_TEXT;
use evalsys::notify::{save_template_override, REMINDER_JOB};
use evalsys::{
    count_participants_for_eval, get_participants_for_eval, EvalError, ParticipantQuery,
    SettingKey, SettingValue,
};

/// Evaluation with groups A, B and C holding one evaluator each.
fn three_groups(h: &TestHarness) -> i64 {
    let id = EvalBuilder::new(h.now()).due_in(Duration::days(3)).insert(&h.db);
    for (group, user) in [("A", "a1"), ("B", "b1"), ("C", "c1")] {
        GroupBuilder::new(id, group)
            .evaluators(&[user])
            .evaluatees(&[&format!("{}-prof", group)])
            .insert(&h.db, h.now());
    }
    id
}

#[test]
fn test_reminder_run_resumes_after_checkpoint_group() {
    let h = TestHarness::new();
    let id = three_groups(&h);
    checkpoint_repo::save(
        &h.db,
        REMINDER_JOB,
        id,
        &ReminderStatus {
            total_groups: 3,
            processed_count: 1,
            current_group_id: "A".to_string(),
        },
        h.now(),
    )
    .unwrap();
    let transport = RecordingTransport::new();

    let sent = h
        .dispatcher(transport.clone())
        .send_eval_reminder_notifications(id, IncludeConstant::NonTakers)
        .unwrap();

    assert_eq!(sent, vec!["b1@example.edu", "c1@example.edu"]);
    assert!(!transport.recipients().contains(&"a1@example.edu".to_string()));
    assert_eq!(checkpoint_repo::find(&h.db, REMINDER_JOB, id).unwrap(), None);
}

#[test]
fn test_stale_checkpoint_group_processes_everything() {
    let h = TestHarness::new();
    let id = three_groups(&h);
    checkpoint_repo::save(
        &h.db,
        REMINDER_JOB,
        id,
        &ReminderStatus {
            total_groups: 4,
            processed_count: 2,
            current_group_id: "Z".to_string(),
        },
        h.now(),
    )
    .unwrap();

    let sent = h
        .dispatcher(RecordingTransport::new())
        .send_eval_reminder_notifications(id, IncludeConstant::NonTakers)
        .unwrap();

    assert_eq!(sent.len(), 3);
}

#[test]
fn test_failing_group_does_not_stop_the_run() {
    let h = TestHarness::new();
    let id = three_groups(&h);
    let transport = RecordingTransport::new();
    transport.reject_user("b1");

    let sent = h
        .dispatcher(transport.clone())
        .send_eval_reminder_notifications(id, IncludeConstant::NonTakers)
        .unwrap();

    assert_eq!(sent, vec!["a1@example.edu", "c1@example.edu"]);
    let summary = event_repo::list_for_eval(&h.db, id)
        .unwrap()
        .into_iter()
        .find(|e| e.event_name == "eval.reminder_sent")
        .unwrap();
    assert!(summary.detail.contains("1 group(s) failed"), "{}", summary.detail);
}

#[test]
fn test_reminders_skip_responders_and_stamp_the_rest() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).due_in(Duration::days(3)).insert(&h.db);
    GroupBuilder::new(id, "A")
        .evaluators(&["done", "started", "idle"])
        .insert(&h.db, h.now());
    submit(&h.db, id, "done", "A", h.now());
    open_response(&h.db, id, "started", "A", h.now());

    let sent = h
        .dispatcher(RecordingTransport::new())
        .send_eval_reminder_notifications(id, IncludeConstant::NonTakers)
        .unwrap();
    assert_eq!(sent, vec!["started@example.edu", "idle@example.edu"]);

    let in_progress = get_participants_for_eval(
        &h.db,
        &ParticipantQuery::for_eval(id).include(IncludeConstant::InProgress),
    )
    .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].user_id, "started");
    assert!(in_progress[0].reminder_email_sent.is_some());
}

#[test]
fn test_missing_due_date_renders_placeholder() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    let transport = RecordingTransport::new();

    h.dispatcher(transport.clone())
        .send_eval_reminder_notifications(id, IncludeConstant::All)
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].subject.contains(NO_DUE_DATE_TEXT), "{}", calls[0].subject);
    assert!(calls[0].body.contains(NO_DUE_DATE_TEXT));
}

#[test]
fn test_evaluation_override_template_is_used() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).title("Physics 101").insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    save_template_override(
        &h.db,
        &EmailTemplate::for_eval(
            TemplateType::Available,
            id,
            "Open now: ${EvalTitle}",
            "Group ${EvalGroupTitle}",
        ),
    )
    .unwrap();
    let transport = RecordingTransport::new();

    h.dispatcher(transport.clone())
        .send_eval_available_notifications(id)
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].subject, "Open now: Physics 101");
    assert_eq!(calls[0].body, "Group Section A");
}

#[test]
fn test_unapproved_groups_get_no_available_notice() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    GroupBuilder::new(id, "B")
        .evaluators(&["s2"])
        .unapproved()
        .insert(&h.db, h.now());

    let sent = h
        .dispatcher(RecordingTransport::new())
        .send_eval_available_notifications(id)
        .unwrap();

    assert_eq!(sent, vec!["s1@example.edu"]);
}

#[test]
fn test_created_notice_goes_to_evaluatees_of_every_group() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).state(EvalState::InQueue).insert(&h.db);
    GroupBuilder::new(id, "A")
        .evaluators(&["s1"])
        .evaluatees(&["prof"])
        .unapproved()
        .insert(&h.db, h.now());

    let sent = h
        .dispatcher(RecordingTransport::new())
        .send_eval_created_notifications(id)
        .unwrap();

    assert_eq!(sent, vec!["prof@example.edu"]);
}

#[test]
fn test_partial_evaluation_is_not_notified() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).state(EvalState::Partial).insert(&h.db);

    let err = h
        .dispatcher(RecordingTransport::new())
        .send_eval_available_notifications(id)
        .unwrap_err();

    assert!(matches!(err, EvalError::InvalidState(_)));
}

#[test]
fn test_job_completion_email_summarises_run() {
    let h = TestHarness::new();
    let id = three_groups(&h);
    h.settings
        .set(
            SettingKey::JobCompletionEmail,
            Some(SettingValue::Text("ops@example.edu".into())),
        )
        .unwrap();
    let transport = RecordingTransport::new();

    h.dispatcher(transport.clone())
        .send_eval_reminder_notifications(id, IncludeConstant::All)
        .unwrap();

    let last = transport.calls().pop().unwrap();
    assert_eq!(last.to, vec!["ops@example.edu"]);
    assert!(last.body.contains("Emails sent: 3"), "{}", last.body);
}

#[test]
fn test_submission_confirmation_goes_to_submitter() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1", "s2"]).insert(&h.db, h.now());
    let transport = RecordingTransport::new();

    let sent = h
        .dispatcher(transport.clone())
        .send_eval_submission_confirmation("s2", id)
        .unwrap();

    assert_eq!(sent, vec!["s2@example.edu"]);
    assert!(transport.calls()[0].subject.contains("Submission received"));
}

#[test]
fn test_participant_counts() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now()).insert(&h.db);
    GroupBuilder::new(id, "A")
        .evaluators(&["s1", "s2"])
        .evaluatees(&["prof"])
        .insert(&h.db, h.now());
    submit(&h.db, id, "s1", "A", h.now());

    let all = ParticipantQuery::for_eval(id);
    assert_eq!(count_participants_for_eval(&h.db, &all).unwrap(), 3);

    // Response filters narrow to evaluators even when another type is asked for.
    let responders = ParticipantQuery::for_eval(id)
        .assign_type(AssignType::Evaluatee)
        .include(IncludeConstant::Responders);
    let rows = get_participants_for_eval(&h.db, &responders).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, "s1");

    let anon = EvalBuilder::new(h.now()).anonymous().insert(&h.db);
    GroupBuilder::new(anon, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    assert_eq!(
        count_participants_for_eval(&h.db, &ParticipantQuery::for_eval(anon)).unwrap(),
        0
    );
}

#[test]
fn test_user_wide_count_skips_anonymous_evaluations() {
    let h = TestHarness::new();
    let named = EvalBuilder::new(h.now()).insert(&h.db);
    let anon = EvalBuilder::new(h.now()).anonymous().insert(&h.db);
    for id in [named, anon] {
        GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    }

    let query = ParticipantQuery::for_user("s1");
    assert_eq!(count_participants_for_eval(&h.db, &query).unwrap(), 1);
    assert_eq!(get_participants_for_eval(&h.db, &query).unwrap().len(), 2);
}

#[test]
fn test_participant_query_needs_an_anchor() {
    let h = TestHarness::new();
    let mut query = ParticipantQuery::for_eval(1);
    query.eval_id = None;

    let err = get_participants_for_eval(&h.db, &query).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)));
    assert!(evaluation_repo::find_by_id(&h.db, 1).unwrap().is_none());
}

#[test]
fn test_missing_reminder_template_leaves_checkpoint_untouched() {
    let h = TestHarness::new();
    let id = three_groups(&h);
    let status = ReminderStatus {
        total_groups: 3,
        processed_count: 1,
        current_group_id: "A".to_string(),
    };
    checkpoint_repo::save(&h.db, REMINDER_JOB, id, &status, h.now()).unwrap();
    h.db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM email_templates WHERE template_type = ?1",
            [TemplateType::Reminder.as_str()],
        )?;
        Ok(())
    })
    .unwrap();
    let transport = RecordingTransport::new();

    let err = h
        .dispatcher(transport.clone())
        .send_eval_reminder_notifications(id, IncludeConstant::NonTakers)
        .unwrap_err();

    assert!(matches!(err, EvalError::ConfigurationMissing { .. }));
    assert_eq!(checkpoint_repo::find(&h.db, REMINDER_JOB, id).unwrap(), Some(status));
    assert!(transport.calls().is_empty());
}
