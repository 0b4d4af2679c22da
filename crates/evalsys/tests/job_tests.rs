//! Cluster lock round trips and scheduled jobs across two nodes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use common::{EvalBuilder, GroupBuilder, RecordingTransport, TestHarness};
use evalsys::db::evaluation_repo;
use evalsys::model::EvalState;
use evalsys::{
    ClusterLock, EvalError, JobName, LockOutcome, ReleaseOutcome, SettingKey, SettingValue,
    Settings, SqliteClusterLock,
};

#[test]
fn test_lock_round_trip_between_nodes() {
    let h = TestHarness::new();
    let lock = SqliteClusterLock::new(h.db.clone(), h.dyn_clock());
    let ttl = Duration::from_secs(600);

    assert_eq!(lock.obtain("job", "node-a", ttl).unwrap(), LockOutcome::Acquired);
    assert_eq!(lock.obtain("job", "node-b", ttl).unwrap(), LockOutcome::Contended);

    assert_eq!(lock.release("job", "node-b").unwrap(), ReleaseOutcome::NotHeld);
    assert_eq!(lock.release("job", "node-a").unwrap(), ReleaseOutcome::Released);
    assert_eq!(lock.obtain("job", "node-b", ttl).unwrap(), LockOutcome::Acquired);
}

#[test]
fn test_expired_lock_can_be_taken_over() {
    let h = TestHarness::new();
    let lock = SqliteClusterLock::new(h.db.clone(), h.dyn_clock());
    let ttl = Duration::from_secs(60);

    lock.obtain("job", "node-a", ttl).unwrap();
    h.clock.advance(ChronoDuration::seconds(61));

    assert_eq!(lock.obtain("job", "node-b", ttl).unwrap(), LockOutcome::Acquired);
    assert_eq!(lock.release("job", "node-a").unwrap(), ReleaseOutcome::NotHeld);
}

#[test]
fn test_job_held_by_another_node_is_skipped() {
    let h = TestHarness::new();
    let other = SqliteClusterLock::new(h.db.clone(), h.dyn_clock());
    other
        .obtain(&JobName::StateRefresh.lock_id(), "node-b", Duration::from_secs(600))
        .unwrap();
    let runner = h.runner("node-a", RecordingTransport::new());

    let err = runner.run(JobName::StateRefresh).unwrap_err();
    assert!(matches!(err, EvalError::LockContention { .. }));

    let results = runner.run_all();
    let refresh = results
        .iter()
        .find(|(job, _)| *job == JobName::StateRefresh)
        .unwrap();
    assert!(matches!(refresh.1, Err(EvalError::LockContention { .. })));
    let reminders = results
        .iter()
        .find(|(job, _)| *job == JobName::Reminders)
        .unwrap();
    assert!(reminders.1.is_ok());
}

#[test]
fn test_state_refresh_announces_newly_open_evaluations() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now())
        .starts_in(ChronoDuration::minutes(30))
        .due_in(ChronoDuration::days(3))
        .state(EvalState::InQueue)
        .insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1", "s2"]).insert(&h.db, h.now());
    let transport = RecordingTransport::new();
    let runner = h.runner("node-a", transport.clone());

    let report = runner.run(JobName::StateRefresh).unwrap();
    assert!(report.transitions.is_empty());
    assert!(transport.calls().is_empty());

    h.clock.advance(ChronoDuration::hours(1));
    let report = runner.run(JobName::StateRefresh).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.emails_sent, 2);
    assert!(transport.calls()[0].subject.starts_with("Evaluation available"));
}

#[test]
fn test_state_refresh_leaves_announcements_to_digest_when_consolidated() {
    let h = TestHarness::new();
    h.settings
        .set(SettingKey::ConsolidatedEmails, Some(SettingValue::Bool(true)))
        .unwrap();
    let id = EvalBuilder::new(h.now())
        .due_in(ChronoDuration::days(3))
        .state(EvalState::InQueue)
        .insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    let transport = RecordingTransport::new();
    let runner = h.runner("node-a", transport.clone());

    let report = runner.run(JobName::StateRefresh).unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert!(transport.calls().is_empty());

    let report = runner.run(JobName::ConsolidatedAvailable).unwrap();
    assert_eq!(report.emails_sent, 1);
}

#[test]
fn test_reminder_job_waits_for_next_reminder_date() {
    let h = TestHarness::new();
    let id = EvalBuilder::new(h.now())
        .due_in(ChronoDuration::days(10))
        .reminder_days(2)
        .insert(&h.db);
    GroupBuilder::new(id, "A").evaluators(&["s1"]).insert(&h.db, h.now());
    let transport = RecordingTransport::new();
    let runner = h.runner("node-a", transport.clone());

    assert_eq!(runner.run(JobName::Reminders).unwrap().emails_sent, 1);
    assert_eq!(runner.run(JobName::Reminders).unwrap().emails_sent, 0);

    let stored = evaluation_repo::find_by_id(&h.db, id).unwrap().unwrap();
    assert_eq!(stored.next_reminder_at, Some(h.now() + ChronoDuration::days(2)));

    h.clock.advance(ChronoDuration::days(2));
    assert_eq!(runner.run(JobName::Reminders).unwrap().emails_sent, 1);
}

#[test]
fn test_lock_is_released_after_a_job() {
    let h = TestHarness::new();
    let runner = h.runner("node-a", Arc::new(RecordingTransport::default()));
    runner.run(JobName::StateRefresh).unwrap();

    let lock = SqliteClusterLock::new(h.db.clone(), h.dyn_clock());
    assert_eq!(
        lock.obtain(&JobName::StateRefresh.lock_id(), "node-b", Duration::from_secs(60))
            .unwrap(),
        LockOutcome::Acquired
    );
}

#[test]
fn test_scheduler_pass_sees_settings_changed_elsewhere() {
    let h = TestHarness::new();
    let runner = h.runner("node-a", RecordingTransport::new());
    let jobs = |results: Vec<(JobName, evalsys::Result<evalsys::JobReport>)>| -> Vec<JobName> {
        results.into_iter().map(|(job, _)| job).collect()
    };
    assert!(!jobs(runner.run_all()).contains(&JobName::ConsolidatedAvailable));

    // The CLI on another process writes through its own cache.
    let operator = Settings::new(h.db.clone(), h.dyn_clock());
    operator
        .set(SettingKey::ConsolidatedEmails, Some(SettingValue::Bool(true)))
        .unwrap();

    assert!(jobs(runner.run_all()).contains(&JobName::ConsolidatedAvailable));
}
