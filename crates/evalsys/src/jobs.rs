//! Scheduled jobs and the periodic loop that drives them.
//!
//! Each job runs under the cluster lock `evalsys.job.<name>` with this
//! node's id as executor, so a job runs on at most one node at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::{SettingKey, Settings};
use crate::db::{evaluation_repo, Database};
use crate::error::{EvalError, Result};
use crate::lifecycle::{EvaluationService, StateTransition};
use crate::lock::{run_exclusive, ClusterLock};
use crate::model::{EvalState, IncludeConstant, UnknownVariant};
use crate::notify::{
    ConsolidatedBatcher, EmailTransport, JobStatusReporter, LogStatusReporter, NotificationDispatcher,
    Pause,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobName {
    StateRefresh,
    Reminders,
    ConsolidatedAvailable,
    ConsolidatedReminder,
}

impl JobName {
    pub const ALL: [JobName; 4] = [
        JobName::StateRefresh,
        JobName::Reminders,
        JobName::ConsolidatedAvailable,
        JobName::ConsolidatedReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::StateRefresh => "state_refresh",
            JobName::Reminders => "reminders",
            JobName::ConsolidatedAvailable => "consolidated_available",
            JobName::ConsolidatedReminder => "consolidated_reminder",
        }
    }

    pub fn lock_id(&self) -> String {
        format!("evalsys.job.{}", self.as_str())
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobName::ALL
            .iter()
            .find(|j| j.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownVariant::new("job", s))
    }
}

/// What a finished job did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub emails_sent: usize,
    pub evaluations: usize,
    pub transitions: Vec<StateTransition>,
}

/// Node identity and lock lifetime.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub node_id: String,
    pub lock_ttl: Duration,
}

/// Runs individual jobs under the cluster lock.
pub struct JobRunner {
    db: Database,
    settings: Settings,
    clock: Arc<dyn Clock>,
    lock: Arc<dyn ClusterLock>,
    config: RunnerConfig,
    lifecycle: EvaluationService,
    dispatcher: NotificationDispatcher,
    batcher: ConsolidatedBatcher,
    status: Arc<dyn JobStatusReporter>,
}

impl JobRunner {
    pub fn new(
        db: Database,
        settings: Settings,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn EmailTransport>,
        lock: Arc<dyn ClusterLock>,
        config: RunnerConfig,
    ) -> Self {
        let lifecycle = EvaluationService::new(db.clone(), settings.clone(), Arc::clone(&clock));
        let dispatcher = NotificationDispatcher::new(
            db.clone(),
            settings.clone(),
            Arc::clone(&clock),
            Arc::clone(&transport),
        );
        let batcher = ConsolidatedBatcher::new(db.clone(), settings.clone(), Arc::clone(&clock), transport);
        Self {
            db,
            settings,
            clock,
            lock,
            config,
            lifecycle,
            dispatcher,
            batcher,
            status: Arc::new(LogStatusReporter),
        }
    }

    pub fn with_status(mut self, status: Arc<dyn JobStatusReporter>) -> Self {
        self.status = status;
        self
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.batcher = self.batcher.with_pause(pause);
        self
    }

    pub fn lifecycle(&self) -> &EvaluationService {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Runs one job while holding its lock.
    pub fn run(&self, job: JobName) -> Result<JobReport> {
        let span = tracing::info_span!("job", job = job.as_str(), node = self.config.node_id.as_str());
        let _guard = span.enter();

        run_exclusive(
            self.lock.as_ref(),
            &job.lock_id(),
            &self.config.node_id,
            self.config.lock_ttl,
            || match job {
                JobName::StateRefresh => self.state_refresh(),
                JobName::Reminders => self.reminders(),
                JobName::ConsolidatedAvailable => self.consolidated(job),
                JobName::ConsolidatedReminder => self.consolidated(job),
            },
        )
    }

    /// One scheduler pass: every job that applies to the current settings.
    /// Contention is expected when several nodes share the store.
    pub fn run_all(&self) -> Vec<(JobName, Result<JobReport>)> {
        // Another node or the CLI may have changed settings since the last pass.
        self.settings.invalidate(None);
        let mut results = Vec::new();
        for job in self.due_jobs() {
            let result = self.run(job);
            match &result {
                Ok(report) => log::info!(
                    "Job {} finished: {} email(s), {} transition(s)",
                    job,
                    report.emails_sent,
                    report.transitions.len()
                ),
                Err(EvalError::LockContention { .. }) => {
                    log::info!("Job {} is running on another node, skipped", job)
                }
                Err(e) => log::error!("Job {} failed: {}", job, e),
            }
            results.push((job, result));
        }
        results
    }

    fn due_jobs(&self) -> Vec<JobName> {
        let consolidated = self.settings.get_bool(SettingKey::ConsolidatedEmails).unwrap_or(false);
        let frequency = self.settings.get_int(SettingKey::ReminderFrequencyDays).unwrap_or(0);
        let mut jobs = vec![JobName::StateRefresh];
        if consolidated {
            jobs.push(JobName::ConsolidatedAvailable);
            // Without a frequency every pass would re-send the digest.
            if frequency > 0 {
                jobs.push(JobName::ConsolidatedReminder);
            }
        } else {
            jobs.push(JobName::Reminders);
        }
        jobs
    }

    fn state_refresh(&self) -> Result<JobReport> {
        let transitions = self.lifecycle.refresh_all_states()?;
        let consolidated = self.settings.get_bool(SettingKey::ConsolidatedEmails)?;

        let mut report = JobReport::default();
        for t in &transitions {
            let sent = match t.to {
                EvalState::Active if !consolidated => {
                    self.dispatcher.send_eval_available_notifications(t.eval_id)
                }
                EvalState::Viewable => self.dispatcher.send_eval_results_notifications(t.eval_id),
                _ => continue,
            };
            match sent {
                Ok(addresses) => {
                    report.emails_sent += addresses.len();
                    report.evaluations += 1;
                }
                Err(e) => log::error!("Notifications for evaluation {} failed: {}", t.eval_id, e),
            }
        }
        report.transitions = transitions;
        Ok(report)
    }

    fn reminders(&self) -> Result<JobReport> {
        let now = self.clock.now();
        let mut report = JobReport::default();
        for eval in evaluation_repo::list_due_for_reminder(&self.db, now)? {
            let Some(eval_id) = eval.id else { continue };
            match self
                .dispatcher
                .send_eval_reminder_notifications(eval_id, IncludeConstant::NonTakers)
            {
                Ok(addresses) => {
                    report.emails_sent += addresses.len();
                    report.evaluations += 1;
                }
                Err(e) => log::error!("Reminders for evaluation {} failed: {}", eval_id, e),
            }
            let next = now + chrono::Duration::days(i64::from(eval.reminder_days));
            evaluation_repo::set_next_reminder_at(&self.db, eval_id, Some(next))?;
        }
        Ok(report)
    }

    fn consolidated(&self, job: JobName) -> Result<JobReport> {
        let job_id = format!("{}-{}", job, self.clock.now_millis());
        let sent = match job {
            JobName::ConsolidatedReminder => self
                .batcher
                .send_consolidated_reminder_notifications(self.status.as_ref(), &job_id)?,
            _ => self
                .batcher
                .send_consolidated_available_notifications(self.status.as_ref(), &job_id)?,
        };
        Ok(JobReport {
            emails_sent: sent.len(),
            ..Default::default()
        })
    }
}

/// Channel for manual scheduler passes.
pub fn trigger_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(16)
}

/// Drives [`JobRunner::run_all`] on an interval from a background thread.
pub struct JobScheduler {
    runner: Arc<JobRunner>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl JobScheduler {
    pub fn new(runner: Arc<JobRunner>, interval: Duration) -> Self {
        Self {
            runner,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the loop in a background thread. A message on `trigger_rx`
    /// runs a pass immediately.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let runner = Arc::clone(&self.runner);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start scheduler runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual job pass triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let pass = Arc::clone(&runner);
                    if let Err(e) = tokio::task::spawn_blocking(move || pass.run_all()).await {
                        log::error!("Job pass panicked: {}", e);
                    }
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::lock::SqliteClusterLock;
    use crate::notify::OutboxTransport;

    fn runner() -> JobRunner {
        let db = Database::open_in_memory().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = Settings::new(db.clone(), Arc::clone(&clock));
        let transport = Arc::new(OutboxTransport::new(db.clone(), Arc::clone(&clock)));
        let lock = Arc::new(SqliteClusterLock::new(db.clone(), Arc::clone(&clock)));
        JobRunner::new(
            db,
            settings,
            clock,
            transport,
            lock,
            RunnerConfig {
                node_id: "node-test".into(),
                lock_ttl: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_job_names() {
        for job in JobName::ALL {
            assert_eq!(job.as_str().parse::<JobName>().unwrap(), job);
        }
        assert_eq!(JobName::Reminders.lock_id(), "evalsys.job.reminders");
        assert!("nightly".parse::<JobName>().is_err());
    }

    #[test]
    fn test_due_jobs_follow_consolidated_setting() {
        let runner = runner();
        assert_eq!(runner.due_jobs(), vec![JobName::StateRefresh, JobName::Reminders]);

        runner
            .settings
            .set(SettingKey::ConsolidatedEmails, Some(crate::config::SettingValue::Bool(true)))
            .unwrap();
        assert_eq!(
            runner.due_jobs(),
            vec![JobName::StateRefresh, JobName::ConsolidatedAvailable]
        );
    }

    #[test]
    fn test_run_all_on_empty_store() {
        let runner = runner();
        let results = runner.run_all();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_scheduler_shutdown() {
        let runner = Arc::new(runner());
        let scheduler = JobScheduler::new(runner, Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = trigger_channel();
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        // Wake the select loop so it sees the shutdown flag.
        let _ = trigger_tx.send(());

        handle.join().expect("scheduler thread panicked");
    }
}
