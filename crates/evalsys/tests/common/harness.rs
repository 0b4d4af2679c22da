//! Isolated test environment and recording test doubles.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use evalsys::jobs::RunnerConfig;
use evalsys::notify::{
    ConsolidatedBatcher, DeliveryOption, EmailTransport, JobStatusReporter, Pause, SendError,
};
use evalsys::{
    Clock, Database, EvaluationService, JobRunner, ManualClock, NotificationDispatcher, Settings,
    SqliteClusterLock,
};

/// Fixed starting instant for every harness.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

/// In-memory store, manual clock and settings wired together.
pub struct TestHarness {
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub settings: Settings,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let clock = Arc::new(ManualClock::new(base_time()));
        let settings = Settings::new(db.clone(), clock.clone());
        Self {
            db,
            clock,
            settings,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn dyn_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn lifecycle(&self) -> EvaluationService {
        EvaluationService::new(self.db.clone(), self.settings.clone(), self.dyn_clock())
    }

    pub fn dispatcher(&self, transport: Arc<dyn EmailTransport>) -> NotificationDispatcher {
        NotificationDispatcher::new(
            self.db.clone(),
            self.settings.clone(),
            self.dyn_clock(),
            transport,
        )
    }

    pub fn batcher(&self, transport: Arc<dyn EmailTransport>, pause: Arc<RecordingPause>) -> ConsolidatedBatcher {
        ConsolidatedBatcher::new(
            self.db.clone(),
            self.settings.clone(),
            self.dyn_clock(),
            transport,
        )
        .with_pause(pause)
    }

    pub fn runner(&self, node_id: &str, transport: Arc<dyn EmailTransport>) -> JobRunner {
        let lock = Arc::new(SqliteClusterLock::new(self.db.clone(), self.dyn_clock()));
        JobRunner::new(
            self.db.clone(),
            self.settings.clone(),
            self.dyn_clock(),
            transport,
            lock,
            RunnerConfig {
                node_id: node_id.to_string(),
                lock_ttl: Duration::from_secs(3600),
            },
        )
        .with_pause(Arc::new(RecordingPause::default()))
    }
}

/// One call made to [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Transport that records every call and maps `uid` to `uid@example.edu`.
/// Calls that include a poisoned user id are rejected.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<SentMail>>,
    poisoned: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_user(&self, user_id: &str) {
        self.poisoned.lock().unwrap().push(user_id.to_string());
    }

    pub fn calls(&self) -> Vec<SentMail> {
        self.calls.lock().unwrap().clone()
    }

    /// Every address any call went to, in call order.
    pub fn recipients(&self) -> Vec<String> {
        self.calls().into_iter().flat_map(|c| c.to).collect()
    }
}

impl EmailTransport for RecordingTransport {
    fn send_emails_to_users(
        &self,
        from: &str,
        to_user_ids: &[String],
        subject: &str,
        body: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError> {
        let poisoned = self.poisoned.lock().unwrap().clone();
        if let Some(bad) = to_user_ids.iter().find(|u| poisoned.contains(u)) {
            return Err(SendError::Rejected(format!("relay refused {}", bad)));
        }
        let addresses: Vec<String> = to_user_ids
            .iter()
            .map(|u| format!("{}@example.edu", u))
            .collect();
        self.send_emails_to_addresses(from, &addresses, subject, body, delivery)
    }

    fn send_emails_to_addresses(
        &self,
        _from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        _delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError> {
        self.calls.lock().unwrap().push(SentMail {
            to: to.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(to.to_vec())
    }
}

/// Status sink that keeps everything it is told.
#[derive(Default)]
pub struct RecordingReporter {
    pub progress: Mutex<Vec<(String, String)>>,
    pub errors: Mutex<Vec<(bool, String, String)>>,
}

impl RecordingReporter {
    pub fn value(&self, key: &str) -> Option<String> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn count(&self, key: &str) -> usize {
        self.progress.lock().unwrap().iter().filter(|(k, _)| k == key).count()
    }
}

impl JobStatusReporter for RecordingReporter {
    fn report_progress(&self, _job_id: &str, key: &str, value: &str) {
        self.progress
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
    }

    fn report_error(&self, _job_id: &str, fatal: bool, key: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((fatal, key.to_string(), message.to_string()));
    }
}

/// Records pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingPause {
    pub pauses: Mutex<Vec<Duration>>,
}

impl RecordingPause {
    pub fn count(&self) -> usize {
        self.pauses.lock().unwrap().len()
    }
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}
