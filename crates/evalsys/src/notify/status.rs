//! Job status sinks for notification runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Receives progress and errors from a running job. Implementations must
/// not panic; reporting is fire-and-forget.
pub trait JobStatusReporter: Send + Sync {
    fn report_progress(&self, job_id: &str, key: &str, value: &str);
    fn report_error(&self, job_id: &str, fatal: bool, key: &str, message: &str);
}

/// One reported status line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStatusEvent {
    Progress {
        job_id: String,
        key: String,
        value: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        job_id: String,
        fatal: bool,
        key: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobStatusEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobStatusEvent::Progress { job_id, .. } | JobStatusEvent::Error { job_id, .. } => job_id,
        }
    }
}

/// Discards everything.
pub struct NoopStatusReporter;

impl JobStatusReporter for NoopStatusReporter {
    fn report_progress(&self, _job_id: &str, _key: &str, _value: &str) {}
    fn report_error(&self, _job_id: &str, _fatal: bool, _key: &str, _message: &str) {}
}

/// Writes status lines to the log.
pub struct LogStatusReporter;

impl JobStatusReporter for LogStatusReporter {
    fn report_progress(&self, job_id: &str, key: &str, value: &str) {
        log::info!("[{}] {}: {}", job_id, key, value);
    }

    fn report_error(&self, job_id: &str, fatal: bool, key: &str, message: &str) {
        if fatal {
            log::error!("[{}] {}: {}", job_id, key, message);
        } else {
            log::warn!("[{}] {}: {}", job_id, key, message);
        }
    }
}

/// Broadcasts status events to live subscribers.
#[derive(Clone)]
pub struct BroadcastStatusReporter {
    sender: Arc<broadcast::Sender<JobStatusEvent>>,
}

impl BroadcastStatusReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: JobStatusEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastStatusReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl JobStatusReporter for BroadcastStatusReporter {
    fn report_progress(&self, job_id: &str, key: &str, value: &str) {
        self.publish(JobStatusEvent::Progress {
            job_id: job_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn report_error(&self, job_id: &str, fatal: bool, key: &str, message: &str) {
        self.publish(JobStatusEvent::Error {
            job_id: job_id.to_string(),
            fatal,
            key: key.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
