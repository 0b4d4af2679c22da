//! One digest email per user covering every evaluation they still owe.
//!
//! The queue is filled once per run and read page by page. Each recipient's
//! rows are consumed as soon as their digest is sent; failed sends stay
//! queued for the next run. Pages are sent sequentially with a configurable
//! pause in between, and the caller holds the job lock for the whole run,
//! pauses included.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{SettingKey, SettingValue, Settings};
use crate::db::queue_repo::{self, QueueKind, QueuedRecipient};
use crate::db::{event_repo, Database};
use crate::error::Result;
use crate::model::TemplateType;
use crate::notify::composer::NotificationComposer;
use crate::notify::status::JobStatusReporter;
use crate::notify::templates::find_template;
use crate::notify::transport::{DeliveryOption, EmailTransport};

/// Smallest page size honoured, whatever the setting says.
pub const MIN_BATCH_SIZE: u32 = 10;

const MS_PER_DAY: i64 = 86_400_000;

/// Page size and pause between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: u32,
    pub wait_interval: Duration,
}

impl BatchConfig {
    /// Clamps raw setting values: the batch size to at least
    /// [`MIN_BATCH_SIZE`], the wait to zero or more seconds.
    pub fn clamped(batch_size: i64, wait_secs: i64) -> Self {
        let batch_size = u32::try_from(batch_size.max(i64::from(MIN_BATCH_SIZE))).unwrap_or(u32::MAX);
        let wait_secs = u64::try_from(wait_secs).unwrap_or(0);
        Self {
            batch_size,
            wait_interval: Duration::from_secs(wait_secs),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::clamped(
            settings.get_int(SettingKey::EmailBatchSize)?,
            settings.get_int(SettingKey::EmailWaitInterval)?,
        ))
    }
}

/// Cutoff before which a previous email no longer suppresses a new one.
/// `None` when the frequency is zero (no suppression).
pub fn suppression_cutoff(now: DateTime<Utc>, frequency_days: i64) -> Option<DateTime<Utc>> {
    if frequency_days <= 0 {
        return None;
    }
    let window = chrono::Duration::milliseconds(frequency_days.saturating_mul(MS_PER_DAY));
    now.checked_sub_signed(window)
}

/// Pending digest recipients for one queue kind.
pub trait RecipientSource: Send + Sync {
    /// Fills the queue; returns the rows added.
    fn prepare(&self, cutoff: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<u64>;
    /// Returns the next page of recipients whose user id sorts after
    /// `after`; empty once exhausted.
    fn next_page(&self, after: Option<&str>, page_size: u32) -> Result<Vec<QueuedRecipient>>;
    /// Records that `recipient` was emailed and drops them from the queue.
    fn mark_sent(&self, recipient: &QueuedRecipient, at: DateTime<Utc>) -> Result<()>;
    /// Clears processed rows after the run, keeping failed ones for retry.
    fn reset(&self, cutoff: Option<DateTime<Utc>>) -> Result<u64>;
}

/// Queue backed by the `email_queue` table.
pub struct DbRecipientSource {
    db: Database,
    kind: QueueKind,
}

impl DbRecipientSource {
    pub fn new(db: Database, kind: QueueKind) -> Self {
        Self { db, kind }
    }
}

impl RecipientSource for DbRecipientSource {
    fn prepare(&self, cutoff: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<u64> {
        Ok(queue_repo::prepare(&self.db, self.kind, cutoff, now)?)
    }

    fn next_page(&self, after: Option<&str>, page_size: u32) -> Result<Vec<QueuedRecipient>> {
        Ok(queue_repo::fetch_page(&self.db, self.kind, after, page_size)?)
    }

    fn mark_sent(&self, recipient: &QueuedRecipient, at: DateTime<Utc>) -> Result<()> {
        queue_repo::consume(&self.db, self.kind, recipient, at)?;
        Ok(())
    }

    fn reset(&self, cutoff: Option<DateTime<Utc>>) -> Result<u64> {
        Ok(queue_repo::clear_processed(&self.db, self.kind, cutoff)?)
    }
}

/// Blocks between pages.
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Sleeps the current thread.
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Clone)]
pub struct ConsolidatedBatcher {
    db: Database,
    settings: Settings,
    clock: Arc<dyn Clock>,
    composer: NotificationComposer,
    transport: Arc<dyn EmailTransport>,
    pause: Arc<dyn Pause>,
}

impl ConsolidatedBatcher {
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
            pause: Arc::new(ThreadPause),
        }
    }

    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn send_consolidated_available_notifications(
        &self,
        sink: &dyn JobStatusReporter,
        job_id: &str,
    ) -> Result<Vec<String>> {
        let source = DbRecipientSource::new(self.db.clone(), QueueKind::Available);
        self.run(&source, TemplateType::ConsolidatedAvailable, sink, job_id)
    }

    pub fn send_consolidated_reminder_notifications(
        &self,
        sink: &dyn JobStatusReporter,
        job_id: &str,
    ) -> Result<Vec<String>> {
        let source = DbRecipientSource::new(self.db.clone(), QueueKind::Reminder);
        self.run(&source, TemplateType::ConsolidatedReminder, sink, job_id)
    }

    /// Sends one digest per queued recipient of `source`.
    pub fn run(
        &self,
        source: &dyn RecipientSource,
        template_type: TemplateType,
        sink: &dyn JobStatusReporter,
        job_id: &str,
    ) -> Result<Vec<String>> {
        let started = Instant::now();
        let template = match find_template(&self.db, template_type, None) {
            Ok(t) => t,
            Err(e) => {
                sink.report_error(job_id, true, "template", &e.to_string());
                return Err(e);
            }
        };
        let config = BatchConfig::from_settings(&self.settings)?;
        let from = self.settings.get_text(SettingKey::FromEmail)?.unwrap_or_default();
        let delivery = self
            .settings
            .get_text(SettingKey::EmailDeliveryOption)?
            .and_then(|raw| raw.parse::<DeliveryOption>().ok())
            .unwrap_or_default();

        let now = self.clock.now();
        let cutoff = suppression_cutoff(now, self.settings.get_int(SettingKey::ReminderFrequencyDays)?);
        let queued = source.prepare(cutoff, now)?;
        sink.report_progress(job_id, "queued", &queued.to_string());
        log::info!(
            "Consolidated {} run: {} queued row(s), batch size {}, wait {:?}",
            template_type.as_str(),
            queued,
            config.batch_size,
            config.wait_interval
        );

        let mut sent = Vec::new();
        let mut recipients = 0usize;
        let mut evaluations = BTreeSet::new();
        let mut page = 0u32;
        let mut last_user: Option<String> = None;
        loop {
            let batch = source.next_page(last_user.as_deref(), config.batch_size)?;
            if batch.is_empty() {
                break;
            }
            for recipient in &batch {
                recipients += 1;
                evaluations.extend(recipient.eval_ids.iter().copied());
                match self.send_one(recipient, &template.message, &template.subject, &from, delivery) {
                    Ok(addresses) => {
                        if let Err(e) = source.mark_sent(recipient, self.clock.now()) {
                            sink.report_error(job_id, false, &recipient.user_id, &e.to_string());
                        }
                        sent.extend(addresses);
                    }
                    Err(e) => {
                        log::warn!("Digest to {} failed: {}", recipient.user_id, e);
                        sink.report_error(job_id, false, &recipient.user_id, &e.to_string());
                    }
                }
            }
            sink.report_progress(job_id, "page", &format!("{} ({} recipients)", page + 1, batch.len()));
            last_user = batch.last().map(|r| r.user_id.clone());

            if (batch.len() as u64) < u64::from(config.batch_size) {
                break;
            }
            page += 1;
            self.pause.pause(config.wait_interval);
        }

        let cleared = source.reset(cutoff)?;
        log::debug!("Cleared {} processed {} queue row(s)", cleared, template_type.as_str());

        self.settings
            .set(SettingKey::LastConsolidatedRun, Some(SettingValue::Date(self.clock.now())))?;

        let elapsed = started.elapsed().as_millis();
        sink.report_progress(job_id, "evaluations", &evaluations.len().to_string());
        sink.report_progress(job_id, "recipients", &recipients.to_string());
        sink.report_progress(job_id, "emails", &sent.len().to_string());
        sink.report_progress(job_id, "elapsed_ms", &elapsed.to_string());
        event_repo::record(
            &self.db,
            "consolidated.sent",
            None,
            &format!(
                "{}: {} email(s) to {} recipient(s) covering {} evaluation(s) in {} ms",
                template_type.as_str(),
                sent.len(),
                recipients,
                evaluations.len(),
                elapsed
            ),
            self.clock.now(),
        )?;
        Ok(sent)
    }

    fn send_one(
        &self,
        recipient: &QueuedRecipient,
        message_template: &str,
        subject_template: &str,
        from: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>> {
        let message = self.composer.make_consolidated_message(
            message_template,
            subject_template,
            recipient.eval_ids.len(),
            recipient.earliest_due,
        )?;
        Ok(self.transport.send_emails_to_users(
            from,
            std::slice::from_ref(&recipient.user_id),
            &message.subject,
            &message.message,
            delivery,
        )?)
    }
}
