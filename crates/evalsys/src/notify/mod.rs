//! Notification composition and delivery: per-evaluation runs, consolidated
//! digests, templates, transport and job status sinks.

pub mod composer;
pub mod consolidated;
pub mod dispatcher;
pub mod status;
pub mod templates;
pub mod transport;

pub use composer::{EmailMessage, NotificationComposer};
pub use consolidated::{BatchConfig, ConsolidatedBatcher, DbRecipientSource, Pause, RecipientSource, ThreadPause};
pub use dispatcher::{NotificationDispatcher, REMINDER_JOB};
pub use status::{
    BroadcastStatusReporter, JobStatusEvent, JobStatusReporter, LogStatusReporter, NoopStatusReporter,
};
pub use templates::{delete_template_override, find_template, save_template_override};
pub use transport::{DeliveryOption, EmailTransport, OutboxTransport, SendError};
