//! Email transport. Delivery itself belongs to an external relay; this
//! layer resolves user ids to addresses and hands messages over.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::clock::Clock;
use crate::db::{outbox_repo, user_repo, Database, DatabaseError};
use crate::model::UnknownVariant;

/// How outgoing mail is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOption {
    /// Queue for the relay.
    #[default]
    Send,
    /// Write to the log instead of sending.
    Log,
    /// Only resolve addresses.
    None,
}

impl DeliveryOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOption::Send => "send",
            DeliveryOption::Log => "log",
            DeliveryOption::None => "none",
        }
    }
}

impl fmt::Display for DeliveryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryOption {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "send" => Ok(DeliveryOption::Send),
            "log" => Ok(DeliveryOption::Log),
            "none" => Ok(DeliveryOption::None),
            _ => Err(UnknownVariant::new("delivery option", s)),
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("no deliverable address among {0} recipient(s)")]
    NoAddresses(usize),

    #[error("mail store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// Sends one message to a set of users and returns the addresses used.
pub trait EmailTransport: Send + Sync {
    fn send_emails_to_users(
        &self,
        from: &str,
        to_user_ids: &[String],
        subject: &str,
        body: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError>;

    /// Sends to literal addresses (operations mail).
    fn send_emails_to_addresses(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError>;
}

/// Transport that writes to the `outbox` table.
pub struct OutboxTransport {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl OutboxTransport {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl EmailTransport for OutboxTransport {
    fn send_emails_to_users(
        &self,
        from: &str,
        to_user_ids: &[String],
        subject: &str,
        body: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError> {
        if to_user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut addresses = Vec::with_capacity(to_user_ids.len());
        for user in user_repo::find_many(&self.db, to_user_ids)? {
            match user.email.filter(|e| !e.trim().is_empty()) {
                Some(email) => addresses.push(email),
                None => log::warn!("User {} has no email address, skipping", user.user_id),
            }
        }
        if addresses.is_empty() {
            return Err(SendError::NoAddresses(to_user_ids.len()));
        }

        self.send_emails_to_addresses(from, &addresses, subject, body, delivery)
    }

    fn send_emails_to_addresses(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        delivery: DeliveryOption,
    ) -> Result<Vec<String>, SendError> {
        match delivery {
            DeliveryOption::Send => {
                outbox_repo::enqueue(&self.db, from, to, subject, body, self.clock.now())?;
                log::debug!("Queued '{}' for {} recipient(s)", subject, to.len());
            }
            DeliveryOption::Log => {
                log::info!(
                    "Email (not sent) from {} to {}: {}\n{}",
                    from,
                    to.join(", "),
                    subject,
                    body
                );
            }
            DeliveryOption::None => {}
        }
        Ok(to.to_vec())
    }
}
