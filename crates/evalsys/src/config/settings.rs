//! Typed runtime settings.
//!
//! Every [`SettingKey`] declares its value kind, its default and whether it
//! may be cleared. Values live in the `settings` table as JSON and are
//! cached per key for a bounded time, so changes written by another process
//! or node are picked up once the entry expires. A cleared setting is
//! cached as [`CachedSetting::Null`] so the store is not queried again
//! until the entry expires or is invalidated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::db::settings_repo::{self, StoredSetting};
use crate::db::{Database, DatabaseError};

/// Kind of value a setting holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Int,
    Text,
    Date,
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingKind::Bool => "bool",
            SettingKind::Int => "int",
            SettingKind::Text => "text",
            SettingKind::Date => "date",
        };
        f.write_str(name)
    }
}

/// A setting value tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Date(DateTime<Utc>),
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            SettingValue::Bool(_) => SettingKind::Bool,
            SettingValue::Int(_) => SettingKind::Int,
            SettingValue::Text(_) => SettingKind::Text,
            SettingValue::Date(_) => SettingKind::Date,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            SettingValue::Bool(b) => Value::Bool(*b),
            SettingValue::Int(i) => Value::from(*i),
            SettingValue::Text(s) => Value::String(s.clone()),
            SettingValue::Date(d) => Value::String(d.to_rfc3339()),
        }
    }

    /// Decodes a JSON value as the given kind.
    pub fn from_json(kind: SettingKind, value: &Value) -> Option<Self> {
        match (kind, value) {
            (SettingKind::Bool, Value::Bool(b)) => Some(SettingValue::Bool(*b)),
            (SettingKind::Int, Value::Number(n)) => n.as_i64().map(SettingValue::Int),
            (SettingKind::Text, Value::String(s)) => Some(SettingValue::Text(s.clone())),
            (SettingKind::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| SettingValue::Date(d.with_timezone(&Utc))),
            _ => None,
        }
    }

    /// Parses operator input (e.g. from the command line) as the given kind.
    pub fn parse(kind: SettingKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            SettingKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(SettingValue::Bool(true)),
                "false" | "no" | "0" => Some(SettingValue::Bool(false)),
                _ => None,
            },
            SettingKind::Int => raw.parse().ok().map(SettingValue::Int),
            SettingKind::Text => Some(SettingValue::Text(raw.to_string())),
            SettingKind::Date => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|d| SettingValue::Date(d.with_timezone(&Utc))),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Date(d) => f.write_str(&d.to_rfc3339()),
        }
    }
}

/// Registered runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    /// Recipients per consolidated email page.
    EmailBatchSize,
    /// Seconds to pause between consolidated email pages.
    EmailWaitInterval,
    /// Render dates with the time of day.
    UseDateTime,
    /// Show results as soon as an evaluation is open, ignoring view dates.
    ViewResultsIgnoreDates,
    /// Checkpoint reminder runs so they can resume after a crash.
    EnableReminderStatus,
    /// Send one digest per user instead of one email per evaluation.
    ConsolidatedEmails,
    HelpdeskEmail,
    FromEmail,
    ServerUrl,
    DefaultLocale,
    /// `send`, `log` or `none`.
    EmailDeliveryOption,
    /// Operations address receiving job completion summaries.
    JobCompletionEmail,
    /// Days before a digest recipient may be emailed again.
    ReminderFrequencyDays,
    LastConsolidatedRun,
}

impl SettingKey {
    pub const ALL: [SettingKey; 14] = [
        SettingKey::EmailBatchSize,
        SettingKey::EmailWaitInterval,
        SettingKey::UseDateTime,
        SettingKey::ViewResultsIgnoreDates,
        SettingKey::EnableReminderStatus,
        SettingKey::ConsolidatedEmails,
        SettingKey::HelpdeskEmail,
        SettingKey::FromEmail,
        SettingKey::ServerUrl,
        SettingKey::DefaultLocale,
        SettingKey::EmailDeliveryOption,
        SettingKey::JobCompletionEmail,
        SettingKey::ReminderFrequencyDays,
        SettingKey::LastConsolidatedRun,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::EmailBatchSize => "EmailBatchSize",
            SettingKey::EmailWaitInterval => "EmailWaitInterval",
            SettingKey::UseDateTime => "UseDateTime",
            SettingKey::ViewResultsIgnoreDates => "ViewResultsIgnoreDates",
            SettingKey::EnableReminderStatus => "EnableReminderStatus",
            SettingKey::ConsolidatedEmails => "ConsolidatedEmails",
            SettingKey::HelpdeskEmail => "HelpdeskEmail",
            SettingKey::FromEmail => "FromEmail",
            SettingKey::ServerUrl => "ServerUrl",
            SettingKey::DefaultLocale => "DefaultLocale",
            SettingKey::EmailDeliveryOption => "EmailDeliveryOption",
            SettingKey::JobCompletionEmail => "JobCompletionEmail",
            SettingKey::ReminderFrequencyDays => "ReminderFrequencyDays",
            SettingKey::LastConsolidatedRun => "LastConsolidatedRun",
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingKey::EmailBatchSize
            | SettingKey::EmailWaitInterval
            | SettingKey::ReminderFrequencyDays => SettingKind::Int,
            SettingKey::UseDateTime
            | SettingKey::ViewResultsIgnoreDates
            | SettingKey::EnableReminderStatus
            | SettingKey::ConsolidatedEmails => SettingKind::Bool,
            SettingKey::LastConsolidatedRun => SettingKind::Date,
            _ => SettingKind::Text,
        }
    }

    pub fn nullable(&self) -> bool {
        matches!(
            self,
            SettingKey::JobCompletionEmail | SettingKey::LastConsolidatedRun
        )
    }

    pub fn default_value(&self) -> Option<SettingValue> {
        let value = match self {
            SettingKey::EmailBatchSize => SettingValue::Int(100),
            SettingKey::EmailWaitInterval => SettingValue::Int(0),
            SettingKey::UseDateTime => SettingValue::Bool(false),
            SettingKey::ViewResultsIgnoreDates => SettingValue::Bool(false),
            SettingKey::EnableReminderStatus => SettingValue::Bool(true),
            SettingKey::ConsolidatedEmails => SettingValue::Bool(false),
            SettingKey::HelpdeskEmail => SettingValue::Text("helpdesk@localhost".into()),
            SettingKey::FromEmail => SettingValue::Text("evaluations@localhost".into()),
            SettingKey::ServerUrl => SettingValue::Text("http://localhost:8080".into()),
            SettingKey::DefaultLocale => SettingValue::Text("en_US".into()),
            SettingKey::EmailDeliveryOption => SettingValue::Text("send".into()),
            SettingKey::ReminderFrequencyDays => SettingValue::Int(0),
            SettingKey::JobCompletionEmail | SettingKey::LastConsolidatedRun => return None,
        };
        Some(value)
    }

    fn check(&self, value: &SettingValue) -> Result<(), SettingsError> {
        if value.kind() != self.kind() {
            return Err(SettingsError::TypeMismatch {
                key: *self,
                expected: self.kind(),
                found: value.kind(),
            });
        }
        match (self, value) {
            (SettingKey::EmailDeliveryOption, SettingValue::Text(s))
                if !matches!(s.as_str(), "send" | "log" | "none") =>
            {
                Err(SettingsError::InvalidValue {
                    key: *self,
                    reason: format!("'{}' is not one of send, log, none", s),
                })
            }
            (
                SettingKey::EmailBatchSize
                | SettingKey::EmailWaitInterval
                | SettingKey::ReminderFrequencyDays,
                SettingValue::Int(i),
            ) if *i < 0 => Err(SettingsError::InvalidValue {
                key: *self,
                reason: "must not be negative".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Unknown setting '{0}'")]
    UnknownKey(String),

    #[error("Setting {key} expects a {expected} value, got {found}")]
    TypeMismatch {
        key: SettingKey,
        expected: SettingKind,
        found: SettingKind,
    },

    #[error("Setting {0} cannot be cleared")]
    NotNullable(SettingKey),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: SettingKey, reason: String },

    #[error("Stored value for {0} is not a valid setting value")]
    Corrupt(SettingKey),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Cache entry. `Null` records a setting that is present but cleared.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedSetting {
    Value(SettingValue),
    Null,
}

impl CachedSetting {
    fn into_option(self) -> Option<SettingValue> {
        match self {
            CachedSetting::Value(v) => Some(v),
            CachedSetting::Null => None,
        }
    }
}

/// How long a cached setting is trusted before the store is read again.
pub const SETTINGS_CACHE_TTL_SECS: u64 = 60;

/// Settings registry backed by the `settings` table.
#[derive(Clone)]
pub struct Settings {
    db: Database,
    clock: Arc<dyn Clock>,
    cache: Cache<SettingKey, CachedSetting>,
}

impl Settings {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(db, clock, Duration::from_secs(SETTINGS_CACHE_TTL_SECS))
    }

    pub fn with_ttl(db: Database, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            db,
            clock,
            cache: Cache::builder()
                .max_capacity(SettingKey::ALL.len() as u64)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Returns the effective value, falling back to the key's default when
    /// the setting was never stored.
    pub fn get(&self, key: SettingKey) -> Result<Option<SettingValue>, SettingsError> {
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.into_option());
        }

        let entry = match settings_repo::find(&self.db, key.name())? {
            StoredSetting::Missing => match key.default_value() {
                Some(v) => CachedSetting::Value(v),
                None => CachedSetting::Null,
            },
            StoredSetting::Null => CachedSetting::Null,
            StoredSetting::Value(json) => SettingValue::from_json(key.kind(), &json)
                .map(CachedSetting::Value)
                .ok_or(SettingsError::Corrupt(key))?,
        };
        self.cache.insert(key, entry.clone());
        Ok(entry.into_option())
    }

    /// Stores a value, or clears it with `None`. The value must match the
    /// key's kind.
    pub fn set(&self, key: SettingKey, value: Option<SettingValue>) -> Result<(), SettingsError> {
        match &value {
            Some(v) => key.check(v)?,
            None if !key.nullable() => return Err(SettingsError::NotNullable(key)),
            None => {}
        }

        let json = value.as_ref().map(SettingValue::to_json);
        settings_repo::upsert(&self.db, key.name(), json.as_ref(), self.clock.now())?;

        let entry = match value {
            Some(v) => CachedSetting::Value(v),
            None => CachedSetting::Null,
        };
        self.cache.insert(key, entry);
        log::debug!("Setting {} updated", key);
        Ok(())
    }

    /// Drops one cached key, or every key when `None`.
    pub fn invalidate(&self, key: Option<SettingKey>) {
        match key {
            Some(k) => self.cache.invalidate(&k),
            None => self.cache.invalidate_all(),
        }
    }

    /// Writes the settings block of a config file into the store.
    pub fn seed(&self, values: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
        for (name, json) in values {
            let key: SettingKey = name.parse()?;
            let value = if json.is_null() {
                None
            } else {
                let parsed = SettingValue::from_json(key.kind(), json).ok_or_else(|| {
                    SettingsError::InvalidValue {
                        key,
                        reason: format!("expected a {} value, got {}", key.kind(), json),
                    }
                })?;
                Some(parsed)
            };
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn get_bool(&self, key: SettingKey) -> Result<bool, SettingsError> {
        match self.get(key)? {
            Some(SettingValue::Bool(b)) => Ok(b),
            Some(other) => Err(SettingsError::TypeMismatch {
                key,
                expected: SettingKind::Bool,
                found: other.kind(),
            }),
            None => Ok(false),
        }
    }

    pub fn get_int(&self, key: SettingKey) -> Result<i64, SettingsError> {
        match self.get(key)? {
            Some(SettingValue::Int(i)) => Ok(i),
            Some(other) => Err(SettingsError::TypeMismatch {
                key,
                expected: SettingKind::Int,
                found: other.kind(),
            }),
            None => Ok(0),
        }
    }

    pub fn get_text(&self, key: SettingKey) -> Result<Option<String>, SettingsError> {
        match self.get(key)? {
            Some(SettingValue::Text(s)) => Ok(Some(s)),
            Some(other) => Err(SettingsError::TypeMismatch {
                key,
                expected: SettingKind::Text,
                found: other.kind(),
            }),
            None => Ok(None),
        }
    }

    pub fn get_date(&self, key: SettingKey) -> Result<Option<DateTime<Utc>>, SettingsError> {
        match self.get(key)? {
            Some(SettingValue::Date(d)) => Ok(Some(d)),
            Some(other) => Err(SettingsError::TypeMismatch {
                key,
                expected: SettingKind::Date,
                found: other.kind(),
            }),
            None => Ok(None),
        }
    }
}
