use std::path::PathBuf;
use thiserror::Error;

use crate::config::SettingsError;
use crate::lock::LockError;
use crate::notify::SendError;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Send failed: {0}")]
    TransientSendFailure(#[from] SendError),

    #[error("Lock '{lock_id}' is held by another node")]
    LockContention { lock_id: String },

    #[error("Lock '{lock_id}' state unknown: {source}")]
    LockFailure {
        lock_id: String,
        #[source]
        source: LockError,
    },

    #[error("No email template configured for {template_type} (evaluation {eval_id:?})")]
    ConfigurationMissing {
        template_type: String,
        eval_id: Option<i64>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl EvalError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EvalError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, EvalError>;
