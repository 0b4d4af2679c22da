use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable overriding `database_path`.
pub const ENV_DATABASE_PATH: &str = "EVALSYS_DATABASE_PATH";
/// Environment variable overriding `node_id`.
pub const ENV_NODE_ID: &str = "EVALSYS_NODE_ID";

/// Deployment configuration for one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSysConfig {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<String>,
    /// Executor id written into cluster locks.
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    /// Runtime settings written to the settings table at startup.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_lock_ttl_secs() -> u64 {
    3600
}

fn default_scheduler_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EvalSysConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            node_id: default_node_id(),
            lock_ttl_secs: default_lock_ttl_secs(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
            log_level: default_log_level(),
            log_json: false,
            settings: BTreeMap::new(),
        }
    }
}

impl EvalSysConfig {
    /// Configured database path, falling back to `~/.evalsys/data/evalsys.db`.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    /// Applies `EVALSYS_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.trim().is_empty() {
                self.database_path = Some(path);
            }
        }
        if let Ok(node) = std::env::var(ENV_NODE_ID) {
            if !node.trim().is_empty() {
                self.node_id = node;
            }
        }
    }
}
