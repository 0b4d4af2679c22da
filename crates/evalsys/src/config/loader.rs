use std::path::Path;

use crate::config::schema::EvalSysConfig;
use crate::config::settings::SettingKey;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EvalSysConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EvalSysConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: EvalSysConfig = serde_json::from_value(json_value)?;
    config.apply_env_overrides();

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &EvalSysConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.node_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "node_id must not be empty".to_string(),
        });
    }

    if config.lock_ttl_secs == 0 {
        return Err(ConfigError::Validation {
            message: "lock_ttl_secs must be greater than zero".to_string(),
        });
    }

    if config.scheduler_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler_interval_secs must be greater than zero".to_string(),
        });
    }

    if !LOG_LEVELS.contains(&config.log_level.to_lowercase().as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level: {}", config.log_level),
        });
    }

    // Seeded settings are type-checked later by `Settings::seed`; names are checked here.
    for name in config.settings.keys() {
        if name.parse::<SettingKey>().is_err() {
            return Err(ConfigError::Validation {
                message: format!("Unknown setting '{}'", name),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ENV_DATABASE_PATH, ENV_NODE_ID};
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(ENV_DATABASE_PATH);
        std::env::remove_var(ENV_NODE_ID);
    }

    #[test]
    #[serial]
    fn test_load_minimal_config() {
        clear_env();
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.lock_ttl_secs, 3600);
        assert_eq!(config.scheduler_interval_secs, 300);
        assert_eq!(config.log_level, "info");
        assert!(!config.node_id.is_empty());
        assert!(config.settings.is_empty());
    }

    #[test]
    #[serial]
    fn test_load_full_config() {
        clear_env();
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/evalsys/evalsys.db",
            "node_id": "node-a",
            "lock_ttl_secs": 600,
            "scheduler_interval_secs": 60,
            "log_level": "debug",
            "log_json": true,
            "settings": {
                "EmailBatchSize": 25,
                "FromEmail": "evals@example.edu"
            }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.database_path.as_deref(), Some("/var/lib/evalsys/evalsys.db"));
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.lock_ttl_secs, 600);
        assert!(config.log_json);
        assert_eq!(config.settings.len(), 2);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_DATABASE_PATH, "/tmp/override.db");
        std::env::set_var(ENV_NODE_ID, "node-env");

        let config = load_config_from_str(r#"{ "version": "1.0", "node_id": "node-file" }"#).unwrap();
        clear_env();

        assert_eq!(config.database_path.as_deref(), Some("/tmp/override.db"));
        assert_eq!(config.node_id, "node-env");
    }

    #[test]
    #[serial]
    fn test_schema_rejects_wrong_types() {
        clear_env();
        let result = load_config_from_str(r#"{ "version": "1.0", "lock_ttl_secs": "soon" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    #[serial]
    fn test_schema_requires_version() {
        clear_env();
        let result = load_config_from_str(r#"{ "node_id": "n" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    #[serial]
    fn test_unsupported_version() {
        clear_env();
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    #[serial]
    fn test_unknown_setting_rejected() {
        clear_env();
        let result =
            load_config_from_str(r#"{ "version": "1.0", "settings": { "NoSuchThing": 1 } }"#);
        match result {
            Err(ConfigError::Validation { message }) => assert!(message.contains("NoSuchThing")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evalsys.json");
        std::fs::write(&path, r#"{ "version": "1.0", "log_level": "warn" }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.log_level, "warn");

        let missing = load_config(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));
    }
}
