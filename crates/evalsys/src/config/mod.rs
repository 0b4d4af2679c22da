pub mod loader;
pub mod schema;
pub mod settings;

pub use loader::{load_config, load_config_from_str};
pub use schema::EvalSysConfig;
pub use settings::{SettingKey, SettingKind, SettingValue, Settings, SettingsError};
