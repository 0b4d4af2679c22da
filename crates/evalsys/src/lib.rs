pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod model;
pub mod notify;
pub mod participants;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, EvalSysConfig, SettingKey, SettingValue, Settings, SettingsError};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, EvalError, Result};
pub use jobs::{JobName, JobReport, JobRunner, JobScheduler, RunnerConfig};
pub use lifecycle::{compute_state, EvaluationService, StateTransition};
pub use lock::{ClusterLock, LockError, LockOutcome, ReleaseOutcome, SqliteClusterLock};
pub use model::{EvalState, Evaluation, IncludeConstant};
pub use notify::{NotificationDispatcher, OutboxTransport};
pub use participants::{count_participants_for_eval, get_participants_for_eval, ParticipantQuery, StatusFilter};
