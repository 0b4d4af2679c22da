//! `evalsys` operator command line.
//!
//! Opens the shared database, seeds runtime settings from the config file,
//! then runs a single job, the periodic scheduler, or an administrative
//! operation on one evaluation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use evalsys::config::SettingKind;
use evalsys::{
    Clock, Database, EvalSysConfig, IncludeConstant, JobName, JobRunner, JobScheduler,
    OutboxTransport, RunnerConfig, SettingKey, SettingValue, Settings, SqliteClusterLock,
    SystemClock,
};

#[derive(Parser)]
#[command(name = "evalsys", version, about = "Evaluation lifecycle and notification jobs")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "EVALSYS_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Run the job scheduler until the process is stopped
    Run,
    /// Run one job now
    Job {
        /// state_refresh, reminders, consolidated_available or consolidated_reminder
        name: String,
    },
    /// Recompute and print the state of an evaluation
    State { eval_id: i64 },
    /// Send reminders for one evaluation
    Remind {
        eval_id: i64,
        /// all, non_takers, responders or in_progress
        #[arg(long, default_value = "non_takers")]
        include: String,
    },
    /// End an open evaluation now
    Close { eval_id: i64 },
    /// Move the due date of an evaluation into the future
    Reopen {
        eval_id: i64,
        /// New due date (RFC 3339)
        #[arg(long)]
        due: String,
    },
    /// Soft-delete an evaluation
    Delete { eval_id: i64 },
    /// Read or change a runtime setting
    Setting {
        #[command(subcommand)]
        action: SettingAction,
    },
}

#[derive(Subcommand)]
enum SettingAction {
    /// Print the effective value as JSON
    Get { key: String },
    /// Store a value, or clear it with --clear
    Set {
        key: String,
        value: Option<String>,
        #[arg(long, conflicts_with = "value")]
        clear: bool,
    },
}

struct App {
    config: EvalSysConfig,
    db: Database,
    clock: Arc<dyn Clock>,
    settings: Settings,
}

impl App {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => evalsys::load_config(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => {
                let mut config = EvalSysConfig::default();
                config.apply_env_overrides();
                config
            }
        };
        if let Some(path) = &cli.database {
            config.database_path = Some(path.to_string_lossy().into_owned());
        }

        if let Err(e) = evalsys::logging::init_logging(&config.log_level, config.log_json) {
            eprintln!("warning: logging not initialised: {}", e);
        }

        let db_path = config
            .resolved_database_path()
            .context("no database path configured and no home directory found")?;
        let db = Database::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = Settings::new(db.clone(), Arc::clone(&clock));
        settings
            .seed(&config.settings)
            .context("applying settings from config")?;

        Ok(Self {
            config,
            db,
            clock,
            settings,
        })
    }

    fn runner(&self) -> JobRunner {
        let transport = Arc::new(OutboxTransport::new(self.db.clone(), Arc::clone(&self.clock)));
        let lock = Arc::new(SqliteClusterLock::new(self.db.clone(), Arc::clone(&self.clock)));
        JobRunner::new(
            self.db.clone(),
            self.settings.clone(),
            Arc::clone(&self.clock),
            transport,
            lock,
            RunnerConfig {
                node_id: self.config.node_id.clone(),
                lock_ttl: Duration::from_secs(self.config.lock_ttl_secs),
            },
        )
    }
}

fn parse_setting_value(key: SettingKey, raw: &str) -> anyhow::Result<SettingValue> {
    match SettingValue::parse(key.kind(), raw) {
        Some(value) => Ok(value),
        None => bail!("'{}' is not a valid {} value for {}", raw, key.kind(), key),
    }
}

fn setting_json(value: Option<SettingValue>) -> serde_json::Value {
    match value {
        None => serde_json::Value::Null,
        Some(SettingValue::Bool(b)) => serde_json::Value::Bool(b),
        Some(SettingValue::Int(i)) => serde_json::Value::from(i),
        Some(v @ SettingValue::Text(_)) | Some(v @ SettingValue::Date(_)) => {
            serde_json::Value::String(v.to_string())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = App::open(&cli)?;

    match &cli.command {
        Commands::Migrate => {
            println!("Database schema is up to date");
        }
        Commands::Run => {
            let runner = Arc::new(app.runner());
            let interval = Duration::from_secs(app.config.scheduler_interval_secs);
            log::info!(
                "Node {} running jobs every {:?}",
                app.config.node_id,
                interval
            );
            let scheduler = JobScheduler::new(runner, interval);
            // Held so the trigger channel stays open for the lifetime of the loop.
            let (_trigger_tx, trigger_rx) = evalsys::jobs::trigger_channel();
            let handle = scheduler.start(trigger_rx);
            if handle.join().is_err() {
                bail!("scheduler thread panicked");
            }
        }
        Commands::Job { name } => {
            let job: JobName = name.parse()?;
            let report = app.runner().run(job)?;
            println!(
                "{}: {} email(s), {} evaluation(s), {} state change(s)",
                job,
                report.emails_sent,
                report.evaluations,
                report.transitions.len()
            );
            for t in &report.transitions {
                println!("  evaluation {}: {} -> {}", t.eval_id, t.from, t.to);
            }
        }
        Commands::State { eval_id } => {
            let runner = app.runner();
            let state = runner.lifecycle().update_evaluation_state(*eval_id)?;
            let viewable_as = runner.lifecycle().calculate_viewability(state)?;
            println!("{} (results view: {})", state, viewable_as);
        }
        Commands::Remind { eval_id, include } => {
            let include: IncludeConstant = include.parse()?;
            let sent = app
                .runner()
                .dispatcher()
                .send_eval_reminder_notifications(*eval_id, include)?;
            println!("Sent {} reminder(s)", sent.len());
        }
        Commands::Close { eval_id } => {
            let eval = app.runner().lifecycle().close_evaluation_early(*eval_id)?;
            println!("Evaluation {} is now {}", eval_id, eval.state);
        }
        Commands::Reopen { eval_id, due } => {
            let due: DateTime<Utc> = DateTime::parse_from_rfc3339(due)
                .with_context(|| format!("invalid due date '{}'", due))?
                .with_timezone(&Utc);
            let eval = app.runner().lifecycle().reopen_evaluation(*eval_id, due)?;
            println!("Evaluation {} is now {}, due {}", eval_id, eval.state, due);
        }
        Commands::Delete { eval_id } => {
            app.runner().lifecycle().soft_delete_evaluation(*eval_id)?;
            println!("Evaluation {} deleted", eval_id);
        }
        Commands::Setting { action } => match action {
            SettingAction::Get { key } => {
                let key: SettingKey = key.parse()?;
                let value = app.settings.get(key)?;
                let out = serde_json::json!({ "key": key.name(), "value": setting_json(value) });
                println!("{}", out);
            }
            SettingAction::Set { key, value, clear } => {
                let key: SettingKey = key.parse()?;
                let value = match (value, clear) {
                    (_, true) => None,
                    (Some(raw), false) => Some(parse_setting_value(key, raw)?),
                    (None, false) if key.kind() == SettingKind::Bool => Some(SettingValue::Bool(true)),
                    (None, false) => bail!("a value or --clear is required"),
                };
                app.settings.set(key, value)?;
                println!("{} updated", key);
            }
        },
    }

    Ok(())
}
