//! Subcommands and the state they share.

pub mod card;
pub mod config;
pub mod container;
pub mod sync;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{Config, Database, ReviewScheduler, ReviewService, SyncEngine, SyncTrigger};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Resolved configuration plus where it came from.
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    db_path: Option<PathBuf>,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>, db_path: Option<PathBuf>) -> CliResult<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::load_from(&config_path)?;
        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    pub fn open_database(&self) -> CliResult<Arc<Database>> {
        let path = match &self.db_path {
            Some(path) => path.clone(),
            None => self.config.database_path()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %path.display(), "opening database");
        Ok(Arc::new(Database::open(&path)?))
    }

    pub fn review_service(&self, db: &Arc<Database>) -> CliResult<ReviewService> {
        let scheduler = ReviewScheduler::from_config(&self.config.scheduler)?;
        Ok(ReviewService::new(db.clone(), scheduler))
    }

    pub fn sync_trigger(&self, db: &Arc<Database>) -> SyncTrigger {
        let engine = SyncEngine::from_config(db.clone(), db.clone(), &self.config.sync);
        SyncTrigger::new(Arc::new(engine), db.clone())
    }
}

/// Accepts RFC 3339 timestamps on the command line.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{raw}': {e}"))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
