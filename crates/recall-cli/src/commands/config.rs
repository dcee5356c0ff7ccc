use clap::Subcommand;
use recall_core::{Config, ConfigError};

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all config values
    Show,
    /// Get a config value
    Get {
        /// Config key (e.g. "sync.tolerance_minutes", "sweep.interval_secs")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// Reset config to defaults
    Reset,
}

pub fn run(ctx: &Context, action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Show => {
            print_json(&ctx.config)?;
        }
        ConfigAction::Get { key } => match ctx.config.get(&key) {
            Some(value) => println!("{value}"),
            None => return Err(ConfigError::UnknownKey(key).into()),
        },
        ConfigAction::Set { key, value } => {
            let mut config = ctx.config.clone();
            config.set(&key, &value)?;
            config.save_to(&ctx.config_path)?;
            println!("ok");
        }
        ConfigAction::Reset => {
            Config::default().save_to(&ctx.config_path)?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
