//! Timer synchronization commands.
//!
//! `watch` runs the periodic sweep on a tokio interval. Each sweep runs on the
//! blocking pool; Ctrl-C cancels between scopes and stops the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use recall_core::{CancelToken, SweepReport, SyncResult, SyncTrigger};
use tracing::{info, warn};

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Synchronize the top-level scope owning a container
    Scope {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synchronize every top-level scope once
    Sweep {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sweep periodically until interrupted
    Watch {
        /// Seconds between sweeps (default: sweep.interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

pub fn run(ctx: &Context, action: SyncAction) -> CliResult {
    let db = ctx.open_database()?;
    let trigger = ctx.sync_trigger(&db);
    match action {
        SyncAction::Scope { id, json } => {
            let result = trigger.engine().synchronize_container(&id, Utc::now())?;
            if json {
                return print_json(&result);
            }
            print_result(&result);
        }
        SyncAction::Sweep { json } => {
            let report = trigger.sweep_all(Utc::now(), &CancelToken::new())?;
            if json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
            report.into_result()?;
        }
        SyncAction::Watch { interval_secs } => {
            let secs = interval_secs.unwrap_or(ctx.config.sweep.interval_secs).max(1);
            watch(Arc::new(trigger), Duration::from_secs(secs))?;
        }
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    println!(
        "Scope {}: {} card(s) considered, {} group(s) merged, {} card(s) moved",
        result.scope_id, result.total_cards_considered, result.groups_merged, result.cards_merged
    );
    for line in result.audit_trail() {
        println!("  {line}");
    }
}

fn print_report(report: &SweepReport) {
    println!(
        "Swept {} scope(s): {} group(s) merged, {} card(s) moved, {} failed",
        report.scopes.len(),
        report.groups_merged(),
        report.cards_merged(),
        report.failures()
    );
    if report.cancelled {
        println!("Cancelled; not visited: {}", report.not_visited.join(", "));
    }
}

fn watch(trigger: Arc<SyncTrigger>, every: Duration) -> CliResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let cancel = CancelToken::new();
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "watching; Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => break,
            }

            let worker = Arc::clone(&trigger);
            let token = cancel.clone();
            let mut sweep =
                tokio::task::spawn_blocking(move || worker.sweep_all(Utc::now(), &token));
            let finished = tokio::select! {
                joined = &mut sweep => Some(joined),
                _ = tokio::signal::ctrl_c() => None,
            };
            let joined = match finished {
                Some(joined) => joined,
                None => {
                    info!("interrupt received, stopping after the current scope");
                    cancel.cancel();
                    sweep.await
                }
            };

            match joined? {
                Ok(report) => print_report(&report),
                Err(err) => warn!(error = %err, "sweep failed"),
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
