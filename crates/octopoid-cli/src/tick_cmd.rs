//! `octopoid tick`: run one scheduler tick.

use std::path::Path;

use anyhow::{Context, Result};

use octopoid_core::config::OrchestratorConfig;
use octopoid_core::fleet::FleetConfig;
use octopoid_core::layout::ProjectLayout;
use octopoid_core::scheduler::{BlueprintOutcome, Scheduler, TickOptions, TickOutcome};

pub(crate) fn resolve_root(dir: Option<&Path>) -> Result<std::path::PathBuf> {
    match dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => std::env::current_dir().context("failed to resolve current directory"),
    }
}

pub async fn run_tick(dir: Option<&Path>) -> Result<()> {
    let root = resolve_root(dir)?;
    let layout = ProjectLayout::new(&root);

    let config = OrchestratorConfig::load(&layout.config_path())?;
    let fleet = FleetConfig::load(&layout.fleet_path(&config.fleet))?;

    let scheduler = Scheduler::new(layout, config, fleet, TickOptions::default());

    match scheduler.run_tick().await? {
        TickOutcome::LockHeld => {
            println!("Tick skipped: another tick holds the scheduler lock.");
        }
        TickOutcome::Completed(report) => {
            for job in &report.jobs {
                match &job.error {
                    None => println!("housekeeping {}: ok", job.job),
                    Some(error) => println!("housekeeping {}: FAILED ({error})", job.job),
                }
            }
            for (name, outcome) in &report.blueprints {
                match outcome {
                    BlueprintOutcome::Spawned { instance, task_id } => {
                        println!(
                            "{name}: spawned {instance}{}",
                            task_id
                                .as_deref()
                                .map(|t| format!(" on {t}"))
                                .unwrap_or_default()
                        );
                    }
                    BlueprintOutcome::Blocked { guard, reason } => {
                        println!("{name}: blocked by {guard} ({reason})");
                    }
                    BlueprintOutcome::LockHeld => {
                        println!("{name}: skipped (blueprint lock held)");
                    }
                    BlueprintOutcome::Failed { error } => {
                        println!("{name}: FAILED ({error})");
                    }
                }
            }
        }
    }

    Ok(())
}
