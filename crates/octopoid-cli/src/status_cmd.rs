//! `octopoid status`: orchestrator presence and per-blueprint state.

use std::path::Path;

use anyhow::Result;

use octopoid_core::client::ApiClient;
use octopoid_core::config::OrchestratorConfig;
use octopoid_core::fleet::FleetConfig;
use octopoid_core::layout::ProjectLayout;
use octopoid_core::pool_tracker::PoolTracker;
use octopoid_core::scheduler::state::BlueprintState;

use crate::tick_cmd::resolve_root;

pub async fn run_status(dir: Option<&Path>) -> Result<()> {
    let root = resolve_root(dir)?;
    let layout = ProjectLayout::new(&root);

    let config = OrchestratorConfig::load(&layout.config_path())?;
    let fleet = FleetConfig::load(&layout.fleet_path(&config.fleet))?;
    let client = ApiClient::new(config.server_url.clone());

    println!("Orchestrator: {}", config.orchestrator_id());
    println!("Server:       {}", config.server_url);
    println!();

    match client.poll(&config.orchestrator_id()).await {
        Ok(snapshot) => {
            println!(
                "Registered: {}  claimed: {}  open PRs: {}  provisional: {}",
                if snapshot.orchestrator_registered { "yes" } else { "no" },
                snapshot.claimed_total,
                snapshot.open_prs,
                snapshot.provisional.len()
            );
            for count in &snapshot.queue_counts {
                println!("  {:<12} {:<12} {}", count.queue, count.role, count.count);
            }
        }
        Err(e) => {
            println!("Server unreachable: {e}");
        }
    }

    println!();
    println!("Blueprints:");
    for blueprint in &fleet.blueprints {
        let state = BlueprintState::load(&layout.blueprint_state_path(&blueprint.name));
        let tracker = PoolTracker::load(&layout.blueprint_pids_path(&blueprint.name))?;

        let last_spawn = state
            .last_spawn_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} ({}, role {}): {}/{} instances, last spawn {}",
            blueprint.name,
            blueprint.kind,
            blueprint.role,
            tracker.len(),
            blueprint.max_instances,
            last_spawn
        );
        if let Some(block) = &state.last_block {
            println!("    last block: {} ({}) at {}", block.guard, block.reason, block.at);
        }
        if let Some(error) = &state.last_error {
            println!("    last error: {} at {}", error.message, error.at);
        }
        for (instance, entry) in tracker.iter() {
            println!(
                "    {} pid {} task {}",
                instance,
                entry.pid,
                entry.task_id.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
