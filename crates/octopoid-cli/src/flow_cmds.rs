//! `octopoid flow`: register local flow documents with the server.

use std::path::Path;

use anyhow::{Context, Result};

use octopoid_core::client::ApiClient;
use octopoid_core::config::OrchestratorConfig;
use octopoid_core::flow::FlowDocument;
use octopoid_core::layout::ProjectLayout;

use crate::tick_cmd::resolve_root;

pub async fn run_register(dir: Option<&Path>) -> Result<()> {
    let root = resolve_root(dir)?;
    let layout = ProjectLayout::new(&root);
    let config = OrchestratorConfig::load(&layout.config_path())?;
    let client = ApiClient::new(config.server_url.clone());

    let flows_dir = layout.flows_dir();
    let mut registered = 0;
    for entry in std::fs::read_dir(&flows_dir)
        .with_context(|| format!("failed to read {}", flows_dir.display()))?
    {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }

        let flow = FlowDocument::load(&path)?;
        client
            .put_flow(&flow.name, &flow.cluster, &flow.states, &flow.transitions)
            .await
            .with_context(|| format!("failed to register flow {:?}", flow.name))?;
        println!("Registered flow {} ({} states)", flow.name, flow.states.len());
        registered += 1;
    }

    if registered == 0 {
        println!("No flow documents found under {}.", flows_dir.display());
    }
    Ok(())
}

pub async fn run_list(dir: Option<&Path>) -> Result<()> {
    let root = resolve_root(dir)?;
    let layout = ProjectLayout::new(&root);
    let config = OrchestratorConfig::load(&layout.config_path())?;
    let client = ApiClient::new(config.server_url.clone());

    let flows = client.list_flows().await?;
    if flows.is_empty() {
        println!("No flows registered.");
        return Ok(());
    }

    for flow in &flows {
        println!(
            "{} (cluster {}): states [{}], {} transitions",
            flow.name,
            flow.cluster,
            flow.states.join(", "),
            flow.transitions.len()
        );
    }
    Ok(())
}
