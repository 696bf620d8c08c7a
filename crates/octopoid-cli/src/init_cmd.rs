//! `octopoid init`: scaffold the `.octopoid/` directory for a project.

use anyhow::{bail, Context, Result};

use octopoid_core::flow::FlowDocument;
use octopoid_core::layout::ProjectLayout;

const AGENTS_YAML: &str = r#"# Fleet definition: one entry per agent blueprint, evaluated in order.
blueprints:
  - name: implementer
    type: implementer
    role: implement
    command: ["claude", "-p", "--dangerously-skip-permissions"]
    max_instances: 2
    interval_seconds: 60
"#;

const PROMPT_MD: &str = "# Task {{task_id}}: {{title}}\n\n{{content}}\n\n{{instructions}}\n";

const INSTRUCTIONS_MD: &str = "\
Work only inside your worktree. Commit as you go. When you are finished,
write `{\"outcome\": \"done\", \"commits_count\": N, \"turns_used\": N}` to
`../result.json` and exit.
";

const RUN_TESTS: &str = "#!/bin/sh\nset -e\necho \"no test command configured\"\n";

const GITIGNORE_ENTRIES: &str = ".octopoid/runtime/\n.octopoid/logs/\n";

/// Execute `octopoid init` in the current directory.
pub fn run_init(
    server_url: &str,
    cluster: &str,
    machine_id: Option<&str>,
    force: bool,
) -> Result<()> {
    let root = std::env::current_dir().context("failed to resolve current directory")?;
    let layout = ProjectLayout::new(&root);

    let config_path = layout.config_path();
    if config_path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let machine_id = match machine_id {
        Some(id) => id.to_string(),
        None => hostname()?,
    };

    std::fs::create_dir_all(layout.dot_dir()).context("failed to create .octopoid")?;

    let config = format!(
        "server_url: {server_url}\ncluster: {cluster}\nmachine_id: {machine_id}\nbase_branch: main\n"
    );
    std::fs::write(&config_path, config).context("failed to write config.yaml")?;

    let fleet_path = layout.fleet_path("agents.yaml");
    if !fleet_path.exists() {
        std::fs::write(&fleet_path, AGENTS_YAML).context("failed to write agents.yaml")?;
    }

    // Default flow document.
    std::fs::create_dir_all(layout.flows_dir()).context("failed to create flows dir")?;
    let default_flow = layout.flows_dir().join("default.yaml");
    if !default_flow.exists() {
        let contents = serde_yaml::to_string(&FlowDocument::default_flow())
            .context("failed to serialize default flow")?;
        std::fs::write(&default_flow, contents).context("failed to write default flow")?;
    }

    // Implementer blueprint templates.
    let template_dir = layout.agent_template_dir("implementer");
    std::fs::create_dir_all(template_dir.join("scripts"))
        .context("failed to create blueprint template dir")?;
    for (name, contents) in [
        ("prompt.md", PROMPT_MD),
        ("instructions.md", INSTRUCTIONS_MD),
    ] {
        let path = template_dir.join(name);
        if !path.exists() {
            std::fs::write(&path, contents)
                .with_context(|| format!("failed to write {name}"))?;
        }
    }
    let run_tests = template_dir.join("scripts").join("run-tests");
    if !run_tests.exists() {
        std::fs::write(&run_tests, RUN_TESTS).context("failed to write run-tests")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&run_tests, std::fs::Permissions::from_mode(0o755))
                .context("failed to mark run-tests executable")?;
        }
    }

    std::fs::create_dir_all(layout.tasks_dir()).context("failed to create tasks dir")?;
    layout.ensure_runtime_dirs()?;
    append_gitignore(&root)?;

    println!("Initialized .octopoid/ for cluster {cluster} (machine {machine_id}).");
    println!("  server_url = {server_url}");
    println!();
    println!("Next: run `octopoid flow register` and add task descriptions under .octopoid/tasks/.");
    Ok(())
}

fn hostname() -> Result<String> {
    let output = std::process::Command::new("hostname")
        .output()
        .context("failed to run hostname")?;
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        bail!("hostname returned nothing; pass --machine-id");
    }
    Ok(name)
}

/// Add the runtime/log exclusions to .gitignore, once.
fn append_gitignore(root: &std::path::Path) -> Result<()> {
    let path = root.join(".gitignore");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    if existing.contains(".octopoid/runtime/") {
        return Ok(());
    }

    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(GITIGNORE_ENTRIES);
    std::fs::write(&path, contents).context("failed to update .gitignore")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gitignore_append_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "target/\n").unwrap();

        append_gitignore(tmp.path()).unwrap();
        append_gitignore(tmp.path()).unwrap();

        let contents = std::fs::read_to_string(tmp.path().join(".gitignore")).unwrap();
        assert_eq!(contents, "target/\n.octopoid/runtime/\n.octopoid/logs/\n");
    }
}
