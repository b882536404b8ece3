//! List command

use clap::Args;
use console::style;
use tracing::info;

use trellis_core::{Monorepo, Workspace};

use crate::cli::output::{header, key_value, path_style};
use crate::cli::{Cli, OutputFormat};

/// List workspaces with their dependencies and scripts
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Include the root package
    #[arg(long)]
    pub all: bool,
}

impl ListCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(all = self.all, "executing list command");
        let cwd = std::env::current_dir()?;
        let monorepo = Monorepo::load(&cwd)?;

        let workspaces: Vec<&Workspace> = monorepo
            .workspaces()
            .iter()
            .filter(|w| self.all || !w.is_root())
            .collect();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "root": monorepo.root().display().to_string(),
                    "package_manager": monorepo.package_manager().to_string(),
                    "workspaces": workspaces.iter().map(|w| workspace_json(&monorepo, w)).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    for ws in &workspaces {
                        println!("{}", ws.name);
                    }
                    return Ok(());
                }

                println!(
                    "{} ({} workspace{}, {})",
                    header(&monorepo.root().display().to_string()),
                    workspaces.len(),
                    if workspaces.len() == 1 { "" } else { "s" },
                    monorepo.package_manager()
                );
                for ws in &workspaces {
                    println!();
                    println!(
                        "{} {}",
                        style(&ws.name).bold(),
                        path_style().apply_to(ws.relative_path().display())
                    );
                    let deps = internal_dependencies(&monorepo, ws);
                    if !deps.is_empty() {
                        println!("{}", key_value("depends on", &deps.join(", ")));
                    }
                    if cli.verbose {
                        let scripts: Vec<&str> = ws.scripts.iter().map(String::as_str).collect();
                        println!("{}", key_value("scripts", &scripts.join(", ")));
                        let executors: Vec<&str> =
                            ws.config.executors.keys().map(String::as_str).collect();
                        if !executors.is_empty() {
                            println!("{}", key_value("executors", &executors.join(", ")));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Names of the workspaces of this monorepo that `workspace` depends on
fn internal_dependencies(monorepo: &Monorepo, workspace: &Workspace) -> Vec<String> {
    monorepo
        .dependencies_of(workspace)
        .into_iter()
        .map(|dep| dep.name.clone())
        .collect()
}

fn workspace_json(monorepo: &Monorepo, workspace: &Workspace) -> serde_json::Value {
    serde_json::json!({
        "name": workspace.name,
        "path": workspace.relative_path().display().to_string(),
        "root": workspace.is_root(),
        "package_manager": monorepo.package_manager_for(workspace).to_string(),
        "dependencies": internal_dependencies(monorepo, workspace),
        "scripts": workspace.scripts.iter().collect::<Vec<_>>(),
        "executors": workspace.config.executors.keys().collect::<Vec<_>>(),
    })
}
