//! Cache management command

use clap::{Args, Subcommand};
use console::style;
use tracing::info;

use trellis_core::Monorepo;
use trellis_tasks::CacheStore;

use crate::cli::{Cli, OutputFormat};

/// Fingerprint cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Forget stored fingerprints
    Clean(CacheCleanCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Forget stored fingerprints
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Only forget the fingerprints of this workspace
    #[arg(long)]
    pub workspace: Option<String>,

    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let monorepo = Monorepo::load(&cwd)?;
        let store = CacheStore::new(monorepo.cache_file());

        let runtime = tokio::runtime::Runtime::new()?;
        match &self.action {
            CacheAction::Status(cmd) => runtime.block_on(cmd.execute(cli, &store)),
            CacheAction::Clean(cmd) => runtime.block_on(cmd.execute(cli, &monorepo, &store)),
        }
    }
}

impl CacheStatusCommand {
    async fn execute(&self, cli: &Cli, store: &CacheStore) -> anyhow::Result<()> {
        info!("executing cache status command");
        let stats = store.status().await?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "workspaces": stats.workspaces,
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_file": store.path().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", style("Task Cache Status").bold());
            println!();
            println!("  Location:   {}", style(store.path().display()).cyan());
            println!("  Workspaces: {}", stats.workspaces);
            println!("  Entries:    {}", stats.entries);
            println!("  Size:       {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    async fn execute(&self, cli: &Cli, monorepo: &Monorepo, store: &CacheStore) -> anyhow::Result<()> {
        info!(workspace = ?self.workspace, "executing cache clean command");

        if let Some(name) = &self.workspace {
            if monorepo.find(name).is_none() {
                anyhow::bail!("Unknown workspace '{}'", name);
            }
        }

        if !store.path().exists() {
            if !cli.quiet {
                println!("{} Cache is empty.", style("✓").green());
            }
            return Ok(());
        }

        if !self.yes {
            let target = match &self.workspace {
                Some(name) => format!("stored fingerprints of '{}'", name),
                None => "all stored fingerprints".to_string(),
            };
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!("Remove {} at {}?", target, store.path().display()))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = store.clean(self.workspace.as_deref()).await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "removed": removed }))?);
        } else if !cli.quiet {
            println!(
                "{} Removed {} fingerprint{} from {}",
                style("✓").green(),
                removed,
                if removed == 1 { "" } else { "s" },
                style(store.path().display()).cyan()
            );
        }

        Ok(())
    }
}
