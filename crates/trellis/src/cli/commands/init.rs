//! Init command

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use dialoguer::{Confirm, Select};
use tracing::info;

use trellis_core::config::{Config, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML, DEFAULT_CONFIG_YAML};
use trellis_core::monorepo::RootDetectorRegistry;

use crate::cli::Cli;

/// Write a starter trellis.yaml
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Use defaults without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, yes = self.yes, "executing init command");
        let cwd = std::env::current_dir()?;

        // Prefer the monorepo root over a nested working directory
        let dir = RootDetectorRegistry::new()
            .find_root(&cwd)
            .map(|layout| layout.root)
            .unwrap_or_else(|_| cwd.clone());

        let format = if self.yes || self.output.is_some() {
            "yaml"
        } else {
            let formats = ["yaml", "toml"];
            let selection = Select::new()
                .with_prompt("Configuration format")
                .items(&formats)
                .default(0)
                .interact()?;
            formats[selection]
        };

        let config_path = self.output.clone().unwrap_or_else(|| {
            dir.join(if format == "toml" {
                DEFAULT_CONFIG_TOML
            } else {
                DEFAULT_CONFIG_YAML
            })
        });

        if config_path.exists() && !self.force {
            if self.yes {
                anyhow::bail!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                );
            }

            let overwrite = Confirm::new()
                .with_prompt(format!(
                    "Configuration file already exists at {}. Overwrite?",
                    config_path.display()
                ))
                .default(false)
                .interact()?;

            if !overwrite {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        write_config(&config_path)?;

        if !cli.quiet {
            println!(
                "{} Created configuration at {}",
                style("✓").green().bold(),
                style(config_path.display()).cyan()
            );
            println!();
            println!("Next steps:");
            println!("  1. Edit {} to describe your runners", config_path.display());
            println!("  2. Run {} to check workspace discovery", style("trellis list").cyan());
            println!("  3. Run {} to build everything", style("trellis run build").cyan());
        }

        Ok(())
    }
}

/// Write the starter configuration, as TOML when the path asks for it
fn write_config(path: &Path) -> anyhow::Result<()> {
    let content = if path.extension().is_some_and(|e| e == "toml") {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE)?;
        toml::to_string_pretty(&config)?
    } else {
        DEFAULT_CONFIG_TEMPLATE.to_string()
    };

    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_yaml_config_loads() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_YAML);
        write_config(&path).unwrap();

        let config = trellis_core::config::load_config(&path).unwrap();
        assert!(config.runners.contains_key("build"));
        assert!(config.cache.enabled);
    }
}
