//! Configuration loading

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::{config_file_names, workspace_config_file_names};
use super::types::{Config, WorkspaceConfig};
use super::validation::{validate_config, validate_workspace_config};

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let parsed = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };
    Ok(parsed)
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = parse_file(path)?;
    validate_config(&config)?;
    debug!(path = %path.display(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Find the configuration file directly inside `dir` (no parent search)
pub fn config_in_dir(dir: &Path) -> Option<PathBuf> {
    config_file_names()
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

/// Load configuration or use defaults.
///
/// Only a missing file falls back to defaults; a file that exists but does
/// not parse or validate is an error.
pub fn load_config_or_default(dir: &Path) -> Result<(Config, Option<PathBuf>)> {
    match config_in_dir(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            warn!(dir = %dir.display(), "no config found, using defaults");
            Ok((Config::default(), None))
        }
    }
}

/// Load the per-workspace configuration of `dir`, if it has one
pub fn load_workspace_config(dir: &Path) -> Result<Option<WorkspaceConfig>> {
    let Some(path) = workspace_config_file_names()
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
    else {
        return Ok(None);
    };

    let config: WorkspaceConfig = parse_file(&path)?;
    validate_workspace_config(&config)?;
    Ok(Some(config))
}
