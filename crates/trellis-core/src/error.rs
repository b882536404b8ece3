//! Error types for Trellis

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using TrellisError
pub type Result<T> = std::result::Result<T, TrellisError>;

/// Main error type for Trellis operations
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Monorepo discovery errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// A filter used a `match` kind that is not recognised
    #[error("Unknown match type '{0}' (expected one of: name, directory, location)")]
    UnknownMatchType(String),

    /// A filter used a `type` scope that is not recognised
    #[error("Unknown filter type '{0}' (expected one of: all, monorepo, workspace)")]
    UnknownFilterType(String),

    /// A glob or regular expression failed to compile
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A runner referenced through `extends` does not exist
    #[error("Runner '{0}' not found")]
    RunnerNotFound(String),

    /// Runners extend each other in a loop
    #[error("Runner extends cycle: {}", .0.join(" -> "))]
    ExtendsCycle(Vec<String>),

    /// Nothing is able to execute a script in a workspace
    #[error("No executor found for '{script}' in workspace '{workspace}'")]
    NoExecutor { workspace: String, script: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Monorepo discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No monorepo root above the given directory
    #[error("No monorepo root found above {0}")]
    RootNotFound(PathBuf),

    /// A workspace manifest could not be read
    #[error("Invalid manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    /// Two workspaces share a name
    #[error("Duplicate workspace name '{name}' at {first} and {second}")]
    DuplicateWorkspace {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Workspace glob pattern is malformed
    #[error("Invalid workspace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// `packageManager` names a tool other than npm, yarn or pnpm
    #[error("Unknown package manager: {0}")]
    UnknownPackageManager(String),
}

impl TrellisError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error stems from configuration rather than runtime state
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Toml(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extends_cycle_message() {
        let err = ConfigError::ExtendsCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Runner extends cycle: a -> b -> a");
    }

    #[test]
    fn test_config_error_is_config() {
        let err: TrellisError = ConfigError::UnknownMatchType("path".into()).into();
        assert!(err.is_config());
        assert!(!TrellisError::other("boom").is_config());
    }
}
