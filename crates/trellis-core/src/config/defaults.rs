//! Default configuration values

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "trellis.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "trellis.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".trellis.yaml";

/// Per-workspace configuration file name (YAML)
pub const WORKSPACE_CONFIG_YAML: &str = "trellis-workspace.yaml";

/// Per-workspace configuration file name (TOML)
pub const WORKSPACE_CONFIG_TOML: &str = "trellis-workspace.toml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".trellis.toml",
    ]
}

/// Get list of per-workspace config file names
pub fn workspace_config_file_names() -> Vec<&'static str> {
    vec![WORKSPACE_CONFIG_YAML, WORKSPACE_CONFIG_TOML]
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Trellis Configuration

cache:
  enabled: true
  dir: .trellis

runners:
  build:
    type: pipeline
    dependency_script: build
    cache:
      type: file
      include: ["src/**", "package.json"]
  test:
    type: pipeline
    self_script: build
    parallel: true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate_config, Config, RunnerType};

    #[test]
    fn test_template_parses_and_validates() {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.runners["build"].kind, Some(RunnerType::Pipeline));
    }
}
