//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::monorepo::filter::{FilterSpec, WorkspaceFilter};

use super::types::{
    list_of, CacheSpec, Config, ExecutorConfig, ExecutorKind, RunnerConfig, RunnerType,
    WorkspaceConfig,
};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    if config.concurrency == Some(0) {
        return Err(invalid("concurrency", "must be greater than 0"));
    }

    WorkspaceFilter::from_config(config.include.as_ref(), config.exclude.as_ref())?;
    validate_runner("runner_defaults", &config.runner_defaults)?;

    for (script, runner) in &config.runners {
        validate_runner(&format!("runners.{}", script), runner)?;
    }

    debug!("configuration validation passed");
    Ok(())
}

/// Validate a per-workspace configuration
pub fn validate_workspace_config(config: &WorkspaceConfig) -> Result<()> {
    for (script, executor) in &config.executors {
        validate_executor(&format!("executors.{}", script), executor)?;
    }
    if let Some(cache) = &config.executor_defaults.cache {
        validate_cache("executor_defaults.cache", cache)?;
    }
    Ok(())
}

fn validate_runner(field: &str, runner: &RunnerConfig) -> Result<()> {
    if runner.limit == Some(0) {
        return Err(invalid(&format!("{}.limit", field), "must be greater than 0"));
    }

    if runner.extends.as_deref() == Some("") {
        return Err(invalid(&format!("{}.extends", field), "cannot be empty"));
    }

    WorkspaceFilter::from_config(runner.include.as_ref(), runner.exclude.as_ref())?;

    for rule in list_of(&runner.pattern_script) {
        FilterSpec::from_parts(
            rule.scope.as_deref(),
            rule.match_kind.as_deref(),
            &rule.pattern,
        )?;
    }

    if runner.kind == Some(RunnerType::Multi) && runner.runners.is_empty() {
        return Err(invalid(
            &format!("{}.runners", field),
            "a multi runner needs at least one child runner",
        ));
    }

    for (i, child) in runner.runners.iter().enumerate() {
        validate_runner(&format!("{}.runners[{}]", field, i), child)?;
    }

    if let Some(executor) = &runner.executor {
        validate_executor(&format!("{}.executor", field), executor)?;
    }

    if let Some(cache) = &runner.cache {
        validate_cache(&format!("{}.cache", field), cache)?;
    }

    Ok(())
}

fn validate_executor(field: &str, executor: &ExecutorConfig) -> Result<()> {
    match &executor.kind {
        ExecutorKind::Command { command, .. } if command.trim().is_empty() => {
            return Err(invalid(&format!("{}.command", field), "cannot be empty"));
        }
        ExecutorKind::Node { file } if file.trim().is_empty() => {
            return Err(invalid(&format!("{}.file", field), "cannot be empty"));
        }
        ExecutorKind::Multi { executors, .. } => {
            if executors.is_empty() {
                return Err(invalid(
                    &format!("{}.executors", field),
                    "a multi executor needs at least one child executor",
                ));
            }
            for (i, child) in executors.iter().enumerate() {
                validate_executor(&format!("{}.executors[{}]", field, i), child)?;
            }
        }
        _ => {}
    }

    if let Some(cache) = &executor.cache {
        validate_cache(&format!("{}.cache", field), cache)?;
    }

    Ok(())
}

fn validate_cache(field: &str, cache: &CacheSpec) -> Result<()> {
    match cache {
        CacheSpec::File { include, .. } if include.is_empty() => Err(invalid(
            &format!("{}.include", field),
            "a file cache needs at least one include pattern",
        )),
        CacheSpec::Multi { caches } => {
            for (i, child) in caches.iter().enumerate() {
                validate_cache(&format!("{}.caches[{}]", field, i), child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn invalid(field: &str, message: &str) -> crate::error::TrellisError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterEntry, FilterSpecConfig, OneOrMany, PatternScriptConfig};

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_limit() {
        let mut config = Config::default();
        config.runners.insert(
            "build".to_string(),
            RunnerConfig {
                limit: Some(0),
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_unknown_match_type() {
        let mut config = Config::default();
        config.runners.insert(
            "build".to_string(),
            RunnerConfig::pipeline().with_pattern_script(PatternScriptConfig {
                scope: None,
                match_kind: Some("path".to_string()),
                pattern: "pkg".to_string(),
                script: None,
            }),
        );
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            crate::error::TrellisError::Config(ConfigError::UnknownMatchType(_))
        ));
    }

    #[test]
    fn test_validate_unknown_filter_type() {
        let mut config = Config::default();
        config.include = Some(OneOrMany::One(FilterEntry::Spec(FilterSpecConfig {
            scope: Some("everything".to_string()),
            match_kind: None,
            pattern: "*".to_string(),
        })));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_multi_runner() {
        let mut config = Config::default();
        config
            .runners
            .insert("ci".to_string(), RunnerConfig::of(RunnerType::Multi));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_cache_without_include() {
        let mut config = Config::default();
        config.runners.insert(
            "build".to_string(),
            RunnerConfig {
                cache: Some(CacheSpec::File {
                    include: vec![],
                    exclude: vec![],
                }),
                ..Default::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }
}
