//! Runner registry
//!
//! Runners are configured per script name and layered in this order, own
//! fields first: the runner itself, the runner it `extends` (recursively),
//! the parent runner when `inherit` is set, and finally `runner_defaults`.
//! The defaults never set the runner type. Everything is resolved before
//! scheduling starts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use trellis_core::config::{list_of, CacheSpec, Config, ExecutorConfig, RunnerConfig, RunnerType};
use trellis_core::monorepo::{FilterSpec, WorkspaceFilter};
use trellis_core::ConfigError;

/// Execution policy of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Whether tasks of this runner may run alongside neighbouring
    /// parallel tasks of the same batch
    pub parallel: bool,
    pub restart_on_error: bool,
    /// Extra attempts after the first failure; zero unless
    /// `restart_on_error`
    pub restart_retries: u32,
    /// Abort the whole run once a task finally fails
    pub throw_on_error: bool,
}

impl RunnerSettings {
    fn from_config(config: &RunnerConfig, kind: RunnerType) -> Self {
        // many and pipeline runners run in parallel and fail loudly unless
        // told otherwise; multi runners are sequential and lenient
        let eager = kind != RunnerType::Multi;
        let restart_on_error = config.restart_on_error.unwrap_or(false);

        Self {
            parallel: config.parallel.unwrap_or(eager),
            restart_on_error,
            restart_retries: if restart_on_error {
                config.restart_retries.unwrap_or(1)
            } else {
                0
            },
            throw_on_error: config.throw_on_error.unwrap_or(eager),
        }
    }

    /// Total attempts a task gets
    pub fn max_attempts(&self) -> u32 {
        1 + self.restart_retries
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default(), RunnerType::Many)
    }
}

/// Run `script` first in every workspace matching `filter`
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub filter: FilterSpec,
    pub script: String,
}

/// Prerequisites declared by a pipeline runner
#[derive(Debug, Clone, Default)]
pub struct PipelineRule {
    /// Scripts run first in the same workspace
    pub self_scripts: Vec<String>,
    /// Scripts run first in every workspace this one depends on
    pub dependency_scripts: Vec<String>,
    /// Scripts run first in pattern-matched workspaces
    pub pattern_scripts: Vec<PatternRule>,
}

impl PipelineRule {
    fn from_config(script: &str, config: &RunnerConfig) -> Result<Self, ConfigError> {
        let pattern_scripts = list_of(&config.pattern_script)
            .iter()
            .map(|rule| {
                Ok(PatternRule {
                    filter: FilterSpec::from_parts(
                        rule.scope.as_deref(),
                        rule.match_kind.as_deref(),
                        &rule.pattern,
                    )?,
                    script: rule.script.clone().unwrap_or_else(|| script.to_string()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            self_scripts: list_of(&config.self_script),
            dependency_scripts: list_of(&config.dependency_script),
            pattern_scripts,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.self_scripts.is_empty()
            && self.dependency_scripts.is_empty()
            && self.pattern_scripts.is_empty()
    }

    /// Every script this rule makes a prerequisite, in declaration order
    pub fn referenced_scripts(&self) -> Vec<&str> {
        self.self_scripts
            .iter()
            .chain(&self.dependency_scripts)
            .map(String::as_str)
            .chain(self.pattern_scripts.iter().map(|p| p.script.as_str()))
            .collect()
    }
}

/// Runner family with its resolved payload
#[derive(Debug, Clone)]
pub enum RunnerKind {
    /// Run the script in every selected workspace, at most `limit` at once
    Many { limit: Option<usize> },
    /// Build a task graph from the rule and run it in waves
    Pipeline { rule: PipelineRule },
    /// Run child runners
    Multi { children: Vec<Arc<ResolvedRunner>> },
}

impl RunnerKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Many { .. } => "many",
            Self::Pipeline { .. } => "pipeline",
            Self::Multi { .. } => "multi",
        }
    }
}

/// A runner with every reference resolved
#[derive(Debug, Clone)]
pub struct ResolvedRunner {
    /// Script the runner was resolved for
    pub script: String,
    pub kind: RunnerKind,
    pub settings: RunnerSettings,
    /// Parent env overlaid with this runner's env
    pub env: BTreeMap<String, String>,
    /// Own cache first, then the parent chain's
    pub caches: Vec<CacheSpec>,
    /// Executor used where the workspace does not configure one
    pub executor: Option<ExecutorConfig>,
    /// Own filter first, then the parent chain's
    pub filters: Vec<WorkspaceFilter>,
    config: RunnerConfig,
}

impl ResolvedRunner {
    /// The merged configuration this runner was built from
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Pipeline rule, if this is a pipeline runner
    pub fn rule(&self) -> Option<&PipelineRule> {
        match &self.kind {
            RunnerKind::Pipeline { rule } => Some(rule),
            _ => None,
        }
    }

    /// Fields a child with `inherit` may pick up. Env and caches are
    /// excluded since they already chain through the parent.
    fn inheritable(&self) -> RunnerConfig {
        RunnerConfig {
            kind: None,
            extends: None,
            env: BTreeMap::new(),
            cache: None,
            runners: Vec::new(),
            ..self.config.clone()
        }
    }
}

impl fmt::Display for ResolvedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.script, self.kind.name())
    }
}

/// Name to runner lookup over the root configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerRegistry {
    runners: BTreeMap<String, RunnerConfig>,
    defaults: RunnerConfig,
}

impl RunnerRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            runners: config.runners.clone(),
            defaults: RunnerConfig {
                kind: None,
                extends: None,
                runners: Vec::new(),
                ..config.runner_defaults.clone()
            },
        }
    }

    /// Resolve the runner for `script`. Unconfigured scripts get a default
    /// `many` runner.
    #[instrument(skip(self, parent), fields(parent = parent.map(|p| p.script.as_str())))]
    pub fn resolve(
        &self,
        script: &str,
        parent: Option<&ResolvedRunner>,
    ) -> Result<ResolvedRunner, ConfigError> {
        let config = self.runners.get(script).cloned().unwrap_or_default();
        self.resolve_config(script, &config, parent)
    }

    /// Resolve every configured runner, surfacing configuration errors
    pub fn resolve_all(&self) -> Result<Vec<ResolvedRunner>, ConfigError> {
        self.runners
            .keys()
            .map(|script| self.resolve(script, None))
            .collect()
    }

    fn resolve_config(
        &self,
        script: &str,
        config: &RunnerConfig,
        parent: Option<&ResolvedRunner>,
    ) -> Result<ResolvedRunner, ConfigError> {
        let mut chain = vec![script.to_string()];
        let mut merged = self.flatten(config, &mut chain)?;

        if merged.inherit {
            if let Some(parent) = parent {
                merged = merged.merged_over(&parent.inheritable());
            }
        }
        let merged = merged.merged_over(&self.defaults);

        let kind = merged.kind.unwrap_or_default();
        let settings = RunnerSettings::from_config(&merged, kind);

        let mut env = parent.map(|p| p.env.clone()).unwrap_or_default();
        for (key, value) in &merged.env {
            env.insert(key.clone(), value.to_string());
        }

        let mut caches: Vec<CacheSpec> = merged.cache.iter().cloned().collect();
        let mut filters = vec![WorkspaceFilter::from_config(
            merged.include.as_ref(),
            merged.exclude.as_ref(),
        )?];
        if let Some(parent) = parent {
            caches.extend(parent.caches.iter().cloned());
            filters.extend(parent.filters.iter().cloned());
        }

        let mut runner = ResolvedRunner {
            script: script.to_string(),
            kind: RunnerKind::Many { limit: None },
            settings,
            env,
            caches,
            executor: merged.executor.clone(),
            filters,
            config: merged,
        };

        let resolved_kind = match kind {
            RunnerType::Many => RunnerKind::Many {
                limit: runner.config.limit,
            },
            RunnerType::Pipeline => RunnerKind::Pipeline {
                rule: PipelineRule::from_config(script, &runner.config)?,
            },
            RunnerType::Multi => {
                if runner.config.runners.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("runners.{}.runners", script),
                        message: "multi runner needs at least one child runner".to_string(),
                    });
                }
                let children = runner
                    .config
                    .runners
                    .iter()
                    .map(|child| self.resolve_config(script, child, Some(&runner)).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?;
                RunnerKind::Multi { children }
            }
        };
        runner.kind = resolved_kind;

        debug!(runner = %runner, "resolved runner");
        Ok(runner)
    }

    /// Follow `extends` until a runner without one, merging on the way
    fn flatten(
        &self,
        config: &RunnerConfig,
        chain: &mut Vec<String>,
    ) -> Result<RunnerConfig, ConfigError> {
        let Some(target) = config.extends.as_deref() else {
            return Ok(config.clone());
        };

        if chain.iter().any(|name| name == target) {
            chain.push(target.to_string());
            return Err(ConfigError::ExtendsCycle(chain.clone()));
        }

        let base = self
            .runners
            .get(target)
            .ok_or_else(|| ConfigError::RunnerNotFound(target.to_string()))?;
        chain.push(target.to_string());

        let base = self.flatten(base, chain)?;
        let mut merged = config.merged_over(&base);
        merged.inherit = config.inherit || base.inherit;
        Ok(merged)
    }
}
