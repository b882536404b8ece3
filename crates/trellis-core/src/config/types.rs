//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A value that may be written either as a scalar or as a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value
    One(T),
    /// A list of values
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Flatten into a vector, preserving declaration order
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

/// Flatten an optional scalar-or-list field
pub fn list_of<T: Clone>(value: &Option<OneOrMany<T>>) -> Vec<T> {
    value.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
}

/// Environment variable value; numbers and booleans are stringified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Environment map as written in configuration
pub type EnvConfig = BTreeMap<String, EnvValue>;

/// Main configuration for a Trellis monorepo
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project name
    pub name: Option<String>,

    /// Environment variables passed to every task
    pub env: EnvConfig,

    /// Workspaces every run is restricted to
    pub include: Option<OneOrMany<FilterEntry>>,

    /// Workspaces every run skips
    pub exclude: Option<OneOrMany<FilterEntry>>,

    /// Maximum number of tasks running at once (defaults to CPU count)
    pub concurrency: Option<usize>,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Settings merged under every runner
    pub runner_defaults: RunnerConfig,

    /// Runner per script name
    pub runners: BTreeMap<String, RunnerConfig>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Directory (relative to the monorepo root) holding the cache store
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".trellis"),
        }
    }
}

/// One entry of an `include`/`exclude` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterEntry {
    /// Bare pattern, matched against the workspace name
    Pattern(String),
    /// Fully specified filter
    Spec(FilterSpecConfig),
}

/// Filter as written in configuration; `type` and `match` are validated
/// when the filter is compiled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpecConfig {
    /// Scope: all, monorepo or workspace
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// What the pattern is matched against: name, directory or location
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<String>,

    /// Glob, or regular expression written as `/.../`
    pub pattern: String,
}

/// Pattern rule: run `script` first in every workspace matching the filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternScriptConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<String>,

    pub pattern: String,

    /// Script to run in matching workspaces (defaults to the rule's own script)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// Runner family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerType {
    /// Run the script in every selected workspace
    #[default]
    Many,
    /// Expand self/dependency/pattern rules into a task graph
    Pipeline,
    /// Compose child runners
    Multi,
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Many => write!(f, "many"),
            Self::Pipeline => write!(f, "pipeline"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// Runner configuration as written by the user.
///
/// Every field is optional so configurations can be layered: a runner is
/// merged over the runner it `extends`, then over its parent when it
/// `inherit`s, then over `runner_defaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<RunnerType>,

    /// Name of another runner whose settings fill unset fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Fill unset fields from the parent runner
    pub inherit: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_on_error: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub throw_on_error: Option<bool>,

    /// Maximum workspaces started together by a `many` runner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<OneOrMany<FilterEntry>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<OneOrMany<FilterEntry>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_script: Option<OneOrMany<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_script: Option<OneOrMany<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_script: Option<OneOrMany<PatternScriptConfig>>,

    /// Children of a `multi` runner
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runners: Vec<RunnerConfig>,
}

impl RunnerConfig {
    /// Create a runner of the given type
    pub fn of(kind: RunnerType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    /// Create a pipeline runner
    pub fn pipeline() -> Self {
        Self::of(RunnerType::Pipeline)
    }

    /// Add a same-workspace prerequisite script
    pub fn with_self_script(mut self, script: impl Into<String>) -> Self {
        let mut scripts = list_of(&self.self_script);
        scripts.push(script.into());
        self.self_script = Some(OneOrMany::Many(scripts));
        self
    }

    /// Add a dependency-workspace prerequisite script
    pub fn with_dependency_script(mut self, script: impl Into<String>) -> Self {
        let mut scripts = list_of(&self.dependency_script);
        scripts.push(script.into());
        self.dependency_script = Some(OneOrMany::Many(scripts));
        self
    }

    /// Add a pattern-matched prerequisite
    pub fn with_pattern_script(mut self, rule: PatternScriptConfig) -> Self {
        let mut rules = list_of(&self.pattern_script);
        rules.push(rule);
        self.pattern_script = Some(OneOrMany::Many(rules));
        self
    }

    /// Fill every unset field from `base`. Env maps are unioned with
    /// `self` winning on conflicts.
    pub fn merged_over(&self, base: &RunnerConfig) -> RunnerConfig {
        let mut env = base.env.clone();
        env.extend(self.env.clone());

        RunnerConfig {
            kind: self.kind.or(base.kind),
            extends: self.extends.clone(),
            inherit: self.inherit,
            parallel: self.parallel.or(base.parallel),
            restart_on_error: self.restart_on_error.or(base.restart_on_error),
            restart_retries: self.restart_retries.or(base.restart_retries),
            throw_on_error: self.throw_on_error.or(base.throw_on_error),
            limit: self.limit.or(base.limit),
            env,
            cache: self.cache.clone().or_else(|| base.cache.clone()),
            executor: self.executor.clone().or_else(|| base.executor.clone()),
            include: self.include.clone().or_else(|| base.include.clone()),
            exclude: self.exclude.clone().or_else(|| base.exclude.clone()),
            self_script: self.self_script.clone().or_else(|| base.self_script.clone()),
            dependency_script: self
                .dependency_script
                .clone()
                .or_else(|| base.dependency_script.clone()),
            pattern_script: self
                .pattern_script
                .clone()
                .or_else(|| base.pattern_script.clone()),
            runners: if self.runners.is_empty() {
                base.runners.clone()
            } else {
                self.runners.clone()
            },
        }
    }
}

/// Cache variant as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheSpec {
    /// Content hash of the files matched by `include` minus `exclude`
    File {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// Values of the named environment variables
    Env { variables: OneOrMany<String> },
    /// An arbitrary value
    Flag { flag: serde_json::Value },
    /// Ordered composition of other caches
    Multi { caches: Vec<CacheSpec> },
}

/// Executor as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(flatten)]
    pub kind: ExecutorKind,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
}

impl ExecutorConfig {
    /// Executor running a package-manager script
    pub fn script(script: Option<String>) -> Self {
        Self::from(ExecutorKind::Script { script })
    }
}

impl From<ExecutorKind> for ExecutorConfig {
    fn from(kind: ExecutorKind) -> Self {
        Self {
            kind,
            env: BTreeMap::new(),
            cache: None,
        }
    }
}

/// Executor family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorKind {
    /// `<package manager> run <script>`; defaults to the task's script
    Script {
        #[serde(default)]
        script: Option<String>,
    },
    /// Arbitrary program
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `node <file>`
    Node { file: String },
    /// Composition of executors
    Multi {
        executors: Vec<ExecutorConfig>,
        #[serde(default)]
        parallel: bool,
        #[serde(default)]
        throw_on_error: bool,
    },
}

/// Per-workspace configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Environment variables for every task of this workspace
    pub env: EnvConfig,

    /// Executor per script name
    pub executors: BTreeMap<String, ExecutorConfig>,

    /// Settings applied under every executor of this workspace
    pub executor_defaults: ExecutorDefaults,
}

/// Workspace-wide executor defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorDefaults {
    pub env: EnvConfig,
    pub cache: Option<CacheSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_from_yaml() {
        let yaml = r#"
type: pipeline
self_script: lint
dependency_script: [build]
pattern_script:
  match: name
  pattern: "pkg2"
  script: build
restart_on_error: true
env:
  NODE_ENV: production
  RETRIES: 3
"#;
        let runner: RunnerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(runner.kind, Some(RunnerType::Pipeline));
        assert_eq!(list_of(&runner.self_script), vec!["lint"]);
        assert_eq!(list_of(&runner.dependency_script), vec!["build"]);
        let rules = list_of(&runner.pattern_script);
        assert_eq!(rules[0].pattern, "pkg2");
        assert_eq!(rules[0].script.as_deref(), Some("build"));
        assert_eq!(runner.env["RETRIES"].to_string(), "3");
    }

    #[test]
    fn test_cache_spec_tagged() {
        let yaml = r#"
type: multi
caches:
  - type: file
    include: ["src/**", "package.json"]
  - type: env
    variables: NODE_ENV
  - type: flag
    flag: "x"
"#;
        let spec: CacheSpec = serde_yaml::from_str(yaml).unwrap();
        match spec {
            CacheSpec::Multi { caches } => {
                assert_eq!(caches.len(), 3);
                assert!(matches!(caches[0], CacheSpec::File { .. }));
                assert!(matches!(caches[1], CacheSpec::Env { .. }));
                assert!(matches!(caches[2], CacheSpec::Flag { .. }));
            }
            other => panic!("expected multi cache, got {:?}", other),
        }
    }

    #[test]
    fn test_executor_config_flattened() {
        let toml_src = r#"
type = "command"
command = "tsc"
args = ["-p", "."]

[env]
CI = true
"#;
        let executor: ExecutorConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(
            executor.kind,
            ExecutorKind::Command {
                command: "tsc".to_string(),
                args: vec!["-p".to_string(), ".".to_string()],
            }
        );
        assert_eq!(executor.env["CI"].to_string(), "true");
    }

    #[test]
    fn test_merged_over_prefers_own_fields() {
        let base = RunnerConfig {
            parallel: Some(true),
            throw_on_error: Some(true),
            env: [("A".to_string(), EnvValue::from("base"))].into(),
            ..RunnerConfig::pipeline().with_self_script("lint")
        };
        let own = RunnerConfig {
            throw_on_error: Some(false),
            env: [("A".to_string(), EnvValue::from("own"))].into(),
            ..Default::default()
        };

        let merged = own.merged_over(&base);
        assert_eq!(merged.kind, Some(RunnerType::Pipeline));
        assert_eq!(merged.parallel, Some(true));
        assert_eq!(merged.throw_on_error, Some(false));
        assert_eq!(merged.env["A"].to_string(), "own");
        assert_eq!(list_of(&merged.self_script), vec!["lint"]);
    }
}
