//! Task types

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use trellis_core::config::{CacheSpec, EnvConfig, ExecutorConfig, ExecutorKind};
use trellis_core::monorepo::{Monorepo, PackageManager, Workspace, WorkspaceId};
use trellis_core::ConfigError;

use crate::runner::{ResolvedRunner, RunnerSettings};

/// Unique identifier for a task: `<workspace>:<script>`
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Workspace name
    pub workspace: String,
    /// Script name (e.g., "build", "test", "lint")
    pub script: String,
}

impl TaskId {
    /// Create a new task ID
    pub fn new(workspace: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            script: script.into(),
        }
    }

    /// Parse a task ID from "workspace:script" format. The last colon
    /// separates the script so scoped names like `@acme/ui:build` work.
    pub fn parse(s: &str) -> Option<Self> {
        let (workspace, script) = s.rsplit_once(':')?;
        if workspace.is_empty() || script.is_empty() {
            return None;
        }
        Some(Self::new(workspace, script))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workspace, self.script)
    }
}

/// A fully resolved unit of work, ready for an executor
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub workspace: WorkspaceId,
    /// Directory the process runs in
    pub cwd: PathBuf,
    /// Monorepo root, used to resolve `{root}` in cache patterns
    pub root: PathBuf,
    pub executor: ExecutorConfig,
    /// Merged environment (root < runner chain < workspace < executor)
    pub env: BTreeMap<String, String>,
    /// Caches deciding whether the task can be skipped, own first
    pub caches: Vec<CacheSpec>,
    pub package_manager: PackageManager,
    /// Runner the task was scheduled by
    pub runner: Arc<ResolvedRunner>,
}

impl Task {
    /// Resolve what `runner` should execute in `workspace`.
    ///
    /// The executor is the workspace's own for the script, else the
    /// runner's, else the package script. Workspace executor defaults fill
    /// the executor's env and cache. The environment is layered root <
    /// runner chain < workspace < executor, and caches are the executor's
    /// followed by the runner chain's.
    pub fn resolve(
        monorepo: &Monorepo,
        workspace: &Workspace,
        runner: Arc<ResolvedRunner>,
    ) -> Result<Self, ConfigError> {
        let script = runner.script.clone();
        let defaults = &workspace.config.executor_defaults;

        let mut executor = workspace
            .executor_for(&script)
            .or(runner.executor.as_ref())
            .cloned()
            .or_else(|| workspace.has_script(&script).then(|| ExecutorConfig::script(None)))
            .ok_or_else(|| ConfigError::NoExecutor {
                workspace: workspace.name.clone(),
                script: script.clone(),
            })?;

        let mut executor_env = defaults.env.clone();
        executor_env.extend(executor.env.clone());
        executor.env = executor_env;
        if executor.cache.is_none() {
            executor.cache = defaults.cache.clone();
        }

        let mut env = BTreeMap::new();
        layer(&mut env, &monorepo.config().env);
        env.extend(runner.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        layer(&mut env, &workspace.config.env);
        layer(&mut env, &executor.env);

        let mut caches: Vec<CacheSpec> = executor.cache.iter().cloned().collect();
        caches.extend(runner.caches.iter().cloned());

        Ok(Self {
            id: TaskId::new(&workspace.name, &script),
            workspace: workspace.id,
            cwd: workspace.path.clone(),
            root: monorepo.root().to_path_buf(),
            executor,
            env,
            caches,
            package_manager: monorepo.package_manager_for(workspace),
            runner,
        })
    }

    pub fn script(&self) -> &str {
        &self.id.script
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.runner.settings
    }

    /// Copy of this task running a different executor. The executor's own
    /// env is layered over the task env.
    pub fn with_executor(&self, executor: ExecutorConfig) -> Self {
        let mut task = self.clone();
        for (key, value) in &executor.env {
            task.env.insert(key.clone(), value.to_string());
        }
        task.executor = executor;
        task
    }

    /// Human-readable description of what the executor will run
    pub fn describe(&self) -> String {
        match &self.executor.kind {
            ExecutorKind::Script { script } => {
                let script = script.as_deref().unwrap_or(self.script());
                format!("{} run {}", self.package_manager, script)
            }
            ExecutorKind::Command { command, args } if args.is_empty() => command.clone(),
            ExecutorKind::Command { command, args } => format!("{} {}", command, args.join(" ")),
            ExecutorKind::Node { file } => format!("node {}", file),
            ExecutorKind::Multi { executors, .. } => {
                let parts: Vec<String> = executors
                    .iter()
                    .map(|e| self.with_executor(e.clone()).describe())
                    .collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

fn layer(env: &mut BTreeMap<String, String>, values: &EnvConfig) {
    for (key, value) in values {
        env.insert(key.clone(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerRegistry;
    use std::path::Path;
    use trellis_core::config::{Config, EnvValue, RunnerConfig};

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), EnvValue::from(*v)))
            .collect()
    }

    fn repo(workspace: Workspace, build: RunnerConfig) -> Monorepo {
        let config = Config {
            env: env(&[("LEVEL", "root"), ("ROOT", "1")]),
            runners: [("build".to_string(), build)].into(),
            ..Default::default()
        };
        Monorepo::new(Path::new("/repo").to_path_buf(), config, vec![workspace])
    }

    fn resolve(repo: &Monorepo) -> Result<Task, ConfigError> {
        let registry = RunnerRegistry::new(repo.config());
        let runner = Arc::new(registry.resolve("build", None)?);
        Task::resolve(repo, repo.find("app").unwrap(), runner)
    }

    fn app() -> Workspace {
        Workspace::new("app", Path::new("/repo/apps/app").to_path_buf(), Path::new("/repo").to_path_buf())
    }

    #[test]
    fn test_env_layering() {
        let mut ws = app().with_executor(
            "build",
            ExecutorConfig {
                env: env(&[("LEVEL", "executor")]),
                ..ExecutorConfig::script(None)
            },
        );
        ws.config.env = env(&[("LEVEL", "workspace"), ("WS", "1")]);
        ws.config.executor_defaults.env = env(&[("LEVEL", "defaults"), ("DEFAULTS", "1")]);
        let runner = RunnerConfig {
            env: env(&[("LEVEL", "runner"), ("RUNNER", "1")]),
            ..Default::default()
        };

        let task = resolve(&repo(ws, runner)).unwrap();
        assert_eq!(task.env["LEVEL"], "executor");
        for key in ["ROOT", "RUNNER", "WS", "DEFAULTS"] {
            assert_eq!(task.env[key], "1", "{} missing", key);
        }
        assert_eq!(task.cwd, Path::new("/repo/apps/app"));
        assert_eq!(task.root, Path::new("/repo"));
    }

    #[test]
    fn test_executor_lookup_order() {
        let command = |name: &str| {
            ExecutorConfig::from(ExecutorKind::Command {
                command: name.to_string(),
                args: vec![],
            })
        };
        let runner = RunnerConfig {
            executor: Some(command("from-runner")),
            ..Default::default()
        };

        let own = resolve(&repo(app().with_executor("build", command("from-ws")), runner.clone())).unwrap();
        assert_eq!(own.describe(), "from-ws");

        let inherited = resolve(&repo(app(), runner)).unwrap();
        assert_eq!(inherited.describe(), "from-runner");

        let script = resolve(&repo(app().with_script("build"), RunnerConfig::default())).unwrap();
        assert_eq!(script.describe(), "npm run build");

        let missing = resolve(&repo(app(), RunnerConfig::default())).unwrap_err();
        assert!(matches!(missing, ConfigError::NoExecutor { .. }));
    }

    #[test]
    fn test_cache_chain() {
        let flag = |v: &str| CacheSpec::Flag {
            flag: serde_json::json!(v),
        };
        let mut ws = app().with_script("build");
        ws.config.executor_defaults.cache = Some(flag("ws"));
        let runner = RunnerConfig {
            cache: Some(flag("runner")),
            ..Default::default()
        };

        let task = resolve(&repo(ws, runner)).unwrap();
        assert_eq!(task.caches, vec![flag("ws"), flag("runner")]);
    }

    #[test]
    fn test_describe_multi() {
        let ws = app().with_executor(
            "build",
            ExecutorConfig::from(ExecutorKind::Multi {
                executors: vec![
                    ExecutorConfig::script(Some("codegen".to_string())),
                    ExecutorConfig::from(ExecutorKind::Node {
                        file: "build.js".to_string(),
                    }),
                ],
                parallel: false,
                throw_on_error: true,
            }),
        );
        let task = resolve(&repo(ws, RunnerConfig::default())).unwrap();
        assert_eq!(task.describe(), "[npm run codegen, node build.js]");
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("core", "build");
        assert_eq!(id.to_string(), "core:build");
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::parse("core:build").unwrap();
        assert_eq!(id.workspace, "core");
        assert_eq!(id.script, "build");
    }

    #[test]
    fn test_task_id_parse_scoped() {
        let id = TaskId::parse("@acme/ui:build").unwrap();
        assert_eq!(id.workspace, "@acme/ui");
        assert_eq!(id.script, "build");
    }

    #[test]
    fn test_task_id_parse_invalid() {
        assert!(TaskId::parse("nobuild").is_none());
        assert!(TaskId::parse(":build").is_none());
    }
}
