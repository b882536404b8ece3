//! Pipeline resolution: expanding one script into a task graph

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use trellis_core::monorepo::{Monorepo, Workspace, WorkspaceId};
use trellis_core::ConfigError;

use crate::dag::{DagError, TaskGraph};
use crate::runner::{ResolvedRunner, RunnerRegistry};
use crate::task::TaskId;

/// Payload of a task graph vertex
#[derive(Debug, Clone)]
pub struct PipelineVertex {
    pub id: TaskId,
    pub workspace: WorkspaceId,
    pub script: String,
    /// Runner resolved for `script`; decides parallelism, retries and caches
    pub runner: Arc<ResolvedRunner>,
}

/// Resolved runner per script name
pub type RuleMap = BTreeMap<String, Arc<ResolvedRunner>>;

/// Errors raised while building a pipeline graph
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] DagError),
}

/// Expands a pipeline runner into `workspace:script` vertices
pub struct PipelineResolver<'a> {
    monorepo: &'a Monorepo,
    registry: &'a RunnerRegistry,
}

impl<'a> PipelineResolver<'a> {
    pub fn new(monorepo: &'a Monorepo, registry: &'a RunnerRegistry) -> Self {
        Self { monorepo, registry }
    }

    /// Resolve the runner of every script reachable from `root`'s rule.
    /// Sub-runners are resolved with `root` as their parent.
    pub fn discover_rules(&self, root: &Arc<ResolvedRunner>) -> Result<RuleMap, ConfigError> {
        let mut rules = RuleMap::new();
        let mut pending = vec![root.script.clone()];

        while let Some(script) = pending.pop() {
            if rules.contains_key(&script) {
                continue;
            }

            let runner = if script == root.script {
                root.clone()
            } else {
                Arc::new(self.registry.resolve(&script, Some(root))?)
            };

            if let Some(rule) = runner.rule() {
                pending.extend(
                    rule.referenced_scripts()
                        .into_iter()
                        .rev()
                        .filter(|s| !rules.contains_key(*s))
                        .map(str::to_string),
                );
            }
            debug!(script = %script, runner = runner.kind.name(), "discovered rule");
            rules.insert(script, runner);
        }

        Ok(rules)
    }

    /// Build the task graph for `root` over the given starting workspaces.
    ///
    /// Starting workspaces that cannot run the script are ignored. The
    /// graph may contain cycles; callers check with
    /// [`TaskGraph::find_cycle`] before scheduling.
    #[instrument(skip_all, fields(script = %root.script, workspaces = roots.len()))]
    pub fn resolve(
        &self,
        root: &Arc<ResolvedRunner>,
        roots: &[&Workspace],
    ) -> Result<TaskGraph<PipelineVertex>, PipelineError> {
        let rules = self.discover_rules(root)?;
        let mut visited = HashSet::new();
        let mut graph = TaskGraph::new();

        for workspace in roots {
            if can_run(workspace, &root.script, &rules) {
                self.visit(workspace, &root.script, &rules, &mut visited, &mut graph)?;
            }
        }

        info!(vertices = graph.len(), rules = rules.len(), "pipeline resolved");
        Ok(graph)
    }

    fn visit(
        &self,
        workspace: &Workspace,
        script: &str,
        rules: &RuleMap,
        visited: &mut HashSet<TaskId>,
        graph: &mut TaskGraph<PipelineVertex>,
    ) -> Result<(), PipelineError> {
        let id = TaskId::new(&workspace.name, script);
        if !visited.insert(id.clone()) {
            return Ok(());
        }
        let Some(runner) = rules.get(script) else {
            return Ok(());
        };

        let mut targets: Vec<(&Workspace, &str)> = Vec::new();
        if let Some(rule) = runner.rule() {
            for self_script in &rule.self_scripts {
                targets.push((workspace, self_script.as_str()));
            }

            for dependency_script in &rule.dependency_scripts {
                for dependency in self.monorepo.dependencies_of(workspace) {
                    targets.push((dependency, dependency_script.as_str()));
                }
            }

            for pattern in &rule.pattern_scripts {
                for other in self.monorepo.workspaces() {
                    let target = TaskId::new(&other.name, &pattern.script);
                    if target != id && pattern.filter.matches(other) {
                        targets.push((other, pattern.script.as_str()));
                    }
                }
            }
        }

        let mut depends_on = Vec::with_capacity(targets.len());
        for (target, target_script) in targets {
            if !can_run(target, target_script, rules) {
                continue;
            }
            depends_on.push(TaskId::new(&target.name, target_script));
            self.visit(target, target_script, rules, visited, graph)?;
        }

        graph.add_vertex(
            id.clone(),
            depends_on,
            PipelineVertex {
                id,
                workspace: workspace.id,
                script: script.to_string(),
                runner: runner.clone(),
            },
        )?;
        Ok(())
    }
}

/// Whether `workspace` has something to execute for `script`: its own
/// executor, a package script, or an executor on the script's runner
fn can_run(workspace: &Workspace, script: &str, rules: &RuleMap) -> bool {
    workspace.can_run(script)
        || rules
            .get(script)
            .map(|runner| runner.executor.is_some())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use trellis_core::config::{Config, ExecutorKind, PatternScriptConfig, RunnerConfig};

    fn ws(name: &str) -> Workspace {
        Workspace::new(name, PathBuf::from("/repo/packages").join(name), PathBuf::from("/repo"))
            .with_script("build")
            .with_script("test")
    }

    fn monorepo(workspaces: Vec<Workspace>, runners: Vec<(&str, RunnerConfig)>) -> Monorepo {
        let config = Config {
            runners: runners
                .into_iter()
                .map(|(name, runner)| (name.to_string(), runner))
                .collect(),
            ..Default::default()
        };
        Monorepo::new(PathBuf::from("/repo"), config, workspaces)
    }

    fn resolve(repo: &Monorepo, script: &str) -> Result<TaskGraph<PipelineVertex>, PipelineError> {
        let registry = RunnerRegistry::new(repo.config());
        let root = Arc::new(registry.resolve(script, None)?);
        let members: Vec<&Workspace> = repo.members().collect();
        PipelineResolver::new(repo, &registry).resolve(&root, &members)
    }

    fn id(s: &str) -> TaskId {
        TaskId::parse(s).unwrap()
    }

    fn deps(graph: &TaskGraph<PipelineVertex>, vertex: &str) -> Vec<TaskId> {
        graph.get(&id(vertex)).unwrap().depends_on.clone()
    }

    fn pattern(name: &str, script: Option<&str>) -> PatternScriptConfig {
        PatternScriptConfig {
            scope: None,
            match_kind: Some("name".to_string()),
            pattern: name.to_string(),
            script: script.map(str::to_string),
        }
    }

    #[test]
    fn test_dependency_edges() {
        let repo = monorepo(
            vec![ws("app").with_dependency("lib"), ws("lib")],
            vec![("build", RunnerConfig::pipeline().with_dependency_script("build"))],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(deps(&graph, "app:build"), vec![id("lib:build")]);
        assert!(deps(&graph, "lib:build").is_empty());
        assert_eq!(graph.ids(), &[id("lib:build"), id("app:build")]);
    }

    #[test]
    fn test_dependency_edges_are_one_hop_per_vertex() {
        let repo = monorepo(
            vec![
                ws("app").with_dependency("ui"),
                ws("ui").with_dev_dependency("core"),
                ws("core").with_peer_dependency("react"),
            ],
            vec![("build", RunnerConfig::pipeline().with_dependency_script("build"))],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(deps(&graph, "app:build"), vec![id("ui:build")]);
        assert_eq!(deps(&graph, "ui:build"), vec![id("core:build")]);
        assert!(deps(&graph, "core:build").is_empty());
    }

    #[test]
    fn test_self_scripts() {
        let repo = monorepo(
            vec![ws("app").with_script("codegen")],
            vec![("build", RunnerConfig::pipeline().with_self_script("codegen"))],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(deps(&graph, "app:build"), vec![id("app:codegen")]);
        assert!(graph.contains(&id("app:codegen")));
        assert_eq!(graph.get(&id("app:codegen")).unwrap().data.runner.script, "codegen");
    }

    #[test]
    fn test_pattern_edges_skip_self() {
        let repo = monorepo(
            vec![ws("pkg1"), ws("pkg2"), ws("pkg3")],
            vec![(
                "build",
                RunnerConfig::pipeline().with_pattern_script(pattern("pkg2", Some("build"))),
            )],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(deps(&graph, "pkg1:build"), vec![id("pkg2:build")]);
        assert_eq!(deps(&graph, "pkg3:build"), vec![id("pkg2:build")]);
        assert!(deps(&graph, "pkg2:build").is_empty());
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_pattern_edges_reach_other_script_in_same_workspace() {
        let repo = monorepo(
            vec![ws("pkg1").with_script("codegen"), ws("pkg2").with_script("codegen")],
            vec![(
                "build",
                RunnerConfig::pipeline().with_pattern_script(pattern("pkg*", Some("codegen"))),
            )],
        );
        let graph = resolve(&repo, "build").unwrap();

        let pkg1 = deps(&graph, "pkg1:build");
        assert!(pkg1.contains(&id("pkg1:codegen")));
        assert!(pkg1.contains(&id("pkg2:codegen")));
        assert!(graph.contains(&id("pkg1:codegen")));
        assert_eq!(
            graph.waves().unwrap()[0],
            vec![id("pkg1:codegen"), id("pkg2:codegen")]
        );
    }

    #[test]
    fn test_pattern_script_defaults_to_rule_script() {
        let repo = monorepo(
            vec![ws("pkg1"), ws("pkg2")],
            vec![(
                "test",
                RunnerConfig::pipeline().with_pattern_script(pattern("pkg2", None)),
            )],
        );
        let graph = resolve(&repo, "test").unwrap();
        assert_eq!(deps(&graph, "pkg1:test"), vec![id("pkg2:test")]);
    }

    #[test]
    fn test_targets_without_script_are_ignored() {
        let repo = monorepo(
            vec![
                ws("app").with_dependency("types"),
                Workspace::new("types", PathBuf::from("/repo/packages/types"), PathBuf::from("/repo")),
            ],
            vec![("build", RunnerConfig::pipeline().with_dependency_script("build"))],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(graph.len(), 1);
        assert!(deps(&graph, "app:build").is_empty());
    }

    #[test]
    fn test_runner_executor_makes_script_runnable() {
        let lint = RunnerConfig {
            executor: Some(
                ExecutorKind::Command {
                    command: "eslint".to_string(),
                    args: vec![".".to_string()],
                }
                .into(),
            ),
            ..Default::default()
        };
        let repo = monorepo(
            vec![ws("app")],
            vec![
                ("build", RunnerConfig::pipeline().with_self_script("lint")),
                ("lint", lint),
            ],
        );
        let graph = resolve(&repo, "build").unwrap();
        assert_eq!(deps(&graph, "app:build"), vec![id("app:lint")]);
    }

    #[test]
    fn test_rule_cycles_terminate_and_are_reported_by_graph() {
        let repo = monorepo(
            vec![ws("a").with_dependency("b"), ws("b").with_dependency("a")],
            vec![("build", RunnerConfig::pipeline().with_dependency_script("build"))],
        );
        let graph = resolve(&repo, "build").unwrap();

        assert_eq!(graph.len(), 2);
        let path = graph.find_cycle().unwrap();
        assert!(path.contains(&id("a:build")));
        assert!(path.contains(&id("b:build")));
    }

    #[test]
    fn test_transitive_rule_discovery() {
        let repo = monorepo(
            vec![ws("app").with_script("codegen").with_script("fetch")],
            vec![
                ("build", RunnerConfig::pipeline().with_self_script("test")),
                ("test", RunnerConfig::pipeline().with_self_script("codegen")),
                ("codegen", RunnerConfig::pipeline().with_self_script("fetch")),
            ],
        );
        let registry = RunnerRegistry::new(repo.config());
        let root = Arc::new(registry.resolve("build", None).unwrap());
        let rules = PipelineResolver::new(&repo, &registry)
            .discover_rules(&root)
            .unwrap();
        let names: Vec<_> = rules.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["build", "codegen", "fetch", "test"]);

        let graph = resolve(&repo, "build").unwrap();
        assert_eq!(
            graph.waves().unwrap(),
            vec![
                vec![id("app:fetch")],
                vec![id("app:codegen")],
                vec![id("app:test")],
                vec![id("app:build")],
            ]
        );
    }

    #[test]
    fn test_unknown_match_type_fails() {
        let mut bad = pattern("pkg2", None);
        bad.match_kind = Some("colour".to_string());
        let repo = monorepo(
            vec![ws("pkg1")],
            vec![("build", RunnerConfig::pipeline().with_pattern_script(bad))],
        );
        assert!(matches!(
            resolve(&repo, "build"),
            Err(PipelineError::Config(ConfigError::UnknownMatchType(_)))
        ));
    }
}
