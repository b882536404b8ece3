//! Task scheduler: runs a script across the monorepo using tokio

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use trellis_core::monorepo::{FilterScope, Monorepo, PriorityFilter, Workspace, WorkspaceFilter};
use trellis_core::ConfigError;

use crate::cache::{Cache, CacheContext, CacheStore, Fingerprint};
use crate::dag::DagError;
use crate::executor::TaskExecutor;
use crate::pipeline::{PipelineError, PipelineResolver};
use crate::reporter::{SkipReason, TaskEvent, TaskReporter};
use crate::runner::{ResolvedRunner, RunnerKind, RunnerRegistry};
use crate::task::{Task, TaskId};

/// Result of a single task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Time spent, including retries
    pub duration: Duration,
    /// Executions attempted (zero for cache hits and skips)
    pub attempts: u32,
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task completed successfully
    Success,
    /// Task was a cache hit
    CacheHit,
    /// Task failed
    Failed(String),
    /// Task was skipped
    Skipped,
}

impl TaskStatus {
    /// Check if this status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::CacheHit)
    }
}

/// What happens to the dependents of a failed pipeline task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Dependents (transitively) are skipped
    #[default]
    SkipDependents,
    /// Failed tasks are pruned like successful ones and dependents run
    Continue,
}

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent tasks
    pub concurrency: usize,
    /// Whether to consult and update the cache store
    pub use_cache: bool,
    /// Report tasks without executing them
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
    /// Extra filter, e.g. `--for` patterns
    pub filter: WorkspaceFilter,
    /// Which workspaces a run starts from
    pub scope: FilterScope,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
            use_cache: true,
            dry_run: false,
            failure_policy: FailurePolicy::default(),
            filter: WorkspaceFilter::default(),
            scope: FilterScope::Workspace,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Results in completion order
    pub results: Vec<TaskResult>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.id == id)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TaskStatus::Failed(_)))
            .count()
    }

    pub fn cached(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::CacheHit)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Skipped)
            .count()
    }

    /// Whether no task failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Failure of a whole run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Invalid runner, filter or executor configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The task graph is cyclic or malformed
    #[error(transparent)]
    Graph(#[from] DagError),

    /// A task of a `throw_on_error` runner failed for good
    #[error("Script '{id}' failed: {message}")]
    Task { id: TaskId, message: String },
}

impl RunError {
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Graph(DagError::CyclicDependency { .. }))
    }
}

impl From<PipelineError> for RunError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Config(e) => Self::Config(e),
            PipelineError::Graph(e) => Self::Graph(e),
        }
    }
}

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RunError>> + Send + 'a>>;

/// State shared by every task of one run
struct RunState {
    semaphore: Arc<Semaphore>,
    results: Mutex<Vec<TaskResult>>,
}

impl RunState {
    fn record(&self, result: TaskResult) {
        if let Ok(mut results) = self.results.lock() {
            results.push(result);
        }
    }

    fn take(&self) -> Vec<TaskResult> {
        self.results
            .lock()
            .map(|mut results| std::mem::take(&mut *results))
            .unwrap_or_default()
    }
}

/// Runs scripts across a monorepo.
///
/// Cheap to clone; every clone shares the monorepo, executor, reporter
/// and cache store.
#[derive(Clone)]
pub struct Scheduler {
    monorepo: Arc<Monorepo>,
    registry: Arc<RunnerRegistry>,
    executor: Arc<dyn TaskExecutor>,
    reporter: Arc<dyn TaskReporter>,
    store: Option<Arc<CacheStore>>,
    options: SchedulerOptions,
}

impl Scheduler {
    /// Create a scheduler. A cache store at the monorepo's cache file is
    /// used when caching is enabled in configuration.
    pub fn new(
        monorepo: Arc<Monorepo>,
        executor: Arc<dyn TaskExecutor>,
        reporter: Arc<dyn TaskReporter>,
        options: SchedulerOptions,
    ) -> Self {
        let store = monorepo
            .config()
            .cache
            .enabled
            .then(|| Arc::new(CacheStore::new(monorepo.cache_file())));

        Self {
            registry: Arc::new(RunnerRegistry::new(monorepo.config())),
            monorepo,
            executor,
            reporter,
            store,
            options,
        }
    }

    /// Run `script` with the runner configured for it. Every configured
    /// runner is resolved first, so a broken configuration fails the run
    /// before any task starts.
    #[instrument(skip(self), fields(concurrency = self.options.concurrency))]
    pub async fn run(&self, script: &str) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        let configured = self.registry.resolve_all()?;
        debug!(runners = configured.len(), "runner configuration valid");
        let runner = Arc::new(self.registry.resolve(script, None)?);
        let state = Arc::new(RunState {
            semaphore: Arc::new(Semaphore::new(self.options.concurrency.max(1))),
            results: Mutex::new(Vec::new()),
        });

        info!(script, runner = runner.kind.name(), "running script");
        let outcome = self.run_runner(runner, state.clone()).await;

        let summary = RunSummary {
            results: state.take(),
            duration: start.elapsed(),
        };
        self.reporter.report(&TaskEvent::Finished {
            total: summary.results.len(),
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            cached: summary.cached(),
            skipped: summary.skipped(),
            duration: summary.duration,
        });

        outcome.map(|()| summary)
    }

    fn run_runner(&self, runner: Arc<ResolvedRunner>, state: Arc<RunState>) -> RunFuture<'_> {
        Box::pin(async move {
            match &runner.kind {
                RunnerKind::Many { limit } => self.run_many(&runner, *limit, &state).await,
                RunnerKind::Pipeline { .. } => self.run_pipeline(&runner, &state).await,
                RunnerKind::Multi { children } => self.run_multi(&runner, children, &state).await,
            }
        })
    }

    /// Workspaces selected for `runner`. The CLI filter and scope must
    /// pass; the runner chain's filters then take priority over the root
    /// include/exclude.
    fn select(&self, runner: &ResolvedRunner) -> Result<Vec<&Workspace>, ConfigError> {
        let config = self.monorepo.config();
        let mut filter = PriorityFilter::new()
            .require(self.options.filter.clone())
            .require(WorkspaceFilter::scope(self.options.scope));
        for runner_filter in &runner.filters {
            filter.push(runner_filter.clone());
        }
        filter.push(WorkspaceFilter::from_config(
            config.include.as_ref(),
            config.exclude.as_ref(),
        )?);

        Ok(self.monorepo.select(&filter))
    }

    async fn run_many(
        &self,
        runner: &Arc<ResolvedRunner>,
        limit: Option<usize>,
        state: &Arc<RunState>,
    ) -> Result<(), RunError> {
        let tasks = self
            .select(runner)?
            .into_iter()
            .filter(|ws| ws.can_run(&runner.script) || runner.executor.is_some())
            .map(|ws| Task::resolve(&self.monorepo, ws, runner.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        if tasks.is_empty() {
            info!(script = %runner.script, "no workspaces to run");
            return Ok(());
        }

        let limit = limit.filter(|l| *l > 0).unwrap_or(tasks.len());
        info!(script = %runner.script, tasks = tasks.len(), limit, "running tasks");

        let mut remaining = tasks.into_iter().peekable();
        let mut chunk_index = 0;
        while remaining.peek().is_some() {
            let chunk: Vec<Task> = remaining.by_ref().take(limit).collect();
            self.reporter.report(&TaskEvent::WaveStarted {
                script: runner.script.clone(),
                wave: chunk_index,
                tasks: chunk.iter().map(|t| t.id.clone()).collect(),
            });
            self.run_batch(chunk, state).await?;
            chunk_index += 1;
        }
        Ok(())
    }

    async fn run_pipeline(&self, runner: &Arc<ResolvedRunner>, state: &Arc<RunState>) -> Result<(), RunError> {
        let roots = self.select(runner)?;
        let mut graph = PipelineResolver::new(&self.monorepo, &self.registry).resolve(runner, &roots)?;
        graph.drop_dangling_edges();

        if let Some(path) = graph.find_cycle() {
            error!(
                cycle = %path.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" -> "),
                "cyclic dependency, nothing executed"
            );
            return Err(DagError::CyclicDependency { path }.into());
        }

        if self.options.dry_run {
            let plan = graph.execution_plan(|vertex| {
                self.monorepo
                    .get(vertex.data.workspace)
                    .ok_or_else(|| "unknown workspace".to_string())
                    .and_then(|ws| {
                        Task::resolve(&self.monorepo, ws, vertex.data.runner.clone())
                            .map_err(|e| e.to_string())
                    })
                    .map(|task| task.describe())
                    .unwrap_or_else(|e| e)
            })?;
            self.reporter.report(&TaskEvent::Planned {
                script: runner.script.clone(),
                plan,
            });
        }

        let mut skipped: HashSet<TaskId> = HashSet::new();
        let mut wave = 0;

        while !graph.is_empty() {
            let ready = graph.ready_ids();
            if ready.is_empty() {
                // unreachable after the cycle check; bail out instead of spinning
                return Err(DagError::CyclicDependency { path: graph.ids().to_vec() }.into());
            }

            self.reporter.report(&TaskEvent::WaveStarted {
                script: runner.script.clone(),
                wave,
                tasks: ready.clone(),
            });

            let mut batch = Vec::with_capacity(ready.len());
            for id in &ready {
                if skipped.contains(id) {
                    self.skip(id, SkipReason::PrerequisiteFailed, state);
                    continue;
                }
                let Some(vertex) = graph.get(id) else { continue };
                let Some(workspace) = self.monorepo.get(vertex.data.workspace) else {
                    continue;
                };
                batch.push(Task::resolve(&self.monorepo, workspace, vertex.data.runner.clone())?);
            }

            let results = self.run_batch(batch, state).await?;

            if self.options.failure_policy == FailurePolicy::SkipDependents {
                for result in results.iter().filter(|r| matches!(r.status, TaskStatus::Failed(_))) {
                    let dependents = graph.dependents_of(&result.id);
                    debug!(task = %result.id, dependents = dependents.len(), "skipping dependents");
                    skipped.extend(dependents);
                }
            }

            for id in &ready {
                graph.remove(id);
            }
            wave += 1;
        }

        Ok(())
    }

    async fn run_multi(
        &self,
        runner: &Arc<ResolvedRunner>,
        children: &[Arc<ResolvedRunner>],
        state: &Arc<RunState>,
    ) -> Result<(), RunError> {
        let throw_on_error = runner.settings.throw_on_error;

        if runner.settings.parallel {
            let mut handles = Vec::with_capacity(children.len());
            for child in children {
                let scheduler = self.clone();
                let child = child.clone();
                let state = state.clone();
                handles.push(tokio::spawn(async move { scheduler.run_runner(child, state).await }));
            }

            let mut first_error = None;
            for handle in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(RunError::Task {
                        id: TaskId::new("*", &runner.script),
                        message: format!("runner panicked: {}", e),
                    }),
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "child runner failed");
                    first_error.get_or_insert(e);
                }
            }

            return match first_error {
                Some(e) if throw_on_error => Err(e),
                _ => Ok(()),
            };
        }

        for child in children {
            if let Err(e) = self.run_runner(child.clone(), state.clone()).await {
                if throw_on_error {
                    return Err(e);
                }
                warn!(error = %e, "child runner failed");
            }
        }
        Ok(())
    }

    /// Run one ready set. Consecutive parallel tasks run together; other
    /// tasks run one after another. A task of a `throw_on_error` runner
    /// that fails for good aborts the batch once its group has finished.
    async fn run_batch(&self, tasks: Vec<Task>, state: &Arc<RunState>) -> Result<Vec<TaskResult>, RunError> {
        let mut groups: Vec<Vec<Task>> = Vec::new();
        for task in tasks {
            let joins = task.settings().parallel
                && groups
                    .last()
                    .and_then(|group| group.last())
                    .is_some_and(|last| last.settings().parallel);
            match groups.last_mut() {
                Some(group) if joins => group.push(task),
                _ => groups.push(vec![task]),
            }
        }

        let mut results = Vec::new();
        for group in groups {
            let throwing: HashSet<TaskId> = group
                .iter()
                .filter(|t| t.settings().throw_on_error)
                .map(|t| t.id.clone())
                .collect();

            let group_results = if group.len() == 1 {
                let mut single = Vec::with_capacity(1);
                for task in group {
                    single.push(self.run_task(task, state).await);
                }
                single
            } else {
                let mut handles = Vec::with_capacity(group.len());
                for task in group {
                    let scheduler = self.clone();
                    let state = state.clone();
                    let id = task.id.clone();
                    handles.push((id, tokio::spawn(async move { scheduler.run_task(task, &state).await })));
                }

                let mut collected = Vec::with_capacity(handles.len());
                for (id, handle) in handles {
                    match handle.await {
                        Ok(result) => collected.push(result),
                        Err(e) => {
                            let result = TaskResult {
                                id,
                                status: TaskStatus::Failed(format!("Task panicked: {}", e)),
                                duration: Duration::ZERO,
                                attempts: 1,
                            };
                            state.record(result.clone());
                            collected.push(result);
                        }
                    }
                }
                collected
            };

            let fatal = group_results.iter().find_map(|r| match &r.status {
                TaskStatus::Failed(message) if throwing.contains(&r.id) => Some(RunError::Task {
                    id: r.id.clone(),
                    message: message.clone(),
                }),
                _ => None,
            });
            results.extend(group_results);
            if let Some(e) = fatal {
                return Err(e);
            }
        }

        Ok(results)
    }

    fn skip(&self, id: &TaskId, reason: SkipReason, state: &RunState) {
        self.reporter.report(&TaskEvent::Skipped { id: id.clone(), reason });
        state.record(TaskResult {
            id: id.clone(),
            status: TaskStatus::Skipped,
            duration: Duration::ZERO,
            attempts: 0,
        });
    }

    /// Run a single task: cache check, execution with retries, fingerprint
    /// update on success
    async fn run_task(&self, task: Task, state: &RunState) -> TaskResult {
        let _permit = state.semaphore.clone().acquire_owned().await.ok();
        let result = self.execute_task(&task).await;
        state.record(result.clone());
        result
    }

    async fn execute_task(&self, task: &Task) -> TaskResult {
        let start = Instant::now();
        let id = task.id.clone();

        if self.options.dry_run {
            self.reporter.report(&TaskEvent::Skipped {
                id: id.clone(),
                reason: SkipReason::DryRun {
                    command: task.describe(),
                },
            });
            return TaskResult {
                id,
                status: TaskStatus::Skipped,
                duration: start.elapsed(),
                attempts: 0,
            };
        }

        let cached = self.cache_for(task);
        if let Some((cache, ctx, store)) = &cached {
            match fingerprint(cache, ctx).await {
                Some(fresh) => {
                    let stored = store.get(&id.workspace, cache.kind(), &id.script).await;
                    if fresh.matches(stored.as_deref()) {
                        info!(task = %id, "cache hit");
                        self.reporter.report(&TaskEvent::CacheHit {
                            id: id.clone(),
                            fingerprint: fresh.to_string(),
                        });
                        return TaskResult {
                            id,
                            status: TaskStatus::CacheHit,
                            duration: start.elapsed(),
                            attempts: 0,
                        };
                    }
                    info!(task = %id, "cache miss");
                }
                None => info!(task = %id, "cache miss"),
            }
        }

        self.reporter.report(&TaskEvent::Started {
            id: id.clone(),
            command: task.describe(),
        });

        let max_attempts = task.settings().max_attempts();
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match self.executor.execute(task).await {
                Ok(()) => break Ok(()),
                Err(e) if attempts < max_attempts => {
                    warn!(task = %id, attempt = attempts, error = %e, "task failed, restarting");
                    self.reporter.report(&TaskEvent::Retrying {
                        id: id.clone(),
                        attempt: attempts + 1,
                        max_attempts,
                        error: e.to_string(),
                    });
                }
                Err(e) => break Err(e),
            }
        };
        let duration = start.elapsed();

        match outcome {
            Ok(()) => {
                if let Some((cache, ctx, store)) = &cached {
                    if let Some(fresh) = fingerprint(cache, ctx).await {
                        if let Err(e) = store.put(&id.workspace, cache.kind(), &id.script, &fresh).await {
                            warn!(task = %id, error = %e, "failed to persist fingerprint");
                        }
                    }
                }
                self.reporter.report(&TaskEvent::Completed {
                    id: id.clone(),
                    duration,
                    attempts,
                });
                TaskResult {
                    id,
                    status: TaskStatus::Success,
                    duration,
                    attempts,
                }
            }
            Err(e) => {
                let message = e.to_string();
                if attempts > 1 {
                    error!(task = %id, attempts, "task failed after restarts");
                }
                self.reporter.report(&TaskEvent::Failed {
                    id: id.clone(),
                    duration,
                    attempts,
                    error: message.clone(),
                });
                TaskResult {
                    id,
                    status: TaskStatus::Failed(message),
                    duration,
                    attempts,
                }
            }
        }
    }

    /// The task's caches combined in order, when caching applies
    fn cache_for(&self, task: &Task) -> Option<(Cache, CacheContext, Arc<CacheStore>)> {
        if !self.options.use_cache || task.caches.is_empty() {
            return None;
        }
        let store = self.store.clone()?;
        let cache = Cache::multi(task.caches.iter().map(Cache::from_spec).collect());
        let ctx = CacheContext::new(&task.root, &task.cwd).with_process_env(&task.env);
        Some((cache, ctx, store))
    }
}

/// Hash off the async runtime. Failures are logged and read as a miss.
async fn fingerprint(cache: &Cache, ctx: &CacheContext) -> Option<Fingerprint> {
    let (cache, ctx) = (cache.clone(), ctx.clone());
    match tokio::task::spawn_blocking(move || cache.hash(&ctx)).await {
        Ok(Ok(fingerprint)) => Some(fingerprint),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to compute fingerprint");
            None
        }
        Err(e) => {
            warn!(error = %e, "fingerprint task aborted");
            None
        }
    }
}
