//! Executors: turning a task into a running process

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use trellis_core::config::ExecutorKind;

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskId};

/// Runs one resolved task to completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), TaskError>;
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'a>>;

/// Executor spawning real processes with `tokio::process`.
///
/// Output is forwarded line by line to the reporter. `FORCE_COLOR=true` is
/// set so tools keep colouring piped output.
#[derive(Clone)]
pub struct ProcessExecutor {
    reporter: Arc<dyn TaskReporter>,
}

impl ProcessExecutor {
    pub fn new(reporter: Arc<dyn TaskReporter>) -> Self {
        Self { reporter }
    }

    fn run<'a>(&'a self, task: &'a Task) -> BoxFuture<'a> {
        Box::pin(async move {
            match &task.executor.kind {
                ExecutorKind::Script { script } => {
                    let script = script.as_deref().unwrap_or(task.script());
                    let program = task.package_manager.program();
                    self.spawn(task, program, &task.package_manager.run_args(script))
                        .await
                }
                ExecutorKind::Command { command, args } => self.spawn(task, command, args).await,
                ExecutorKind::Node { file } => self.spawn(task, "node", &[file.clone()]).await,
                ExecutorKind::Multi {
                    executors,
                    parallel,
                    throw_on_error,
                } => {
                    if executors.is_empty() {
                        return Err(TaskError::EmptyComposite(task.id.to_string()));
                    }
                    let children: Vec<Task> =
                        executors.iter().map(|e| task.with_executor(e.clone())).collect();
                    if *parallel {
                        self.run_parallel(children, *throw_on_error).await
                    } else {
                        self.run_sequential(&children, *throw_on_error).await
                    }
                }
            }
        })
    }

    async fn run_parallel(&self, children: Vec<Task>, throw_on_error: bool) -> Result<(), TaskError> {
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            let executor = self.clone();
            handles.push(tokio::spawn(async move { executor.run(&child).await }));
        }

        let mut first_error = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TaskError::Panicked(e.to_string())),
            };
            if let Err(e) = result {
                warn!(error = %e, "composite executor step failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) if throw_on_error => Err(e),
            _ => Ok(()),
        }
    }

    async fn run_sequential(&self, children: &[Task], throw_on_error: bool) -> Result<(), TaskError> {
        for child in children {
            if let Err(e) = self.run(child).await {
                if throw_on_error {
                    return Err(e);
                }
                warn!(error = %e, "composite executor step failed");
            }
        }
        Ok(())
    }

    async fn spawn(&self, task: &Task, program: &str, args: &[String]) -> Result<(), TaskError> {
        let command_line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        debug!(task = %task.id, cwd = %task.cwd.display(), command = %command_line, "spawning");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&task.cwd)
            .envs(&task.env)
            .env("FORCE_COLOR", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TaskError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stderr = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(forward(stream, task.id.clone(), true, self.reporter.clone())));
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, task.id.clone(), false, self.reporter.clone()).await;
        }
        if let Some(handle) = stderr {
            let _ = handle.await;
        }

        let status = child.wait().await.map_err(|source| TaskError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(TaskError::ExitStatus {
                command: command_line,
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute(&self, task: &Task) -> Result<(), TaskError> {
        self.run(task).await
    }
}

async fn forward<R>(stream: R, id: TaskId, is_stderr: bool, reporter: Arc<dyn TaskReporter>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        reporter.report(&TaskEvent::Output {
            id: id.clone(),
            line,
            is_stderr,
        });
    }
}

/// Errors raised while executing a task
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The process could not be started or awaited
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully
    #[error("'{command}' exited with code {code}")]
    ExitStatus { command: String, code: i32 },

    /// A multi executor without children
    #[error("Multi executor for '{0}' has no executors")]
    EmptyComposite(String),

    /// A spawned execution panicked
    #[error("Task panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::runner::RunnerRegistry;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use trellis_core::config::ExecutorConfig;
    use trellis_core::monorepo::{PackageManager, WorkspaceId};

    fn task(dir: &std::path::Path, kind: ExecutorKind) -> Task {
        let runner = RunnerRegistry::default().resolve("build", None).unwrap();
        Task {
            id: TaskId::new("app", "build"),
            workspace: WorkspaceId(1),
            cwd: dir.to_path_buf(),
            root: dir.to_path_buf(),
            executor: ExecutorConfig::from(kind),
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
            caches: Vec::new(),
            package_manager: PackageManager::Npm,
            runner: Arc::new(runner),
        }
    }

    fn sh(script: &str) -> ExecutorKind {
        ExecutorKind::Command {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    fn output(reporter: &CollectingReporter) -> Vec<(String, bool)> {
        reporter
            .events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Output { line, is_stderr, .. } => Some((line, is_stderr)),
                _ => None,
            })
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_env_and_output() {
        let temp = TempDir::new().unwrap();
        let reporter = Arc::new(CollectingReporter::default());
        let executor = ProcessExecutor::new(reporter.clone());

        let task = task(temp.path(), sh("echo $GREETING $FORCE_COLOR; echo oops >&2"));
        executor.execute(&task).await.unwrap();

        let lines = output(&reporter);
        assert!(lines.contains(&("hello true".to_string(), false)));
        assert!(lines.contains(&("oops".to_string(), true)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_task_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();
        let reporter = Arc::new(CollectingReporter::default());
        let executor = ProcessExecutor::new(reporter.clone());

        executor
            .execute(&task(temp.path(), sh("cat marker.txt")))
            .await
            .unwrap();
        assert_eq!(output(&reporter), vec![("here".to_string(), false)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_error() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Arc::new(CollectingReporter::default()));

        let err = executor.execute(&task(temp.path(), sh("exit 3"))).await.unwrap_err();
        assert!(matches!(err, TaskError::ExitStatus { code: 3, .. }));
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Arc::new(CollectingReporter::default()));
        let kind = ExecutorKind::Command {
            command: "trellis-definitely-not-a-program".to_string(),
            args: vec![],
        };

        let err = executor.execute(&task(temp.path(), kind)).await.unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_multi_sequential_throw_semantics() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Arc::new(CollectingReporter::default()));
        let steps = |throw_on_error| ExecutorKind::Multi {
            executors: vec![
                ExecutorConfig::from(sh("exit 1")),
                ExecutorConfig::from(sh("touch second")),
            ],
            parallel: false,
            throw_on_error,
        };

        let err = executor.execute(&task(temp.path(), steps(true))).await;
        assert!(err.is_err());
        assert!(!temp.path().join("second").exists());

        executor.execute(&task(temp.path(), steps(false))).await.unwrap();
        assert!(temp.path().join("second").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_multi_parallel_runs_every_child() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Arc::new(CollectingReporter::default()));
        let kind = ExecutorKind::Multi {
            executors: vec![
                ExecutorConfig::from(sh("touch a")),
                ExecutorConfig::from(sh("exit 1")),
                ExecutorConfig::from(sh("touch b")),
            ],
            parallel: true,
            throw_on_error: true,
        };

        assert!(executor.execute(&task(temp.path(), kind)).await.is_err());
        assert!(temp.path().join("a").exists());
        assert!(temp.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_empty_multi() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::new(Arc::new(CollectingReporter::default()));
        let kind = ExecutorKind::Multi {
            executors: vec![],
            parallel: false,
            throw_on_error: false,
        };
        assert!(matches!(
            executor.execute(&task(temp.path(), kind)).await,
            Err(TaskError::EmptyComposite(_))
        ));
    }
}
