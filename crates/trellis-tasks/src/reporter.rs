//! Run events and the sinks they are reported to

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::task::TaskId;

/// Why a task was not executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Dry run; `command` is what would have run
    DryRun { command: String },
    /// A task it depends on failed
    PrerequisiteFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun { command } => write!(f, "dry run: {}", command),
            Self::PrerequisiteFailed => f.write_str("a prerequisite failed"),
        }
    }
}

/// Something that happened during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Waves a pipeline runner will execute, one line per task
    Planned { script: String, plan: String },
    /// A ready set of tasks is about to run
    WaveStarted {
        script: String,
        wave: usize,
        tasks: Vec<TaskId>,
    },
    Started { id: TaskId, command: String },
    Output {
        id: TaskId,
        line: String,
        is_stderr: bool,
    },
    /// The stored fingerprint matched; the executor was not called
    CacheHit { id: TaskId, fingerprint: String },
    /// Attempt `attempt - 1` failed with `error` and the task runs again
    Retrying {
        id: TaskId,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    Completed {
        id: TaskId,
        duration: Duration,
        attempts: u32,
    },
    Failed {
        id: TaskId,
        duration: Duration,
        attempts: u32,
        error: String,
    },
    Skipped { id: TaskId, reason: SkipReason },
    /// The run is over
    Finished {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        skipped: usize,
        duration: Duration,
    },
}

impl TaskEvent {
    /// Task the event is about, if any
    pub fn task(&self) -> Option<&TaskId> {
        match self {
            Self::Started { id, .. }
            | Self::Output { id, .. }
            | Self::CacheHit { id, .. }
            | Self::Retrying { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Skipped { id, .. } => Some(id),
            Self::Planned { .. } | Self::WaveStarted { .. } | Self::Finished { .. } => None,
        }
    }
}

/// Sink for run events
pub trait TaskReporter: Send + Sync {
    fn report(&self, event: &TaskEvent);
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Planned { script, plan } => {
                info!(script = %script, "execution plan\n{}", plan.trim_end());
            }
            TaskEvent::WaveStarted { script, wave, tasks } => {
                info!(script = %script, wave, tasks = tasks.len(), "wave started");
            }
            TaskEvent::Started { id, command } => info!(task = %id, command = %command, "task started"),
            TaskEvent::Output { id, line, is_stderr } => {
                debug!(task = %id, stderr = is_stderr, "{}", line);
            }
            TaskEvent::CacheHit { id, fingerprint } => {
                info!(task = %id, fingerprint = %fingerprint, "task restored from cache");
            }
            TaskEvent::Retrying {
                id,
                attempt,
                max_attempts,
                error,
            } => warn!(task = %id, attempt, max_attempts, error = %error, "task restarting"),
            TaskEvent::Completed { id, duration, attempts } => {
                info!(task = %id, attempts, duration_ms = duration.as_millis() as u64, "task completed");
            }
            TaskEvent::Failed {
                id,
                duration,
                attempts,
                error,
            } => error!(
                task = %id,
                attempts,
                duration_ms = duration.as_millis() as u64,
                error = %error,
                "task failed"
            ),
            TaskEvent::Skipped { id, reason } => info!(task = %id, reason = %reason, "task skipped"),
            TaskEvent::Finished {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => info!(
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration_ms = duration.as_millis() as u64,
                "run finished"
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Ids of tasks that started, in start order
    pub fn started(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::Started { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids of tasks restored from the cache
    pub fn cache_hits(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::CacheHit { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Task sets of each wave, in order
    pub fn waves(&self) -> Vec<Vec<TaskId>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TaskEvent::WaveStarted { tasks, .. } => Some(tasks),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Fans events out to several reporters. Always logs through
/// [`TracingReporter`].
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn register(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(workspace: &str) -> TaskId {
        TaskId::new(workspace, "build")
    }

    #[test]
    fn test_skip_reason_display() {
        let dry = SkipReason::DryRun {
            command: "npm run build".to_string(),
        };
        assert_eq!(dry.to_string(), "dry run: npm run build");
        assert_eq!(SkipReason::PrerequisiteFailed.to_string(), "a prerequisite failed");
    }

    #[test]
    fn test_event_task() {
        let hit = TaskEvent::CacheHit {
            id: id("lib"),
            fingerprint: "abc".to_string(),
        };
        assert_eq!(hit.task(), Some(&id("lib")));

        let wave = TaskEvent::WaveStarted {
            script: "build".to_string(),
            wave: 0,
            tasks: vec![id("lib")],
        };
        assert!(wave.task().is_none());
    }

    #[test]
    fn test_collecting_reporter_views() {
        let reporter = CollectingReporter::default();
        reporter.report(&TaskEvent::WaveStarted {
            script: "build".to_string(),
            wave: 0,
            tasks: vec![id("lib"), id("ui")],
        });
        reporter.report(&TaskEvent::CacheHit {
            id: id("ui"),
            fingerprint: "abc".to_string(),
        });
        reporter.report(&TaskEvent::Started {
            id: id("lib"),
            command: "npm run build".to_string(),
        });
        reporter.report(&TaskEvent::Retrying {
            id: id("lib"),
            attempt: 2,
            max_attempts: 2,
            error: "exit 1".to_string(),
        });

        assert_eq!(reporter.events().len(), 4);
        assert_eq!(reporter.started(), vec![id("lib")]);
        assert_eq!(reporter.cache_hits(), vec![id("ui")]);
        assert_eq!(reporter.waves(), vec![vec![id("lib"), id("ui")]]);
    }

    #[test]
    fn test_registry_fans_out() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::new();
        registry.register(collecting.clone());

        registry.report(&TaskEvent::Skipped {
            id: id("app"),
            reason: SkipReason::PrerequisiteFailed,
        });
        registry.report(&TaskEvent::Finished {
            total: 1,
            succeeded: 0,
            failed: 0,
            cached: 0,
            skipped: 1,
            duration: Duration::from_millis(3),
        });

        assert_eq!(collecting.events().len(), 2);
    }
}
