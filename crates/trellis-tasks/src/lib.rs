//! Trellis Tasks - script orchestration engine
//!
//! This crate resolves runners, builds pipeline graphs across workspaces,
//! executes tasks with bounded concurrency and skips work whose
//! fingerprint has not changed.

pub mod cache;
pub mod dag;
pub mod executor;
pub mod pipeline;
pub mod reporter;
pub mod runner;
pub mod scheduler;
pub mod task;

pub use cache::{Cache, CacheContext, CacheError, CacheStats, CacheStore, Fingerprint};
pub use dag::{DagError, TaskGraph, Vertex};
pub use executor::{ProcessExecutor, TaskError, TaskExecutor};
pub use pipeline::{PipelineError, PipelineResolver, PipelineVertex};
pub use reporter::{
    CollectingReporter, SkipReason, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use runner::{ResolvedRunner, RunnerKind, RunnerRegistry, RunnerSettings};
pub use scheduler::{
    FailurePolicy, RunError, RunSummary, Scheduler, SchedulerOptions, TaskResult, TaskStatus,
};
pub use task::{Task, TaskId};
