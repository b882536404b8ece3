//! Run command: execute a script across the monorepo

use std::sync::Arc;

use clap::{Args, ValueEnum};
use console::style;
use tracing::info;

use trellis_core::monorepo::{FilterScope, WorkspaceFilter};
use trellis_core::Monorepo;
use trellis_tasks::{
    FailurePolicy, ProcessExecutor, RunSummary, Scheduler, SchedulerOptions, TaskEvent,
    TaskReporter, TaskReporterRegistry, TaskStatus,
};

use crate::cli::{Cli, OutputFormat};

/// Run a script across the monorepo
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Script to run (e.g., build)
    pub script: String,

    /// Only run in workspaces matching this name pattern (can be repeated)
    #[arg(long = "for", value_name = "PATTERN")]
    pub filter: Vec<String>,

    /// Which workspaces the run starts from
    #[arg(long, value_enum, default_value = "workspace")]
    pub scope: ScopeArg,

    /// Ignore and do not update the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Show what would run without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run dependents of a failed task anyway
    #[arg(long)]
    pub continue_after_failure: bool,
}

/// Run scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    /// Root package and member workspaces
    All,
    /// Only the root package
    Monorepo,
    /// Only member workspaces
    Workspace,
}

impl From<ScopeArg> for FilterScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::All => FilterScope::All,
            ScopeArg::Monorepo => FilterScope::Monorepo,
            ScopeArg::Workspace => FilterScope::Workspace,
        }
    }
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    fn options(&self, monorepo: &Monorepo) -> anyhow::Result<SchedulerOptions> {
        let defaults = SchedulerOptions::default();
        Ok(SchedulerOptions {
            concurrency: self
                .concurrency
                .or(monorepo.config().concurrency)
                .unwrap_or(defaults.concurrency),
            use_cache: !self.no_cache,
            dry_run: self.dry_run,
            failure_policy: if self.continue_after_failure {
                FailurePolicy::Continue
            } else {
                FailurePolicy::SkipDependents
            },
            filter: WorkspaceFilter::from_patterns(&self.filter)?,
            scope: self.scope.into(),
        })
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(script = %self.script, dry_run = self.dry_run, "executing run command");
        let cwd = std::env::current_dir()?;
        let monorepo = Arc::new(Monorepo::load(&cwd)?);
        let options = self.options(&monorepo)?;

        // Task events always reach the log file; the console only in text mode
        let mut reporters = TaskReporterRegistry::new();
        if !cli.quiet && cli.format == OutputFormat::Text {
            reporters.register(Arc::new(ConsoleReporter::new(cli.verbose, self.dry_run)));
        }
        let reporter: Arc<dyn TaskReporter> = Arc::new(reporters);

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!(
                "{} Running {} across {} workspace{}",
                style("→").blue(),
                style(&self.script).bold(),
                monorepo.members().count(),
                if monorepo.members().count() == 1 { "" } else { "s" },
            );
            if self.dry_run {
                println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
            }
            println!();
        }

        let executor = Arc::new(ProcessExecutor::new(reporter.clone()));
        let scheduler = Scheduler::new(monorepo, executor, reporter, options);
        let summary = scheduler.run(&self.script).await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
        } else if !cli.quiet && !summary.is_success() {
            println!();
            println!(
                "  {} {}/{} tasks failed:",
                style("✗").red().bold(),
                summary.failed(),
                summary.results.len()
            );
            for result in &summary.results {
                if let TaskStatus::Failed(ref err) = result.status {
                    println!("    {} {}: {}", style("✗").red(), result.id, err);
                }
            }
        }

        Ok(())
    }
}

fn summary_json(summary: &RunSummary) -> serde_json::Value {
    serde_json::json!({
        "total": summary.results.len(),
        "succeeded": summary.succeeded(),
        "failed": summary.failed(),
        "cached": summary.cached(),
        "skipped": summary.skipped(),
        "duration_ms": summary.duration.as_millis(),
        "tasks": summary.results.iter().map(|r| {
            let (status, error) = match &r.status {
                TaskStatus::Success => ("success", None),
                TaskStatus::CacheHit => ("cached", None),
                TaskStatus::Failed(e) => ("failed", Some(e.as_str())),
                TaskStatus::Skipped => ("skipped", None),
            };
            serde_json::json!({
                "id": r.id.to_string(),
                "status": status,
                "error": error,
                "attempts": r.attempts,
                "duration_ms": r.duration.as_millis(),
            })
        }).collect::<Vec<_>>(),
    })
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
    show_waves: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool, dry_run: bool) -> Self {
        Self {
            verbose,
            show_waves: verbose || dry_run,
        }
    }
}

fn seconds(duration: &std::time::Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Planned { script, plan } => {
                println!("  {} Plan for {}", style("─").dim(), style(script).bold());
                for line in plan.lines() {
                    println!("    {}", style(line).dim());
                }
                println!();
            }
            TaskEvent::WaveStarted { wave, tasks, .. } => {
                if self.show_waves {
                    println!("  {} Wave {} ({} tasks)", style("─").dim(), wave, tasks.len());
                }
            }
            TaskEvent::Started { id, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(id).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output { id, line, is_stderr } => {
                if self.verbose {
                    let prefix = style(format!("[{}]", id)).dim();
                    if *is_stderr {
                        println!("    {} {}", prefix.red(), line);
                    } else {
                        println!("    {} {}", prefix, line);
                    }
                }
            }
            TaskEvent::CacheHit { id, .. } => {
                println!("  {} {} {}", style("✓").green(), style(id).green(), style("(cached)").cyan());
            }
            TaskEvent::Retrying {
                id,
                attempt,
                max_attempts,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("↻").yellow(),
                    style(id).yellow(),
                    style(format!("(attempt {}/{})", attempt, max_attempts)).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Completed { id, duration, attempts } => {
                let retried = if *attempts > 1 {
                    format!(" after {} attempts", attempts)
                } else {
                    String::new()
                };
                println!(
                    "  {} {} {}{}",
                    style("✓").green(),
                    style(id).green(),
                    style(seconds(duration)).dim(),
                    style(retried).yellow()
                );
            }
            TaskEvent::Failed { id, duration, error, .. } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    style(seconds(duration)).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { id, reason } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    style(format!("({})", reason)).dim()
                );
            }
            TaskEvent::Finished {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} cached, {} skipped ({})",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    cached,
                    skipped,
                    seconds(duration)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use trellis_core::config::Config;
    use trellis_core::Workspace;
    use trellis_tasks::{TaskId, TaskResult};

    fn command(args: &[&str]) -> RunCommand {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            run: RunCommand,
        }

        let mut argv = vec!["run"];
        argv.extend_from_slice(args);
        Wrapper::parse_from(argv).run
    }

    #[test]
    fn test_options_from_flags() {
        let monorepo = Monorepo::new(
            PathBuf::from("/repo"),
            Config {
                concurrency: Some(3),
                ..Default::default()
            },
            vec![Workspace::new("web", PathBuf::from("/repo/web"), PathBuf::from("/repo"))],
        );

        let options = command(&["build"]).options(&monorepo).unwrap();
        assert_eq!(options.concurrency, 3);
        assert!(options.use_cache);
        assert_eq!(options.scope, FilterScope::Workspace);
        assert_eq!(options.failure_policy, FailurePolicy::SkipDependents);

        let options = command(&[
            "build",
            "--concurrency",
            "8",
            "--no-cache",
            "--scope",
            "all",
            "--continue-after-failure",
            "--for",
            "api",
        ])
        .options(&monorepo)
        .unwrap();
        assert_eq!(options.concurrency, 8);
        assert!(!options.use_cache);
        assert_eq!(options.scope, FilterScope::All);
        assert_eq!(options.failure_policy, FailurePolicy::Continue);
        assert!(!options.filter.matches(monorepo.find("web").unwrap()));
    }

    #[test]
    fn test_summary_json() {
        let summary = RunSummary {
            results: vec![
                TaskResult {
                    id: TaskId::new("lib", "build"),
                    status: TaskStatus::Failed("exited with code 1".to_string()),
                    duration: Duration::from_millis(5),
                    attempts: 2,
                },
                TaskResult {
                    id: TaskId::new("app", "build"),
                    status: TaskStatus::Skipped,
                    duration: Duration::ZERO,
                    attempts: 0,
                },
            ],
            duration: Duration::from_millis(10),
        };

        let json = summary_json(&summary);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["tasks"][0]["status"], "failed");
        assert_eq!(json["tasks"][0]["attempts"], 2);
        assert_eq!(json["tasks"][1]["id"], "app:build");
    }
}
