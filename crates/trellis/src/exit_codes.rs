//! Exit codes for the CLI

use trellis_core::{ConfigError, TrellisError};
use trellis_tasks::RunError;

/// Success
pub const SUCCESS: u8 = 0;

/// A task of a `throw_on_error` runner failed, or any other runtime error
pub const TASK_FAILURE: u8 = 1;

/// Invalid configuration or monorepo layout
pub const CONFIG_ERROR: u8 = 2;

/// The task graph has a cycle
pub const CYCLE_DETECTED: u8 = 3;

/// Map a command failure to its exit code
pub fn for_error(error: &anyhow::Error) -> u8 {
    if let Some(run) = error.downcast_ref::<RunError>() {
        return match run {
            RunError::Graph(_) if run.is_cycle() => CYCLE_DETECTED,
            RunError::Config(_) | RunError::Graph(_) => CONFIG_ERROR,
            RunError::Task { .. } => TASK_FAILURE,
        };
    }

    if error.downcast_ref::<TrellisError>().is_some() || error.downcast_ref::<ConfigError>().is_some()
    {
        return CONFIG_ERROR;
    }

    TASK_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_tasks::{DagError, TaskId};

    #[test]
    fn test_exit_code_mapping() {
        let cycle = anyhow::Error::new(RunError::Graph(DagError::CyclicDependency {
            path: vec![TaskId::new("a", "build"), TaskId::new("b", "build"), TaskId::new("a", "build")],
        }));
        assert_eq!(for_error(&cycle), CYCLE_DETECTED);

        let config = anyhow::Error::new(RunError::Config(ConfigError::RunnerNotFound("base".to_string())));
        assert_eq!(for_error(&config), CONFIG_ERROR);

        let discovery = anyhow::Error::new(TrellisError::Other("no monorepo".to_string()));
        assert_eq!(for_error(&discovery), CONFIG_ERROR);

        let task = anyhow::Error::new(RunError::Task {
            id: TaskId::new("a", "build"),
            message: "exited with code 1".to_string(),
        });
        assert_eq!(for_error(&task), TASK_FAILURE);

        assert_eq!(for_error(&anyhow::anyhow!("io")), TASK_FAILURE);
    }
}
