//! Workspace records

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ExecutorConfig, WorkspaceConfig};

use super::package_manager::PackageManager;

/// Index of a workspace inside its [`Monorepo`](super::Monorepo)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub usize);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a workspace is the monorepo root package or a member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    Root,
    #[default]
    Member,
}

/// Dependency names declared in a workspace manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    pub runtime: BTreeSet<String>,
    pub dev: BTreeSet<String>,
    pub peer: BTreeSet<String>,
}

impl Dependencies {
    /// All declared names (runtime, dev, peer), each once
    pub fn names(&self) -> BTreeSet<&str> {
        self.runtime
            .iter()
            .chain(&self.dev)
            .chain(&self.peer)
            .map(String::as_str)
            .collect()
    }

    /// Whether `name` is declared under any kind
    pub fn contains(&self, name: &str) -> bool {
        self.runtime.contains(name) || self.dev.contains(name) || self.peer.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.runtime.is_empty() && self.dev.is_empty() && self.peer.is_empty()
    }
}

/// One package of the monorepo
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Position in the owning monorepo
    pub id: WorkspaceId,
    /// Package name
    pub name: String,
    /// Absolute package directory
    pub path: PathBuf,
    /// Root of the owning monorepo; used for path resolution only
    pub monorepo_root: PathBuf,
    pub kind: WorkspaceKind,
    pub dependencies: Dependencies,
    /// Scripts declared in package.json
    pub scripts: BTreeSet<String>,
    /// Package manager declared by this package, if any
    pub package_manager: Option<PackageManager>,
    /// Per-workspace configuration
    pub config: WorkspaceConfig,
}

impl Workspace {
    /// Create a member workspace with no dependencies or scripts
    pub fn new(name: impl Into<String>, path: PathBuf, monorepo_root: PathBuf) -> Self {
        Self {
            id: WorkspaceId(0),
            name: name.into(),
            path,
            monorepo_root,
            kind: WorkspaceKind::Member,
            dependencies: Dependencies::default(),
            scripts: BTreeSet::new(),
            package_manager: None,
            config: WorkspaceConfig::default(),
        }
    }

    /// Add a runtime dependency
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.runtime.insert(name.into());
        self
    }

    /// Add a dev dependency
    pub fn with_dev_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.dev.insert(name.into());
        self
    }

    /// Add a peer dependency
    pub fn with_peer_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.peer.insert(name.into());
        self
    }

    /// Add a package.json script
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.scripts.insert(script.into());
        self
    }

    /// Add a workspace executor
    pub fn with_executor(mut self, script: impl Into<String>, executor: ExecutorConfig) -> Self {
        self.config.executors.insert(script.into(), executor);
        self
    }

    /// Directory relative to the monorepo root (empty for the root package)
    pub fn relative_path(&self) -> PathBuf {
        self.path
            .strip_prefix(&self.monorepo_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }

    pub fn is_root(&self) -> bool {
        self.kind == WorkspaceKind::Root
    }

    /// Whether package.json declares `script`
    pub fn has_script(&self, script: &str) -> bool {
        self.scripts.contains(script)
    }

    /// Executor configured by this workspace for `script`
    pub fn executor_for(&self, script: &str) -> Option<&ExecutorConfig> {
        self.config.executors.get(script)
    }

    /// Whether this workspace can run `script` on its own, without a
    /// runner-supplied executor
    pub fn can_run(&self, script: &str) -> bool {
        self.executor_for(script).is_some() || self.has_script(script)
    }

    /// Whether this workspace declares `name` as a dependency
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
