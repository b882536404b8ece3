//! The monorepo and the workspaces it owns

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::config::{load_config_or_default, Config};
use crate::error::Result;

use super::detector::RootDetectorRegistry;
use super::discovery::WorkspaceDiscovery;
use super::filter::{PriorityFilter, WorkspaceFilter};
use super::package_manager::PackageManager;
use super::workspace::{Workspace, WorkspaceId, WorkspaceKind};

/// A loaded monorepo: root configuration plus every workspace, root
/// package first
#[derive(Debug, Clone)]
pub struct Monorepo {
    root: PathBuf,
    config: Config,
    config_path: Option<PathBuf>,
    package_manager: PackageManager,
    workspaces: Vec<Workspace>,
}

impl Monorepo {
    /// Find the monorepo containing `start`, load its configuration and
    /// discover its workspaces
    #[instrument(skip_all, fields(start = %start.display()))]
    pub fn load(start: &Path) -> Result<Self> {
        let layout = RootDetectorRegistry::new().find_root(start)?;
        let (config, config_path) = load_config_or_default(&layout.root)?;
        let root = layout.root.clone();
        let workspaces = WorkspaceDiscovery::new(layout).discover()?;

        let monorepo = Self::new(root, config, workspaces).with_config_path(config_path);
        info!(
            root = %monorepo.root.display(),
            workspaces = monorepo.members().count(),
            package_manager = %monorepo.package_manager,
            "monorepo loaded"
        );
        Ok(monorepo)
    }

    /// Assemble a monorepo from already discovered workspaces. Ids are
    /// reassigned to match positions; a root workspace is synthesized when
    /// none is given.
    pub fn new(root: PathBuf, config: Config, mut workspaces: Vec<Workspace>) -> Self {
        if !workspaces.iter().any(Workspace::is_root) {
            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string());
            let mut ws = Workspace::new(name, root.clone(), root.clone());
            ws.kind = WorkspaceKind::Root;
            workspaces.insert(0, ws);
        }

        for (index, workspace) in workspaces.iter_mut().enumerate() {
            workspace.id = WorkspaceId(index);
            workspace.monorepo_root = root.clone();
        }

        let package_manager = workspaces
            .iter()
            .find(|w| w.is_root())
            .and_then(|w| w.package_manager)
            .unwrap_or_default();

        Self {
            root,
            config,
            config_path: None,
            package_manager,
            workspaces,
        }
    }

    fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// File the configuration was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Package manager of the root package
    pub fn package_manager(&self) -> PackageManager {
        self.package_manager
    }

    /// Package manager used for `workspace`: its own, else the root's
    pub fn package_manager_for(&self, workspace: &Workspace) -> PackageManager {
        workspace.package_manager.unwrap_or(self.package_manager)
    }

    /// Every workspace, root package first
    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    /// Member workspaces (everything except the root package)
    pub fn members(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.iter().filter(|w| !w.is_root())
    }

    pub fn get(&self, id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.get(id.0)
    }

    /// Look up a workspace by package name
    pub fn find(&self, name: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.name == name)
    }

    /// Workspaces of this monorepo that `workspace` declares as
    /// runtime, dev or peer dependencies
    pub fn dependencies_of(&self, workspace: &Workspace) -> Vec<&Workspace> {
        workspace
            .dependencies
            .names()
            .into_iter()
            .filter_map(|name| self.find(name))
            .filter(|dep| dep.id != workspace.id)
            .collect()
    }

    /// Filter from the root `include`/`exclude`
    pub fn base_filter(&self) -> Result<WorkspaceFilter> {
        Ok(WorkspaceFilter::from_config(
            self.config.include.as_ref(),
            self.config.exclude.as_ref(),
        )?)
    }

    /// Workspaces passing `filter`, in discovery order
    pub fn select(&self, filter: &PriorityFilter) -> Vec<&Workspace> {
        self.workspaces.iter().filter(|w| filter.matches(w)).collect()
    }

    /// Path of the persisted cache store
    pub fn cache_file(&self) -> PathBuf {
        self.root.join(&self.config.cache.dir).join("cache")
    }
}
