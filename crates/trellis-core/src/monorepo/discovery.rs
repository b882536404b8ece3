//! Workspace discovery in monorepos

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use glob::glob;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::load_workspace_config;
use crate::error::{DiscoveryError, Result};

use super::detector::MonorepoLayout;
use super::package_manager::PackageManager;
use super::workspace::{Dependencies, Workspace, WorkspaceId, WorkspaceKind};

/// The parts of package.json discovery cares about
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageManifest {
    pub name: Option<String>,
    pub dependencies: BTreeMap<String, serde_json::Value>,
    pub dev_dependencies: BTreeMap<String, serde_json::Value>,
    pub peer_dependencies: BTreeMap<String, serde_json::Value>,
    pub scripts: BTreeMap<String, serde_json::Value>,
    pub package_manager: Option<String>,
}

impl PackageManifest {
    /// Read `<dir>/package.json`
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join("package.json");
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| {
            DiscoveryError::InvalidManifest {
                path,
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies {
            runtime: self.dependencies.keys().cloned().collect(),
            dev: self.dev_dependencies.keys().cloned().collect(),
            peer: self.peer_dependencies.keys().cloned().collect(),
        }
    }
}

/// Workspace discovery for a detected layout
pub struct WorkspaceDiscovery {
    layout: MonorepoLayout,
}

impl WorkspaceDiscovery {
    /// Create a new discovery instance
    pub fn new(layout: MonorepoLayout) -> Self {
        Self { layout }
    }

    /// Discover the root package followed by every member workspace
    pub fn discover(&self) -> Result<Vec<Workspace>> {
        let root = &self.layout.root;
        debug!(root = %root.display(), patterns = self.layout.patterns.len(), "discovering workspaces");

        let mut workspaces = vec![self.load_root()?];
        let excluded = self.negated_patterns()?;
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut names: HashMap<String, PathBuf> = HashMap::new();
        names.insert(workspaces[0].name.clone(), root.clone());

        for pattern in self.layout.patterns.iter().filter(|p| !p.starts_with('!')) {
            let normalized = normalize_pattern(pattern);
            let full_pattern = root.join(&normalized).to_string_lossy().to_string();

            let entries = glob(&full_pattern).map_err(|e| DiscoveryError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            for entry in entries {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable path");
                        continue;
                    }
                };

                if !path.is_dir() || path == *root || in_node_modules(&path) {
                    continue;
                }
                let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                if excluded.is_match(&relative) || !path.join("package.json").exists() {
                    continue;
                }
                if !seen.insert(path.clone()) {
                    continue;
                }

                let Some(workspace) = self.load_member(&path)? else {
                    continue;
                };

                if let Some(first) = names.get(&workspace.name) {
                    return Err(DiscoveryError::DuplicateWorkspace {
                        name: workspace.name.clone(),
                        first: first.clone(),
                        second: path,
                    }
                    .into());
                }
                names.insert(workspace.name.clone(), path.clone());
                workspaces.push(workspace);
            }
        }

        for (index, workspace) in workspaces.iter_mut().enumerate() {
            workspace.id = WorkspaceId(index);
        }

        info!(count = workspaces.len() - 1, "discovered workspaces");
        Ok(workspaces)
    }

    fn load_root(&self) -> Result<Workspace> {
        let root = &self.layout.root;
        let manifest = if root.join("package.json").exists() {
            PackageManifest::read(root)?
        } else {
            PackageManifest::default()
        };

        let name = manifest.name.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "root".to_string())
        });

        let mut workspace = self.build(name, root.clone(), &manifest)?;
        workspace.kind = WorkspaceKind::Root;
        Ok(workspace)
    }

    fn load_member(&self, path: &Path) -> Result<Option<Workspace>> {
        let manifest = PackageManifest::read(path)?;
        let Some(name) = manifest.name.clone() else {
            warn!(path = %path.display(), "package.json has no name, skipping workspace");
            return Ok(None);
        };

        self.build(name, path.to_path_buf(), &manifest).map(Some)
    }

    fn build(&self, name: String, path: PathBuf, manifest: &PackageManifest) -> Result<Workspace> {
        let package_manager = PackageManager::detect(&path, manifest.package_manager.as_deref())?;
        let config = load_workspace_config(&path)?.unwrap_or_default();

        let mut workspace = Workspace::new(name, path, self.layout.root.clone());
        workspace.dependencies = manifest.dependencies();
        workspace.scripts = manifest.scripts.keys().cloned().collect();
        workspace.package_manager = package_manager;
        workspace.config = config;
        Ok(workspace)
    }

    fn negated_patterns(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in self.layout.patterns.iter().filter_map(|p| p.strip_prefix('!')) {
            let normalized = normalize_pattern(pattern);
            let glob = Glob::new(&normalized).map_err(|e| DiscoveryError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| {
            DiscoveryError::InvalidPattern {
                pattern: self.layout.patterns.join(", "),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn normalize_pattern(pattern: &str) -> String {
    pattern
        .trim_start_matches("./")
        .trim_end_matches('/')
        .to_string()
}

fn in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == "node_modules"))
}
