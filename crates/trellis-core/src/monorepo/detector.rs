//! Monorepo root detection

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{DiscoveryError, Result};

/// Where a monorepo lives and which directories hold its workspaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonorepoLayout {
    /// Directory holding the root package.json
    pub root: PathBuf,
    /// Workspace glob patterns, relative to `root`; `!` negates
    pub patterns: Vec<String>,
    /// Name of the detector that matched
    pub detector: &'static str,
}

/// Trait for monorepo root detectors
pub trait RootDetector: Send + Sync {
    /// Detector name (e.g., "pnpm", "package_json")
    fn name(&self) -> &'static str;
    /// Try to detect a monorepo rooted exactly at `path`
    fn detect(&self, path: &Path) -> Result<Option<MonorepoLayout>>;
}

/// Registry of root detectors, tried in order
pub struct RootDetectorRegistry {
    detectors: Vec<Box<dyn RootDetector>>,
}

impl RootDetectorRegistry {
    /// Create a registry with all built-in detectors
    pub fn new() -> Self {
        Self {
            detectors: vec![Box::new(PnpmDetector), Box::new(PackageJsonDetector)],
        }
    }

    /// Create an empty registry with no detectors
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Register an additional detector
    pub fn register(&mut self, detector: Box<dyn RootDetector>) {
        self.detectors.push(detector);
    }

    /// Try each detector at `path`, returning the first match
    pub fn detect(&self, path: &Path) -> Result<Option<MonorepoLayout>> {
        for detector in &self.detectors {
            if let Some(layout) = detector.detect(path)? {
                info!(
                    detector = detector.name(),
                    root = %path.display(),
                    patterns = layout.patterns.len(),
                    "monorepo detected"
                );
                return Ok(Some(layout));
            }
        }
        Ok(None)
    }

    /// Walk from `start` up to the filesystem root and return the nearest
    /// monorepo
    pub fn find_root(&self, start: &Path) -> Result<MonorepoLayout> {
        debug!(start = %start.display(), detectors = self.detectors.len(), "searching for monorepo root");
        let mut current = start.to_path_buf();

        loop {
            if let Some(layout) = self.detect(&current)? {
                return Ok(layout);
            }
            if !current.pop() {
                break;
            }
        }

        Err(DiscoveryError::RootNotFound(start.to_path_buf()).into())
    }

    /// Get names of all registered detectors
    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }
}

impl Default for RootDetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Detects `pnpm-workspace.yaml`
pub struct PnpmDetector;

impl RootDetector for PnpmDetector {
    fn name(&self) -> &'static str {
        "pnpm"
    }

    fn detect(&self, path: &Path) -> Result<Option<MonorepoLayout>> {
        let manifest = path.join("pnpm-workspace.yaml");
        if !manifest.exists() {
            return Ok(None);
        }

        #[derive(Deserialize)]
        struct PnpmWorkspace {
            #[serde(default)]
            packages: Vec<String>,
        }

        let content = std::fs::read_to_string(&manifest)?;
        let parsed: PnpmWorkspace =
            serde_yaml::from_str(&content).map_err(|e| DiscoveryError::InvalidManifest {
                path: manifest.clone(),
                reason: e.to_string(),
            })?;

        Ok(Some(MonorepoLayout {
            root: path.to_path_buf(),
            patterns: parsed.packages,
            detector: self.name(),
        }))
    }
}

/// Detects npm and Yarn `workspaces` in package.json
pub struct PackageJsonDetector;

impl RootDetector for PackageJsonDetector {
    fn name(&self) -> &'static str {
        "package_json"
    }

    fn detect(&self, path: &Path) -> Result<Option<MonorepoLayout>> {
        let manifest = path.join("package.json");
        if !manifest.exists() {
            return Ok(None);
        }

        #[derive(Deserialize)]
        struct PackageJson {
            workspaces: Option<WorkspacesField>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WorkspacesField {
            Array(Vec<String>),
            Object {
                #[serde(default)]
                packages: Vec<String>,
            },
        }

        let content = std::fs::read_to_string(&manifest)?;
        let pkg: PackageJson =
            serde_json::from_str(&content).map_err(|e| DiscoveryError::InvalidManifest {
                path: manifest.clone(),
                reason: e.to_string(),
            })?;

        let patterns = match pkg.workspaces {
            Some(WorkspacesField::Array(patterns)) => patterns,
            Some(WorkspacesField::Object { packages }) => packages,
            None => return Ok(None),
        };

        Ok(Some(MonorepoLayout {
            root: path.to_path_buf(),
            patterns,
            detector: self.name(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_npm_workspaces() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "repo", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();

        let layout = RootDetectorRegistry::new()
            .detect(temp.path())
            .unwrap()
            .unwrap();
        assert_eq!(layout.patterns, vec!["packages/*"]);
        assert_eq!(layout.detector, "package_json");
    }

    #[test]
    fn test_detect_yarn_object_form() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"workspaces": {"packages": ["packages/*", "apps/*"]}}"#,
        )
        .unwrap();

        let layout = RootDetectorRegistry::new()
            .detect(temp.path())
            .unwrap()
            .unwrap();
        assert_eq!(layout.patterns, vec!["packages/*", "apps/*"]);
    }

    #[test]
    fn test_detect_pnpm_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("pnpm-workspace.yaml"),
            "packages:\n  - 'packages/*'\n  - '!packages/legacy'\n",
        )
        .unwrap();

        let layout = RootDetectorRegistry::new()
            .detect(temp.path())
            .unwrap()
            .unwrap();
        assert_eq!(layout.detector, "pnpm");
        assert_eq!(layout.patterns, vec!["packages/*", "!packages/legacy"]);
    }

    #[test]
    fn test_plain_package_is_not_a_monorepo() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{"name": "single"}"#).unwrap();

        assert!(RootDetectorRegistry::new()
            .detect(temp.path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_find_root_walks_up() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        let nested = temp.path().join("packages").join("lib").join("src");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            temp.path().join("packages/lib/package.json"),
            r#"{"name": "lib"}"#,
        )
        .unwrap();

        let layout = RootDetectorRegistry::new().find_root(&nested).unwrap();
        assert_eq!(layout.root, temp.path());
    }

    #[test]
    fn test_find_root_missing() {
        let temp = TempDir::new().unwrap();
        let registry = RootDetectorRegistry::empty();
        assert!(registry.names().is_empty());
        assert!(registry.find_root(temp.path()).is_err());
    }
}
