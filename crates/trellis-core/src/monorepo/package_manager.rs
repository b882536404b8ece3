//! Package manager detection

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DiscoveryError;

/// Node package manager used to run workspace scripts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    /// Lockfiles in detection order
    const LOCKFILES: [(&'static str, PackageManager); 3] = [
        ("package-lock.json", PackageManager::Npm),
        ("yarn.lock", PackageManager::Yarn),
        ("pnpm-lock.yaml", PackageManager::Pnpm),
    ];

    /// Executable name
    pub fn program(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }

    /// Arguments running `script`
    pub fn run_args(&self, script: &str) -> Vec<String> {
        vec!["run".to_string(), script.to_string()]
    }

    /// Parse the `packageManager` field of a package.json (`pnpm@8.6.0`)
    pub fn from_field(field: &str) -> Result<Self, DiscoveryError> {
        let name = field.split('@').next().unwrap_or_default();
        name.parse()
    }

    /// Detect from a lockfile in `dir`
    pub fn from_lockfile(dir: &Path) -> Option<Self> {
        Self::LOCKFILES
            .iter()
            .find(|(file, _)| dir.join(file).exists())
            .map(|(_, pm)| *pm)
    }

    /// Detect the package manager of a directory: `packageManager` field
    /// first, then lockfile. `None` when neither is present.
    pub fn detect(dir: &Path, field: Option<&str>) -> Result<Option<Self>, DiscoveryError> {
        let detected = match field {
            Some(field) => Some(Self::from_field(field)?),
            None => Self::from_lockfile(dir),
        };
        debug!(dir = %dir.display(), package_manager = ?detected, "detected package manager");
        Ok(detected)
    }
}

impl FromStr for PackageManager {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Self::Npm),
            "yarn" => Ok(Self::Yarn),
            "pnpm" => Ok(Self::Pnpm),
            other => Err(DiscoveryError::UnknownPackageManager(other.to_string())),
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_field() {
        assert_eq!(
            PackageManager::from_field("pnpm@8.6.0").unwrap(),
            PackageManager::Pnpm
        );
        assert_eq!(PackageManager::from_field("yarn").unwrap(), PackageManager::Yarn);
        assert!(PackageManager::from_field("bun@1.0.0").is_err());
    }

    #[test]
    fn test_detect_lockfile() {
        let temp = TempDir::new().unwrap();
        assert_eq!(PackageManager::detect(temp.path(), None).unwrap(), None);

        std::fs::write(temp.path().join("yarn.lock"), "").unwrap();
        assert_eq!(
            PackageManager::detect(temp.path(), None).unwrap(),
            Some(PackageManager::Yarn)
        );
    }

    #[test]
    fn test_field_wins_over_lockfile() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(
            PackageManager::detect(temp.path(), Some("pnpm@9.0.0")).unwrap(),
            Some(PackageManager::Pnpm)
        );
    }

    #[test]
    fn test_run_args() {
        assert_eq!(PackageManager::Pnpm.program(), "pnpm");
        assert_eq!(PackageManager::Npm.run_args("build"), vec!["run", "build"]);
    }
}
