//! Monorepo support
//!
//! This module turns a directory tree into the workspace records the task
//! runner consumes:
//! - Root detection (npm/Yarn `workspaces`, pnpm)
//! - Workspace discovery with glob patterns
//! - Package manager detection
//! - Workspace filters

pub mod detector;
pub mod discovery;
pub mod filter;
pub mod package_manager;
mod root;
pub mod workspace;

pub use detector::{MonorepoLayout, RootDetector, RootDetectorRegistry};
pub use discovery::{PackageManifest, WorkspaceDiscovery};
pub use filter::{FilterScope, FilterSpec, MatchKind, Pattern, PriorityFilter, WorkspaceFilter};
pub use package_manager::PackageManager;
pub use root::Monorepo;
pub use workspace::{Dependencies, Workspace, WorkspaceId, WorkspaceKind};
