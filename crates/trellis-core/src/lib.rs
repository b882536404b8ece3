//! Trellis Core - Core library for the Trellis task runner
//!
//! This crate provides error handling, configuration, and the monorepo
//! model (workspace discovery, filters, package managers) that the task
//! engine in `trellis-tasks` runs over.

pub mod config;
pub mod error;
pub mod monorepo;

pub use config::Config;
pub use error::{ConfigError, DiscoveryError, Result, TrellisError};
pub use monorepo::{Monorepo, Workspace, WorkspaceId};
