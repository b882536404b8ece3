//! Fingerprint caches
//!
//! A cache computes a [`Fingerprint`] from some input (file contents,
//! environment variables, an arbitrary value). The scheduler compares it to
//! the fingerprint stored by the last successful run and skips the task
//! when they are equal.

mod env;
mod file;
mod flag;
mod multi;
mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use trellis_core::config::CacheSpec;

pub use env::EnvCache;
pub use file::FileCache;
pub use flag::FlagCache;
pub use multi::MultiCache;
pub use store::{CacheStats, CacheStore};

/// Deterministic hash of a cache's inputs (hex-encoded SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Hash raw bytes
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Hash an ordered list of parts; reordering the parts changes the result
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let joined: Vec<&str> = parts.into_iter().collect();
        Self::of(joined.join(";"))
    }

    /// Whether a stored fingerprint matches this one
    pub fn matches(&self, stored: Option<&str>) -> bool {
        stored == Some(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a cache hashes against
#[derive(Debug, Clone, Default)]
pub struct CacheContext {
    /// Monorepo root, substituted for `{root}`
    pub root: PathBuf,
    /// Workspace directory, substituted for `{workspace}`/`{cwd}` and used
    /// to resolve relative patterns
    pub workspace: PathBuf,
    /// Environment visible to env caches
    pub env: BTreeMap<String, String>,
}

impl CacheContext {
    pub fn new(root: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workspace: workspace.into(),
            env: BTreeMap::new(),
        }
    }

    /// Process environment overlaid with `overrides`
    pub fn with_process_env(mut self, overrides: &BTreeMap<String, String>) -> Self {
        self.env = std::env::vars().collect();
        self.env
            .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A fingerprint source
#[derive(Debug, Clone)]
pub enum Cache {
    File(FileCache),
    Env(EnvCache),
    Flag(FlagCache),
    Multi(MultiCache),
}

impl Cache {
    /// Build a cache from its configuration
    pub fn from_spec(spec: &CacheSpec) -> Self {
        match spec {
            CacheSpec::File { include, exclude } => {
                Self::File(FileCache::new(include.clone(), exclude.clone()))
            }
            CacheSpec::Env { variables } => Self::Env(EnvCache::new(variables.to_vec())),
            CacheSpec::Flag { flag } => Self::Flag(FlagCache::new(flag.clone())),
            CacheSpec::Multi { caches } => {
                Self::Multi(MultiCache::new(caches.iter().map(Self::from_spec).collect()))
            }
        }
    }

    /// Compose several caches, keeping their order
    pub fn multi(caches: Vec<Cache>) -> Self {
        Self::Multi(MultiCache::new(caches))
    }

    /// Kind name used as the second key of the cache store
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Env(_) => "env",
            Self::Flag(_) => "flag",
            Self::Multi(_) => "multi",
        }
    }

    /// Compute the current fingerprint
    pub fn hash(&self, ctx: &CacheContext) -> Result<Fingerprint, CacheError> {
        match self {
            Self::File(cache) => cache.hash(ctx),
            Self::Env(cache) => cache.hash(ctx),
            Self::Flag(cache) => cache.hash(),
            Self::Multi(cache) => cache.hash(ctx),
        }
    }
}

impl From<&CacheSpec> for Cache {
    fn from(spec: &CacheSpec) -> Self {
        Self::from_spec(spec)
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A matched path could not be read
    #[error("Cache glob error: {0}")]
    Glob(#[from] glob::GlobError),

    /// An include or exclude pattern is malformed
    #[error("Invalid cache pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}
