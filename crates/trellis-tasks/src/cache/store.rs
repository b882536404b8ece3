//! Persisted fingerprints
//!
//! One JSON file per monorepo, shaped
//! `workspace -> cache kind -> cache name -> fingerprint`. Every read and
//! every read-modify-write goes through the store's mutex so concurrent
//! tasks never drop each other's updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CacheError, Fingerprint};

type Records = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Single-writer handle on the cache file
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored fingerprint. An unreadable or corrupt file reads as empty.
    pub async fn get(&self, workspace: &str, kind: &str, name: &str) -> Option<String> {
        let _guard = self.lock.lock().await;
        match self.load().await {
            Ok(records) => records
                .get(workspace)
                .and_then(|kinds| kinds.get(kind))
                .and_then(|names| names.get(name))
                .cloned(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cache store unreadable, treating as empty");
                None
            }
        }
    }

    /// Record a fingerprint
    pub async fn put(
        &self,
        workspace: &str,
        kind: &str,
        name: &str,
        fingerprint: &Fingerprint,
    ) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await.unwrap_or_default();
        records
            .entry(workspace.to_string())
            .or_default()
            .entry(kind.to_string())
            .or_default()
            .insert(name.to_string(), fingerprint.0.clone());
        self.write(&records).await?;
        debug!(workspace, kind, name, "stored fingerprint");
        Ok(())
    }

    /// Summary of the stored records
    pub async fn status(&self) -> Result<CacheStats, CacheError> {
        let _guard = self.lock.lock().await;
        let mut stats = CacheStats::default();

        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };
        stats.total_size = metadata.len();

        let records = self.load().await?;
        stats.workspaces = records.len();
        stats.entries = records
            .values()
            .flat_map(|kinds| kinds.values())
            .map(|names| names.len())
            .sum();
        Ok(stats)
    }

    /// Forget the records of one workspace, or everything. Returns the
    /// number of fingerprints removed.
    pub async fn clean(&self, workspace: Option<&str>) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        let mut records = match self.load().await {
            Ok(records) => records,
            Err(_) if workspace.is_none() => Records::new(),
            Err(e) => return Err(e),
        };

        let count = |kinds: &BTreeMap<String, BTreeMap<String, String>>| -> usize {
            kinds.values().map(|names| names.len()).sum()
        };

        let removed = match workspace {
            Some(name) => {
                let removed = records.remove(name).map(|kinds| count(&kinds)).unwrap_or(0);
                self.write(&records).await?;
                removed
            }
            None => {
                let removed = records.values().map(count).sum();
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                removed
            }
        };

        info!(removed, workspace = workspace.unwrap_or("*"), "cache cleaned");
        Ok(removed)
    }

    async fn load(&self) -> Result<Records, CacheError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Records::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a sibling temp file and rename it into place
    async fn write(&self, records: &Records) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, serde_json::to_vec_pretty(records)?).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Workspaces with at least one record
    pub workspaces: usize,
    /// Number of stored fingerprints
    pub entries: usize,
    /// Size of the cache file in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        }
    }
}
