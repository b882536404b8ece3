//! Hash over an arbitrary value

use serde_json::Value;

use super::{CacheError, Fingerprint};

/// Hashes the JSON form of a flag, e.g. a tool version or a build mode
#[derive(Debug, Clone)]
pub struct FlagCache {
    flag: Value,
}

impl FlagCache {
    pub fn new(flag: Value) -> Self {
        Self { flag }
    }

    pub fn hash(&self) -> Result<Fingerprint, CacheError> {
        Ok(Fingerprint::of(serde_json::to_vec(&self.flag)?))
    }
}
