//! Hash over environment variables

use std::collections::BTreeMap;

use super::{CacheContext, CacheError, Fingerprint};

/// Hashes the values of the named variables that are set. Unset variables
/// are left out, so setting one later changes the fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvCache {
    variables: Vec<String>,
}

impl EnvCache {
    pub fn new(variables: Vec<String>) -> Self {
        Self { variables }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn hash(&self, ctx: &CacheContext) -> Result<Fingerprint, CacheError> {
        let present: BTreeMap<&str, &str> = self
            .variables
            .iter()
            .filter_map(|name| ctx.env.get(name).map(|value| (name.as_str(), value.as_str())))
            .collect();
        Ok(Fingerprint::of(serde_json::to_vec(&present)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_values_change_fingerprint() {
        let cache = EnvCache::new(vec!["NODE_ENV".to_string(), "API_URL".to_string()]);
        let dev = CacheContext::default().with_env("NODE_ENV", "development");
        let prod = CacheContext::default().with_env("NODE_ENV", "production");

        assert_eq!(cache.hash(&dev).unwrap(), cache.hash(&dev).unwrap());
        assert_ne!(cache.hash(&dev).unwrap(), cache.hash(&prod).unwrap());
    }

    #[test]
    fn test_unrelated_variables_ignored() {
        let cache = EnvCache::new(vec!["NODE_ENV".to_string()]);
        let plain = CacheContext::default().with_env("NODE_ENV", "test");
        let noisy = plain.clone().with_env("HOME", "/somewhere");
        assert_eq!(cache.hash(&plain).unwrap(), cache.hash(&noisy).unwrap());
    }

    #[test]
    fn test_unset_differs_from_empty() {
        let cache = EnvCache::new(vec!["FLAG".to_string()]);
        let unset = CacheContext::default();
        let empty = CacheContext::default().with_env("FLAG", "");
        assert_ne!(cache.hash(&unset).unwrap(), cache.hash(&empty).unwrap());
    }
}
