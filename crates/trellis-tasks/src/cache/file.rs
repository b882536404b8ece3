//! Content hash over a set of files

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use super::{CacheContext, CacheError, Fingerprint};

/// Always excluded from file caches
const IMPLICIT_EXCLUDE: &str = "**/node_modules/**";

/// Hashes the contents of every file matched by `include` and not by
/// `exclude`.
///
/// Patterns may use `{root}` for the monorepo root and `{workspace}` (or
/// `{cwd}`) for the workspace directory; relative patterns are resolved
/// against the workspace. Dotfiles are matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileCache {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FileCache {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Absolute, sorted list of matched files
    pub fn files(&self, ctx: &CacheContext) -> Result<BTreeSet<PathBuf>, CacheError> {
        let excluded = self.exclude_set(ctx)?;
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        let mut files = BTreeSet::new();
        for pattern in &self.include {
            let pattern = absolute_pattern(ctx, pattern);
            let paths = glob::glob_with(&pattern, options).map_err(|e| CacheError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

            for path in paths {
                let path = path?;
                if path.is_file() && !excluded.is_match(&path) {
                    files.insert(path);
                }
            }
        }

        Ok(files)
    }

    /// Hash every matched file, then fold the per-file hashes in path order
    pub fn hash(&self, ctx: &CacheContext) -> Result<Fingerprint, CacheError> {
        let files = self.files(ctx)?;
        let mut checksums = Vec::with_capacity(files.len());
        for file in &files {
            checksums.push(Fingerprint::of(fs::read(file)?).0);
        }

        debug!(
            workspace = %ctx.workspace.display(),
            files = files.len(),
            "hashed file cache"
        );
        Ok(Fingerprint::combine(checksums.iter().map(String::as_str)))
    }

    fn exclude_set(&self, ctx: &CacheContext) -> Result<GlobSet, CacheError> {
        let mut builder = GlobSetBuilder::new();
        builder.add(compile(IMPLICIT_EXCLUDE)?);
        for pattern in &self.exclude {
            builder.add(compile(&absolute_pattern(ctx, pattern))?);
        }
        builder.build().map_err(|e| CacheError::Pattern {
            pattern: self.exclude.join(", "),
            message: e.to_string(),
        })
    }
}

fn compile(pattern: &str) -> Result<Glob, CacheError> {
    Glob::new(pattern).map_err(|e| CacheError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn substitute(ctx: &CacheContext, pattern: &str) -> String {
    let root = escape(&ctx.root);
    let workspace = escape(&ctx.workspace);
    pattern
        .replace("{root}", &root)
        .replace("{workspace}", &workspace)
        .replace("{cwd}", &workspace)
}

fn absolute_pattern(ctx: &CacheContext, pattern: &str) -> String {
    let pattern = substitute(ctx, pattern);
    if Path::new(&pattern).is_absolute() {
        pattern
    } else {
        let base = escape(&ctx.workspace);
        let pattern = pattern.trim_start_matches("./");
        format!("{}/{}", base.trim_end_matches('/'), pattern)
    }
}

fn escape(path: &Path) -> String {
    glob::Pattern::escape(&path.to_string_lossy())
}
