//! Workspace filters
//!
//! A filter selects workspaces by name, by directory name, or by absolute
//! location. Patterns are globs unless they are written as `/regex/`.
//! Location patterns are absolute paths, so for them only an explicit
//! `re:` prefix marks a regular expression.

use std::fmt;
use std::str::FromStr;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::config::{list_of, FilterEntry, OneOrMany};
use crate::error::ConfigError;

use super::workspace::{Workspace, WorkspaceKind};

/// Which part of the tree a filter applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterScope {
    /// The monorepo root package and every member workspace
    #[default]
    All,
    /// Only the monorepo root package
    Monorepo,
    /// Only member workspaces
    Workspace,
}

impl FilterScope {
    fn admits(self, kind: WorkspaceKind) -> bool {
        match self {
            Self::All => true,
            Self::Monorepo => kind == WorkspaceKind::Root,
            Self::Workspace => kind == WorkspaceKind::Member,
        }
    }
}

impl FromStr for FilterScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "monorepo" | "root" => Ok(Self::Monorepo),
            "workspace" => Ok(Self::Workspace),
            other => Err(ConfigError::UnknownFilterType(other.to_string())),
        }
    }
}

/// What a filter pattern is matched against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchKind {
    /// Workspace name
    #[default]
    Name,
    /// Last component of the workspace directory
    Directory,
    /// Absolute workspace directory
    Location,
}

impl FromStr for MatchKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "directory" | "dir" => Ok(Self::Directory),
            "location" | "cwd" => Ok(Self::Location),
            other => Err(ConfigError::UnknownMatchType(other.to_string())),
        }
    }
}

/// Compiled glob or regular expression
#[derive(Debug, Clone)]
pub enum Pattern {
    Any,
    Glob { source: String, matcher: GlobMatcher },
    Regex(Regex),
}

impl Pattern {
    /// Compile a pattern; `/.../` or `re:...` is a regular expression,
    /// anything else a glob
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        if let Some(expr) = source.strip_prefix("re:") {
            return Self::regex(source, expr);
        }
        if source.len() > 2 && source.starts_with('/') && source.ends_with('/') {
            return Self::regex(source, &source[1..source.len() - 1]);
        }
        Self::glob(source)
    }

    /// Compile a pattern matched against absolute paths. Only `re:...` is a
    /// regular expression, so `/repo/packages/` stays a glob.
    pub fn parse_path(source: &str) -> Result<Self, ConfigError> {
        match source.strip_prefix("re:") {
            Some(expr) => Self::regex(source, expr),
            None => Self::glob(source),
        }
    }

    fn regex(source: &str, expr: &str) -> Result<Self, ConfigError> {
        Regex::new(expr)
            .map(Self::Regex)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: source.to_string(),
                message: e.to_string(),
            })
    }

    fn glob(source: &str) -> Result<Self, ConfigError> {
        let glob = GlobBuilder::new(source)
            .literal_separator(false)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: source.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self::Glob {
            source: source.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// Test a candidate string
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Glob { matcher, .. } => matcher.is_match(candidate),
            Self::Regex(re) => re.is_match(candidate),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Glob { source, .. } => f.write_str(source),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// A single compiled filter
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub scope: FilterScope,
    pub match_kind: MatchKind,
    pub pattern: Pattern,
}

impl FilterSpec {
    /// Compile a filter from its configuration parts
    pub fn from_parts(
        scope: Option<&str>,
        match_kind: Option<&str>,
        pattern: &str,
    ) -> Result<Self, ConfigError> {
        let match_kind: MatchKind = match_kind.map(str::parse).transpose()?.unwrap_or_default();
        let pattern = match match_kind {
            MatchKind::Location => Pattern::parse_path(pattern)?,
            MatchKind::Name | MatchKind::Directory => Pattern::parse(pattern)?,
        };
        Ok(Self {
            scope: scope.map(str::parse).transpose()?.unwrap_or_default(),
            match_kind,
            pattern,
        })
    }

    /// Compile a configuration entry
    pub fn from_entry(entry: &FilterEntry) -> Result<Self, ConfigError> {
        match entry {
            FilterEntry::Pattern(pattern) => Self::from_parts(None, None, pattern),
            FilterEntry::Spec(spec) => Self::from_parts(
                spec.scope.as_deref(),
                spec.match_kind.as_deref(),
                &spec.pattern,
            ),
        }
    }

    /// Name filter over all workspaces
    pub fn name(pattern: &str) -> Result<Self, ConfigError> {
        Self::from_parts(None, None, pattern)
    }

    /// Check a workspace against this filter
    pub fn matches(&self, workspace: &Workspace) -> bool {
        if !self.scope.admits(workspace.kind) {
            return false;
        }

        match self.match_kind {
            MatchKind::Name => self.pattern.is_match(&workspace.name),
            MatchKind::Directory => workspace
                .path
                .file_name()
                .is_some_and(|name| self.pattern.is_match(&name.to_string_lossy())),
            MatchKind::Location => self.pattern.is_match(&workspace.path.to_string_lossy()),
        }
    }
}

/// Include/exclude filter: a workspace passes when it matches any include
/// (or there are none) and no exclude
#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilter {
    include: Vec<FilterSpec>,
    exclude: Vec<FilterSpec>,
}

impl WorkspaceFilter {
    /// Build from compiled specs
    pub fn new(include: Vec<FilterSpec>, exclude: Vec<FilterSpec>) -> Self {
        Self { include, exclude }
    }

    /// Compile `include`/`exclude` configuration fields
    pub fn from_config(
        include: Option<&OneOrMany<FilterEntry>>,
        exclude: Option<&OneOrMany<FilterEntry>>,
    ) -> Result<Self, ConfigError> {
        let compile = |entries: Option<&OneOrMany<FilterEntry>>| {
            list_of(&entries.cloned())
                .iter()
                .map(FilterSpec::from_entry)
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Include-only name filter, as passed on the command line
    pub fn from_patterns(patterns: &[String]) -> Result<Self, ConfigError> {
        let include = patterns
            .iter()
            .map(|p| FilterSpec::name(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(include, Vec::new()))
    }

    /// Filter restricted to one scope
    pub fn scope(scope: FilterScope) -> Self {
        let include = FilterSpec {
            scope,
            match_kind: MatchKind::Name,
            pattern: Pattern::Any,
        };
        Self::new(vec![include], Vec::new())
    }

    /// Whether the filter selects everything
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether any include selects the workspace
    pub fn includes(&self, workspace: &Workspace) -> bool {
        self.include.iter().any(|f| f.matches(workspace))
    }

    /// Whether any exclude rejects the workspace
    pub fn excludes(&self, workspace: &Workspace) -> bool {
        self.exclude.iter().any(|f| f.matches(workspace))
    }

    /// Check a workspace
    pub fn matches(&self, workspace: &Workspace) -> bool {
        if !self.include.is_empty() && !self.includes(workspace) {
            return false;
        }

        !self.excludes(workspace)
    }
}

/// Layered workspace selection.
///
/// Required filters must all pass. Levels are then walked from highest
/// priority down: the first level whose include matches selects the
/// workspace, the first whose exclude matches rejects it. A workspace no
/// level decides on passes unless some level declared an include.
#[derive(Debug, Clone, Default)]
pub struct PriorityFilter {
    required: Vec<WorkspaceFilter>,
    levels: Vec<WorkspaceFilter>,
}

impl PriorityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter every workspace must pass
    pub fn require(mut self, filter: WorkspaceFilter) -> Self {
        if !filter.is_empty() {
            self.required.push(filter);
        }
        self
    }

    /// Add the next lower priority level; empty filters are dropped
    pub fn push(&mut self, filter: WorkspaceFilter) {
        if !filter.is_empty() {
            self.levels.push(filter);
        }
    }

    /// Builder form of [`PriorityFilter::push`]
    pub fn with(mut self, filter: WorkspaceFilter) -> Self {
        self.push(filter);
        self
    }

    /// Check a workspace
    pub fn matches(&self, workspace: &Workspace) -> bool {
        if !self.required.iter().all(|f| f.matches(workspace)) {
            return false;
        }

        for level in &self.levels {
            if level.includes(workspace) {
                return true;
            }
            if level.excludes(workspace) {
                return false;
            }
        }

        self.levels.iter().all(|level| level.include.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSpecConfig;
    use std::path::PathBuf;

    fn workspace(name: &str, dir: &str) -> Workspace {
        Workspace::new(name, PathBuf::from("/repo").join(dir), PathBuf::from("/repo"))
    }

    #[test]
    fn test_name_glob() {
        let spec = FilterSpec::name("pkg-*").unwrap();
        assert!(spec.matches(&workspace("pkg-a", "packages/a")));
        assert!(!spec.matches(&workspace("app", "apps/app")));
    }

    #[test]
    fn test_scoped_name_glob_crosses_slash() {
        let spec = FilterSpec::name("@acme/*").unwrap();
        assert!(spec.matches(&workspace("@acme/ui", "packages/ui")));
    }

    #[test]
    fn test_regex_pattern() {
        let spec = FilterSpec::name("/^pkg[0-9]$/").unwrap();
        assert!(spec.matches(&workspace("pkg2", "packages/pkg2")));
        assert!(!spec.matches(&workspace("pkg22", "packages/pkg22")));
    }

    #[test]
    fn test_directory_and_location() {
        let ws = workspace("@acme/ui", "packages/ui");
        let dir = FilterSpec::from_parts(None, Some("directory"), "ui").unwrap();
        let loc = FilterSpec::from_parts(None, Some("location"), "/repo/packages/**").unwrap();
        assert!(dir.matches(&ws));
        assert!(loc.matches(&ws));

        let app = workspace("web", "apps/web");
        assert!(!dir.matches(&app));
        assert!(!loc.matches(&app));

        let nested = FilterSpec::from_parts(None, Some("directory"), "packages/*").unwrap();
        assert!(!nested.matches(&ws));
    }

    #[test]
    fn test_location_slashes_are_a_glob() {
        let ws = workspace("ui", "packages/ui");
        let loc = FilterSpec::from_parts(None, Some("location"), "/repo/packages/").unwrap();
        assert!(matches!(loc.pattern, Pattern::Glob { .. }));
        assert!(!loc.matches(&ws));

        let re = FilterSpec::from_parts(None, Some("location"), "re:^/repo/packages/").unwrap();
        assert!(matches!(re.pattern, Pattern::Regex(_)));
        assert!(re.matches(&ws));

        let name = FilterSpec::name("re:^u").unwrap();
        assert!(name.matches(&ws));
    }

    #[test]
    fn test_unknown_match_type() {
        let err = FilterSpec::from_parts(None, Some("colour"), "*").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMatchType(ref m) if m == "colour"));
    }

    #[test]
    fn test_scope() {
        let mut root = workspace("repo", "");
        root.kind = WorkspaceKind::Root;
        let member = workspace("lib", "packages/lib");

        let only_members = WorkspaceFilter::scope(FilterScope::Workspace);
        assert!(!only_members.matches(&root));
        assert!(only_members.matches(&member));

        let only_root = WorkspaceFilter::scope(FilterScope::Monorepo);
        assert!(only_root.matches(&root));
        assert!(!only_root.matches(&member));
    }

    #[test]
    fn test_include_exclude() {
        let include = OneOrMany::One(FilterEntry::Pattern("pkg-*".to_string()));
        let exclude = OneOrMany::Many(vec![FilterEntry::Spec(FilterSpecConfig {
            scope: None,
            match_kind: Some("directory".to_string()),
            pattern: "old-*".to_string(),
        })]);
        let filter = WorkspaceFilter::from_config(Some(&include), Some(&exclude)).unwrap();

        assert!(filter.matches(&workspace("pkg-a", "packages/a")));
        assert!(!filter.matches(&workspace("pkg-old", "legacy/old-api")));
        assert!(!filter.matches(&workspace("other", "packages/other")));
    }

    fn level(include: &[&str], exclude: &[&str]) -> WorkspaceFilter {
        let specs = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| FilterSpec::name(p).unwrap())
                .collect::<Vec<_>>()
        };
        WorkspaceFilter::new(specs(include), specs(exclude))
    }

    #[test]
    fn test_priority_filter_required_all_pass() {
        let filter = PriorityFilter::new()
            .require(WorkspaceFilter::from_patterns(&["pkg-*".to_string()]).unwrap())
            .require(WorkspaceFilter::from_patterns(&["*-a".to_string()]).unwrap());

        assert!(filter.matches(&workspace("pkg-a", "packages/a")));
        assert!(!filter.matches(&workspace("pkg-b", "packages/b")));
    }

    #[test]
    fn test_priority_filter_higher_include_overrides_lower_exclude() {
        let filter = PriorityFilter::new()
            .with(level(&["docs"], &[]))
            .with(level(&[], &["docs", "legacy"]));

        assert!(filter.matches(&workspace("docs", "packages/docs")));
        assert!(!filter.matches(&workspace("legacy", "packages/legacy")));
        assert!(!filter.matches(&workspace("web", "apps/web")));
    }

    #[test]
    fn test_priority_filter_higher_exclude_wins() {
        let filter = PriorityFilter::new()
            .with(level(&[], &["docs"]))
            .with(level(&["*"], &[]));

        assert!(!filter.matches(&workspace("docs", "packages/docs")));
        assert!(filter.matches(&workspace("web", "apps/web")));
    }

    #[test]
    fn test_priority_filter_undecided_passes_without_includes() {
        let filter = PriorityFilter::new().with(level(&[], &["docs"]));
        assert!(filter.matches(&workspace("web", "apps/web")));
        assert!(PriorityFilter::new().matches(&workspace("web", "apps/web")));

        let required = PriorityFilter::new()
            .require(WorkspaceFilter::scope(FilterScope::Workspace))
            .with(level(&["docs"], &[]));
        let mut root = workspace("docs", "");
        root.kind = WorkspaceKind::Root;
        assert!(!required.matches(&root));
    }
}
