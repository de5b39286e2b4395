//! Exclusion policy for ingested content
//!
//! Patterns use ignore-file syntax: glob components, `**` for any depth,
//! leading `!` to re-include. The last matching pattern decides, and a
//! pattern matching a directory also covers everything below it.

use crate::error::{StowageError, StowageResult};
use crate::ingest::ignore::read_ignore_patterns;
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Effective exclude list: ignore-file patterns first, then explicit ones
///
/// Returns the ignore file that was used, if any.
pub fn effective_excludes(
    context_dir: Option<&Path>,
    ignore_file: Option<&Path>,
    explicit: &[String],
) -> StowageResult<(Vec<String>, Option<PathBuf>)> {
    let (mut patterns, used) = match (context_dir, ignore_file) {
        (Some(dir), file) => read_ignore_patterns(dir, file)?,
        (None, Some(_)) => return Err(StowageError::IgnoreFileWithoutContext),
        (None, None) => (vec![], None),
    };
    patterns.extend(explicit.iter().cloned());
    Ok((patterns, used))
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
}

/// Compiled exclude patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    rules: Vec<Rule>,
}

impl ExcludeMatcher {
    pub fn new(patterns: &[String]) -> StowageResult<Self> {
        let mut rules = Vec::new();
        for raw in patterns {
            let trimmed = raw.trim();
            let (negated, body) = match trimmed.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, trimmed),
            };
            let body = normalize(body);
            if body.is_empty() {
                continue;
            }
            let pattern = Pattern::new(&body).map_err(|e| StowageError::ExcludePattern {
                pattern: raw.clone(),
                reason: e.to_string(),
            })?;
            rules.push(Rule { pattern, negated });
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any pattern re-includes paths
    ///
    /// When none does, an excluded directory's subtree can be skipped.
    pub fn has_negations(&self) -> bool {
        self.rules.iter().any(|r| r.negated)
    }

    /// Whether `relative` (to the exclusion base) is excluded
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let path = slash_path(relative);
        if path.is_empty() {
            return false;
        }

        let mut excluded = false;
        for rule in &self.rules {
            if rule.matches(&path) {
                excluded = !rule.negated;
            }
        }
        excluded
    }
}

impl Rule {
    /// Match the path itself or any of its parent directories
    fn matches(&self, path: &str) -> bool {
        if self.pattern.matches_with(path, MATCH_OPTIONS) {
            return true;
        }
        path.match_indices('/')
            .any(|(i, _)| self.pattern.matches_with(&path[..i], MATCH_OPTIONS))
    }
}

/// Clean a pattern to the same shape as the paths it is matched against
fn normalize(pattern: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in pattern.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn matcher(patterns: &[&str]) -> ExcludeMatcher {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        ExcludeMatcher::new(&owned).unwrap()
    }

    #[test]
    fn tmp_files_excluded() {
        let m = matcher(&["*.tmp"]);
        assert!(m.is_excluded(Path::new("build.tmp")));
        assert!(!m.is_excluded(Path::new("build.rs")));
        // `*` does not cross directories
        assert!(!m.is_excluded(Path::new("sub/build.tmp")));
    }

    #[test]
    fn double_star_any_depth() {
        let m = matcher(&["**/*.tmp"]);
        assert!(m.is_excluded(Path::new("a/b/c.tmp")));
        assert!(m.is_excluded(Path::new("c.tmp")));
    }

    #[test]
    fn directory_pattern_covers_subtree() {
        let m = matcher(&["/target/"]);
        assert!(m.is_excluded(Path::new("target")));
        assert!(m.is_excluded(Path::new("target/debug/app")));
        assert!(!m.is_excluded(Path::new("src/target.rs")));
    }

    #[test]
    fn last_match_wins() {
        let m = matcher(&["*.md", "!README.md"]);
        assert!(m.is_excluded(Path::new("CHANGES.md")));
        assert!(!m.is_excluded(Path::new("README.md")));
        assert!(m.has_negations());

        let m = matcher(&["!README.md", "*.md"]);
        assert!(m.is_excluded(Path::new("README.md")));
    }

    #[test]
    fn root_never_excluded() {
        let m = matcher(&["*"]);
        assert!(!m.is_excluded(Path::new("")));
        assert!(m.is_excluded(Path::new("anything")));
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = ExcludeMatcher::new(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, StowageError::ExcludePattern { .. }));
    }

    #[test]
    fn ignore_file_patterns_come_first() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".containerignore"), "*.log\n").unwrap();

        let (patterns, used) =
            effective_excludes(Some(dir.path()), None, &["!keep.log".to_string()]).unwrap();
        assert_eq!(patterns, vec!["*.log", "!keep.log"]);
        assert!(used.is_some());
    }

    #[test]
    fn ignore_file_without_context() {
        let err = effective_excludes(None, Some(Path::new(".containerignore")), &[]).unwrap_err();
        assert!(matches!(err, StowageError::IgnoreFileWithoutContext));
    }
}
