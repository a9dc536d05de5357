// src/package/matcher.rs
//! Exclusion pattern matching
//!
//! Patterns are regular expressions searched (not anchored) against a path
//! taken relative to the root of the tree being walked. Callers anchor a
//! pattern themselves when they need component matching, e.g. `^\.git/`
//! or `ignore/.*`.
//!
//! Subtrees are a second kind of rule: a literal relative path that excludes
//! itself and everything below it. A walker can prune a directory matching a
//! subtree without visiting its contents. User patterns are never used for
//! pruning, since they may match files inside a directory but not the
//! directory itself.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::Path;

/// A compiled, ordered set of exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
    subtrees: Vec<Regex>,
}

impl ExcludeSet {
    /// Compile a set of patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            subtrees: Vec::new(),
        })
    }

    /// An empty set that never excludes anything
    pub fn empty() -> Self {
        Self::default()
    }

    /// Return a new set with one more pattern appended
    pub fn with_pattern(&self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut set = self.clone();
        set.patterns.push(regex);
        Ok(set)
    }

    /// Return a new set that also excludes the relative path `subtree` and
    /// everything under it
    pub fn with_subtree(&self, subtree: &Path) -> Result<Self> {
        let pattern = anchored_literal(subtree);
        let regex = Regex::new(&pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut set = self.clone();
        set.subtrees.push(regex);
        Ok(set)
    }

    /// Check whether a relative path matches any pattern or subtree
    pub fn is_excluded(&self, relative_path: &Path) -> bool {
        if self.is_empty() {
            return false;
        }

        let path = relative_path.to_string_lossy();
        self.patterns.iter().chain(&self.subtrees).any(|re| re.is_match(&path))
    }

    /// Check whether a relative directory can be skipped without descending
    pub fn is_pruned(&self, relative_dir: &Path) -> bool {
        if self.subtrees.is_empty() || relative_dir.as_os_str().is_empty() {
            return false;
        }

        let path = relative_dir.to_string_lossy();
        self.subtrees.iter().any(|re| re.is_match(&path))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.subtrees.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len() + self.subtrees.len()
    }
}

/// Pattern matching `path` and everything under it, from the tree root
fn anchored_literal(path: &Path) -> String {
    format!(r"^{}([/\\]|$)", regex::escape(&path.to_string_lossy()))
}

/// One-shot check of a relative path against uncompiled patterns
pub fn is_excluded<S: AsRef<str>>(relative_path: &Path, patterns: &[S]) -> Result<bool> {
    Ok(ExcludeSet::new(patterns)?.is_excluded(relative_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_IGNORE: &[&str] = &["ignore/.*", "ignore-me.py", "tests"];
    const IGNORE_TEMP: &[&str] = &[r"^\.[^.].*", r".*\.pyc$"];

    #[test]
    fn test_empty_set_never_excludes() {
        let set = ExcludeSet::empty();
        assert!(!set.is_excluded(Path::new("foo.py")));
        assert!(!set.is_excluded(Path::new("")));
        assert!(!is_excluded::<&str>(Path::new("anything/at/all"), &[]).unwrap());
    }

    #[test]
    fn test_directory_pattern() {
        let set = ExcludeSet::new(TEST_IGNORE).unwrap();
        assert!(set.is_excluded(Path::new("ignore/foo.py")));
        // The directory name alone has no trailing component to match
        assert!(!set.is_excluded(Path::new("ignore")));
        assert!(!set.is_excluded(Path::new("bar/foo.py")));
    }

    #[test]
    fn test_file_pattern_does_not_leak_into_directory_pattern() {
        let set = ExcludeSet::new(&["ignore/.*"]).unwrap();
        assert!(!set.is_excluded(Path::new("ignore-me.py")));
    }

    #[test]
    fn test_dotfiles_and_bytecode() {
        let set = ExcludeSet::new(IGNORE_TEMP).unwrap();
        assert!(set.is_excluded(Path::new(".mydotfile")));
        assert!(set.is_excluded(Path::new("bar/foo.pyc")));
        assert!(!set.is_excluded(Path::new("pycharm")));
    }

    #[test]
    fn test_search_is_unanchored() {
        let set = ExcludeSet::new(&["test"]).unwrap();
        assert!(set.is_excluded(Path::new("src/contest.py")));
        assert!(set.is_excluded(Path::new("tests/a.py")));
        assert!(!set.is_excluded(Path::new("src/handler.py")));
    }

    #[test]
    fn test_subtree_escapes_metacharacters() {
        let set = ExcludeSet::empty().with_subtree(Path::new("lib/extra.d")).unwrap();
        assert!(set.is_excluded(Path::new("lib/extra.d/mod.py")));
        assert!(!set.is_excluded(Path::new("lib/extraXd/mod.py")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_with_pattern_leaves_base_untouched() {
        let base = ExcludeSet::new(&["a"]).unwrap();
        let extended = base.with_pattern("b").unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert!(!base.is_excluded(Path::new("b")));
        assert!(extended.is_excluded(Path::new("b")));
    }

    #[test]
    fn test_subtree_matches_directory_and_contents() {
        let set = ExcludeSet::empty().with_subtree(Path::new("venv")).unwrap();
        assert!(set.is_excluded(Path::new("venv")));
        assert!(set.is_excluded(Path::new("venv/lib/site.py")));
        assert!(!set.is_excluded(Path::new("venv2/lib/site.py")));
        assert!(!set.is_excluded(Path::new("src/venv/a.py")));
        assert!(set.is_pruned(Path::new("venv")));
        assert!(!set.is_pruned(Path::new("")));
    }

    #[test]
    fn test_user_patterns_never_prune() {
        let set = ExcludeSet::new(&["ignore/.*"]).unwrap();
        assert!(set.is_excluded(Path::new("ignore/foo.py")));
        assert!(!set.is_pruned(Path::new("ignore")));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ExcludeSet::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }
}
