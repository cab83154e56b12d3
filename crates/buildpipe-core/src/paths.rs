//! Path matching primitives.
//!
//! Project paths are compared segment by segment so that `project1` never
//! claims files under `project10/`. Ignore rules use shell-style globs in
//! which `*` also crosses `/`.

use glob::Pattern;

use crate::error::{BuildpipeError, Result};

/// Path that matches every file in the repository.
pub const REPO_ROOT: &str = ".";

/// Split a root-relative path into normalized segments.
///
/// Empty segments (doubled or trailing slashes) and `.` segments are dropped,
/// so `./api//src/` yields `["api", "src"]`.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// Whether `changed` lies at or below `trigger`.
///
/// A trigger of `.` (or anything normalizing to it, like `./`) matches
/// everything. A trigger equal to the changed path itself also counts.
pub fn matches_prefix(trigger: &str, changed: &str) -> bool {
    let trigger_segments = path_segments(trigger);
    if trigger == REPO_ROOT || trigger_segments.is_empty() {
        return true;
    }
    let changed_segments = path_segments(changed);
    changed_segments.len() >= trigger_segments.len()
        && changed_segments[..trigger_segments.len()] == trigger_segments[..]
}

/// Compile a glob, mapping syntax errors into a configuration error.
///
/// `*` already crosses `/`, so a run of stars that is not a whole path
/// component (`**.md`, `docs**`) is collapsed to a single `*` first.
pub fn compile_glob(pattern: &str) -> Result<Pattern> {
    Pattern::new(&collapse_stars(pattern)).map_err(|e| BuildpipeError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn collapse_stars(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|component| {
            if component == "**" {
                return component.to_string();
            }
            let mut collapsed = String::with_capacity(component.len());
            for c in component.chars() {
                if c == '*' && collapsed.ends_with('*') {
                    continue;
                }
                collapsed.push(c);
            }
            collapsed
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A precompiled set of ignore globs.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    /// Compile every pattern, failing on the first invalid one.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| compile_glob(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether any pattern matches `path`.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}
