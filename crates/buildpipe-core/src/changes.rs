//! Change set resolution from a raw change listing.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Result;
use crate::paths::IgnoreSet;

/// Deduplicated, non-empty changed paths in lexicographic order.
pub type ChangeSet = BTreeSet<String>;

/// Turns the output of the change-listing command into a [`ChangeSet`].
pub struct ChangeSetResolver;

impl ChangeSetResolver {
    /// Resolve the changed files for `branch`.
    ///
    /// On the deploy branch the listing comes from a merge-aware log of the
    /// last commit, where each parent's files form a block separated by a
    /// blank line. Only the first block belongs to the commit being built.
    /// On any other branch every listed file counts.
    pub fn resolve<S: AsRef<str>>(
        branch: &str,
        deploy_branch: &str,
        raw: &str,
        ignore: &[S],
    ) -> Result<ChangeSet> {
        let ignore = IgnoreSet::new(ignore)?;
        Ok(Self::resolve_with(branch, deploy_branch, raw, &ignore))
    }

    /// Same as [`ChangeSetResolver::resolve`] with precompiled ignore globs.
    pub fn resolve_with(
        branch: &str,
        deploy_branch: &str,
        raw: &str,
        ignore: &IgnoreSet,
    ) -> ChangeSet {
        let lines = raw.lines().map(|line| line.trim_end_matches('\r'));

        let listed: Vec<&str> = if branch == deploy_branch {
            lines.take_while(|line| !line.is_empty()).collect()
        } else {
            lines.collect()
        };

        let listed: ChangeSet = listed
            .into_iter()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let changed = Self::filter_ignored(&listed, ignore);

        debug!(branch, deploy_branch, changed = ?changed, "resolved change set");
        changed
    }

    /// Drop every path matching an ignore glob.
    pub fn filter_ignored(changed: &ChangeSet, ignore: &IgnoreSet) -> ChangeSet {
        changed
            .iter()
            .filter(|path| !ignore.is_ignored(path))
            .cloned()
            .collect()
    }
}
