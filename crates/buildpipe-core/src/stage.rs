//! Stair applicability: tag requirements and skip lists.

use crate::config::{Project, Stair};

/// Decides whether a stair runs for a project.
pub struct StageFilter;

impl StageFilter {
    /// Whether `stair` applies to `project`.
    ///
    /// Rules, in order:
    /// - a stair named in the project's skip lists never applies;
    /// - a stair without tags applies to everyone else;
    /// - otherwise requirements are checked in order: a requirement sharing
    ///   any tag with the skip lists vetoes the stair, and the first
    ///   requirement whose tags the project all carries admits it.
    ///
    /// Tags inside one requirement are ANDed; requirements are ORed.
    pub fn applies(stair: &Stair, project: &Project) -> bool {
        let skip = project.skip_set();
        if skip.contains(stair.name.as_str()) {
            return false;
        }
        if stair.tags.is_empty() {
            return true;
        }

        for requirement in &stair.tags {
            let tags = requirement.tags();
            if tags.iter().any(|tag| skip.contains(tag.as_str())) {
                return false;
            }
            if tags.iter().all(|tag| project.has_tag(tag)) {
                return true;
            }
        }
        false
    }

    /// The projects `stair` applies to, preserving input order.
    pub fn stair_projects<'a>(stair: &Stair, projects: &[&'a Project]) -> Vec<&'a Project> {
        projects
            .iter()
            .copied()
            .filter(|project| Self::applies(stair, project))
            .collect()
    }
}
