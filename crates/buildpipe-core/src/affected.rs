//! Which projects a change set touches.

use tracing::info;

use crate::changes::ChangeSet;
use crate::config::Project;
use crate::paths::matches_prefix;

/// Affectedness check over declared projects.
pub struct ProjectAffectednessEngine;

impl ProjectAffectednessEngine {
    /// Whether any trigger path of `project` covers any changed file.
    ///
    /// Trigger paths are the project's own paths plus its declared
    /// dependencies; dependencies are not followed any further. A project
    /// rooted at `.` is affected by any change, but not by an empty set.
    pub fn is_affected(project: &Project, changed: &ChangeSet) -> bool {
        project
            .trigger_paths()
            .any(|trigger| changed.iter().any(|file| matches_prefix(trigger, file)))
    }

    /// Affected projects, ordered by name so output is reproducible.
    pub fn affected<'a>(projects: &'a [Project], changed: &ChangeSet) -> Vec<&'a Project> {
        let mut affected: Vec<&Project> = projects
            .iter()
            .filter(|project| Self::is_affected(project, changed))
            .collect();
        affected.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            affected = ?affected.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "affected projects"
        );
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(paths: &[&str]) -> ChangeSet {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn names<'a>(projects: &[&'a Project]) -> Vec<&'a str> {
        projects.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_segment_boundary() {
        let project = Project::new("project1", "project1");
        assert!(!ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["project10/file.py"])
        ));
        assert!(ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["project1/sub/file.py"])
        ));
        assert!(ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["project1"])
        ));
    }

    #[test]
    fn test_dependency_paths_affect_project() {
        let project = Project::new("api", "services/api").with_dependencies(["libs/common"]);
        assert!(ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["libs/common/util.py"])
        ));
        assert!(!ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["libs/other/util.py"])
        ));
    }

    #[test]
    fn test_root_path_matches_any_change() {
        let project = Project::new("everything", ".");
        assert!(ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["Makefile"])
        ));
    }

    #[test]
    fn test_root_path_not_affected_without_changes() {
        let project = Project::new("everything", ".");
        assert!(!ProjectAffectednessEngine::is_affected(&project, &ChangeSet::new()));
    }

    #[test]
    fn test_project_without_paths_never_matches() {
        let mut project = Project::new("ghost", "ghost");
        project.path.clear();
        assert!(!ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["ghost/file"])
        ));
    }

    #[test]
    fn test_affected_sorted_by_name() {
        let projects = vec![
            Project::new("zeta", "zeta"),
            Project::new("alpha", "alpha"),
            Project::new("mid", "mid"),
        ];
        let changed = changes(&["zeta/a", "alpha/b", "other/c"]);
        let affected = ProjectAffectednessEngine::affected(&projects, &changed);
        assert_eq!(names(&affected), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_multiple_paths() {
        let mut project = Project::new("worker", "services/worker");
        project.path.push("scripts/worker".to_string());
        assert!(ProjectAffectednessEngine::is_affected(
            &project,
            &changes(&["scripts/worker/run.sh"])
        ));
    }
}
