//! Git integration: the current branch and the raw listing of changed files.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::runner::CommandRunner;

/// Environment variable naming the branch being built.
pub const ENV_BRANCH: &str = "BUILDKITE_BRANCH";

/// Environment variable naming the commit being built.
pub const ENV_COMMIT: &str = "BUILDKITE_COMMIT";

/// Default listing on a feature branch: every commit not yet on the remote.
pub const DEFAULT_DIFF_PR: &str = "log --name-only --no-merges --pretty=format: origin..HEAD";

/// Where the branch and the raw change listing come from.
///
/// The compiler only needs these two answers, which keeps it testable
/// without a repository.
pub trait ChangeSource {
    /// Name of the branch being built.
    fn current_branch(&self) -> Result<String>;

    /// Newline-delimited changed paths for `branch`.
    fn changed_files(
        &self,
        branch: &str,
        deploy_branch: &str,
        last_commit_only: bool,
    ) -> Result<String>;
}

/// [`ChangeSource`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitChangeSource {
    repo_dir: PathBuf,
    branch: Option<String>,
    commit: Option<String>,
    diff_default: Option<String>,
    diff_pr: Option<String>,
}

impl GitChangeSource {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            ..Self::default()
        }
    }

    /// Source for `repo_dir`, taking branch and commit from the Buildkite
    /// environment when set.
    pub fn from_env(repo_dir: impl Into<PathBuf>) -> Self {
        let mut source = Self::new(repo_dir);
        source.branch = non_empty_env(ENV_BRANCH);
        source.commit = non_empty_env(ENV_COMMIT);
        source
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Replace the deploy-branch listing command (git arguments).
    pub fn with_diff_default(mut self, command: impl Into<String>) -> Self {
        self.diff_default = Some(command.into());
        self
    }

    /// Replace the feature-branch listing command (git arguments).
    pub fn with_diff_pr(mut self, command: impl Into<String>) -> Self {
        self.diff_pr = Some(command.into());
        self
    }

    /// Git arguments that list the changes for `branch`.
    pub fn listing_args(
        &self,
        branch: &str,
        deploy_branch: &str,
        last_commit_only: bool,
    ) -> Vec<String> {
        if branch == deploy_branch {
            if let Some(command) = &self.diff_default {
                return split_git_args(command);
            }
            let commit = self.commit.as_deref().unwrap_or(branch);
            return split_git_args(&format!("log -m -1 --name-only --pretty=format: {commit}"));
        }

        if let Some(command) = &self.diff_pr {
            return split_git_args(command);
        }
        if last_commit_only {
            return split_git_args("log -1 --name-only --no-merges --pretty=format: HEAD");
        }
        split_git_args(DEFAULT_DIFF_PR)
    }

    fn git(&self, args: &[String]) -> Result<String> {
        CommandRunner::stdout("git", args, Some(&self.repo_dir))
    }
}

impl ChangeSource for GitChangeSource {
    fn current_branch(&self) -> Result<String> {
        let branch = match &self.branch {
            Some(branch) => branch.clone(),
            None => self
                .git(&split_git_args("rev-parse --abbrev-ref HEAD"))?
                .trim()
                .to_string(),
        };
        debug!(branch = %branch, "current branch");
        Ok(branch)
    }

    fn changed_files(
        &self,
        branch: &str,
        deploy_branch: &str,
        last_commit_only: bool,
    ) -> Result<String> {
        let args = self.listing_args(branch, deploy_branch, last_commit_only);
        self.git(&args)
    }
}

/// Split a command string into git arguments, dropping a leading `git`.
fn split_git_args(command: &str) -> Vec<String> {
    let mut args = command.split_whitespace().peekable();
    if args.peek() == Some(&"git") {
        args.next();
    }
    args.map(str::to_string).collect()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildpipeError;
    use std::fs;
    use std::path::Path;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn commit_file(repo_dir: &Path, path: &str, message: &str) {
        let full = repo_dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, message).unwrap();
        run_git(repo_dir, &["add", "."]);
        run_git(repo_dir, &["commit", "-m", message]);
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        commit_file(dir.path(), "README.md", "initial");
        dir
    }

    #[test]
    fn test_split_git_args() {
        assert_eq!(
            split_git_args("git diff --name-only  HEAD~1"),
            vec!["diff", "--name-only", "HEAD~1"]
        );
        assert_eq!(split_git_args("log -1"), vec!["log", "-1"]);
        assert!(split_git_args("").is_empty());
    }

    #[test]
    fn test_listing_args_deploy_branch_uses_commit() {
        let source = GitChangeSource::new(".").with_commit("abc123");
        let args = source.listing_args("master", "master", false);
        assert_eq!(
            args,
            vec!["log", "-m", "-1", "--name-only", "--pretty=format:", "abc123"]
        );
    }

    #[test]
    fn test_listing_args_deploy_branch_falls_back_to_branch() {
        let source = GitChangeSource::new(".");
        let args = source.listing_args("master", "master", true);
        assert_eq!(args.last().map(String::as_str), Some("master"));
    }

    #[test]
    fn test_listing_args_feature_branch() {
        let source = GitChangeSource::new(".");
        assert_eq!(
            source.listing_args("feature", "master", false),
            split_git_args(DEFAULT_DIFF_PR)
        );
        assert_eq!(
            source.listing_args("feature", "master", true),
            vec!["log", "-1", "--name-only", "--no-merges", "--pretty=format:", "HEAD"]
        );
    }

    #[test]
    fn test_listing_args_overrides() {
        let source = GitChangeSource::new(".")
            .with_diff_default("git diff --name-only HEAD~1")
            .with_diff_pr("diff --name-only origin/master...HEAD");
        assert_eq!(
            source.listing_args("master", "master", false),
            vec!["diff", "--name-only", "HEAD~1"]
        );
        assert_eq!(
            source.listing_args("feature", "master", true),
            vec!["diff", "--name-only", "origin/master...HEAD"]
        );
    }

    #[test]
    fn test_current_branch_from_repo() {
        let repo = make_git_repo();
        let source = GitChangeSource::new(repo.path());
        assert_eq!(source.current_branch().unwrap(), "master");
    }

    #[test]
    fn test_current_branch_override() {
        let repo = make_git_repo();
        let source = GitChangeSource::new(repo.path()).with_branch("release");
        assert_eq!(source.current_branch().unwrap(), "release");
    }

    #[test]
    fn test_changed_files_on_deploy_branch() {
        let repo = make_git_repo();
        commit_file(repo.path(), "api/main.py", "touch api");

        let source = GitChangeSource::new(repo.path());
        let raw = source.changed_files("master", "master", false).unwrap();
        let files: Vec<&str> = raw.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(files, vec!["api/main.py"]);
    }

    #[test]
    fn test_changed_files_last_commit_only() {
        let repo = make_git_repo();
        commit_file(repo.path(), "web/index.js", "touch web");
        commit_file(repo.path(), "api/main.py", "touch api");

        let source = GitChangeSource::new(repo.path());
        let raw = source.changed_files("feature", "master", true).unwrap();
        let files: Vec<&str> = raw.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(files, vec!["api/main.py"]);
    }

    #[test]
    fn test_bad_commit_is_external_command_error() {
        let repo = make_git_repo();
        let source = GitChangeSource::new(repo.path()).with_commit("does-not-exist");
        let err = source.changed_files("master", "master", false).unwrap_err();
        match err {
            BuildpipeError::ExternalCommand { command, message } => {
                assert!(command.starts_with("git log"));
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitChangeSource::new(dir.path());
        assert!(source.current_branch().is_err());
    }
}
