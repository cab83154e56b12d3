//! Pipeline configuration: projects, stairs and the deploy policy.
//!
//! The configuration is read from YAML into typed structs and then checked by
//! [`PipelineConfig::validate`]. Older schema spellings (`stages`, `label`,
//! `block_steps`) are accepted as aliases of the canonical field names.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{BuildpipeError, Result};
use crate::gate::DeployWindow;
use crate::paths::{IgnoreSet, REPO_ROOT};

/// Branch treated as the deploy branch when the config names none.
pub const DEFAULT_DEPLOY_BRANCH: &str = "master";

/// Block marker label used when the config has no `block` template.
pub const DEFAULT_BLOCK_LABEL: &str = ":rocket: Release!";

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// A logical subtree of the repository with its own lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Project {
    /// Unique project name.
    #[serde(alias = "label")]
    pub name: String,

    /// Root-relative path prefixes owned by the project. The first one is the
    /// main path exported to steps.
    #[serde(deserialize_with = "string_or_list")]
    pub path: Vec<String>,

    /// Extra path prefixes whose changes also affect this project.
    #[serde(default, deserialize_with = "string_or_list")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Stair names or tags this project opts out of.
    #[serde(default, deserialize_with = "string_or_list")]
    pub skip: Vec<String>,

    /// Stair names this project opts out of.
    #[serde(default, deserialize_with = "string_or_list")]
    pub skip_stairs: Vec<String>,

    /// Stair names that need a manual block step before running.
    #[serde(default, alias = "block_steps", deserialize_with = "string_or_list")]
    pub block_stairs: Vec<String>,

    #[serde(default)]
    pub env: Mapping,

    #[serde(default)]
    pub emoji: Option<String>,
}

impl Project {
    /// Create a project owning a single path.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: vec![path.into()],
            dependencies: Vec::new(),
            tags: Vec::new(),
            skip: Vec::new(),
            skip_stairs: Vec::new(),
            block_stairs: Vec::new(),
            env: Mapping::new(),
            emoji: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skip<I, S>(mut self, skip: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip = skip.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// The path exported as `BUILDPIPE_PROJECT_PATH`.
    pub fn main_path(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or(REPO_ROOT)
    }

    /// Own paths followed by dependency paths.
    pub fn trigger_paths(&self) -> impl Iterator<Item = &str> {
        self.path
            .iter()
            .chain(self.dependencies.iter())
            .map(String::as_str)
    }

    /// Union of `skip` and `skip_stairs`.
    pub fn skip_set(&self) -> BTreeSet<&str> {
        self.skip
            .iter()
            .chain(self.skip_stairs.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether this project wants a block step before `stair`.
    pub fn blocks(&self, stair: &str) -> bool {
        self.block_stairs.iter().any(|s| s == stair)
    }

    pub fn emoji(&self) -> Option<&str> {
        non_empty(self.emoji.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Stairs
// ---------------------------------------------------------------------------

/// How a stair expands into steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One step per affected project.
    Project,
    /// A single step for the whole pipeline.
    Stair,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Stair => "stair",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "project" => Ok(Scope::Project),
            "stair" => Ok(Scope::Stair),
            other => Err(other.to_string()),
        }
    }
}

/// One entry of a stair's `tags` list.
///
/// A single tag, or a list of tags that a project must carry all of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TagRequirement {
    One(String),
    All(Vec<String>),
}

impl TagRequirement {
    pub fn tags(&self) -> &[String] {
        match self {
            TagRequirement::One(tag) => std::slice::from_ref(tag),
            TagRequirement::All(tags) => tags,
        }
    }
}

/// One logical phase of the generated pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Stair {
    pub name: String,

    /// Raw scope; see [`Stair::scope`].
    pub scope: String,

    /// Deploy stairs only run while the autodeploy gate is open.
    #[serde(default)]
    pub deploy: bool,

    #[serde(default)]
    pub tags: Vec<TagRequirement>,

    /// Lets the stair after this one run even if this one failed.
    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub emoji: Option<String>,

    /// Step properties merged into every step generated for this stair.
    #[serde(default)]
    pub buildkite: Mapping,
}

impl Stair {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope: scope.as_str().to_string(),
            deploy: false,
            tags: Vec::new(),
            continue_on_failure: false,
            emoji: None,
            buildkite: Mapping::new(),
        }
    }

    pub fn as_deploy(mut self) -> Self {
        self.deploy = true;
        self
    }

    pub fn with_tags(mut self, tags: Vec<TagRequirement>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    /// Set one key of the override block.
    pub fn with_override(mut self, key: &str, value: Value) -> Self {
        self.buildkite.insert(Value::String(key.to_string()), value);
        self
    }

    /// Parsed scope. An unrecognized value is an error, never a silent skip.
    pub fn scope(&self) -> Result<Scope> {
        self.scope.parse().map_err(|scope| BuildpipeError::UnknownScope {
            stair: self.name.clone(),
            scope,
        })
    }

    pub fn emoji(&self) -> Option<&str> {
        non_empty(self.emoji.as_deref())
    }

    /// Every tag mentioned by any requirement.
    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .flat_map(|req| req.tags().iter().map(String::as_str))
    }
}

// ---------------------------------------------------------------------------
// Deploy policy
// ---------------------------------------------------------------------------

/// Dates on which autodeploy is never allowed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BlacklistDates {
    /// Exact `MM-DD` dates.
    Dates(Vec<String>),
    /// A regex prefix-matched against `MM-DD`.
    Pattern(String),
}

/// When deploy stairs may run automatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeployPolicy {
    /// Deploy (default) branch. Defaults to `master`.
    #[serde(default)]
    pub branch: Option<String>,

    /// IANA timezone name. Defaults to UTC.
    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub allowed_hours_regex: Option<String>,

    #[serde(default)]
    pub allowed_weekdays_regex: Option<String>,

    #[serde(default)]
    pub blacklist_dates: Option<BlacklistDates>,
}

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Parsed buildpipe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub deploy: DeployPolicy,

    /// Globs of changed files that never affect a project.
    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(alias = "stages")]
    pub stairs: Vec<Stair>,

    pub projects: Vec<Project>,

    /// Template for block markers.
    #[serde(default)]
    pub block: Option<Mapping>,

    /// Only diff the last commit on feature branches.
    #[serde(default)]
    pub last_commit_only: bool,

    /// Env merged into every generated step without overriding step keys.
    #[serde(default)]
    pub env: Mapping,
}

impl PipelineConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn deploy_branch(&self) -> &str {
        self.deploy
            .branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_DEPLOY_BRANCH)
    }

    /// The block marker template, or the default one.
    pub fn block_marker(&self) -> Mapping {
        match &self.block {
            Some(block) if !block.is_empty() => block.clone(),
            _ => {
                let mut block = Mapping::new();
                block.insert(
                    Value::String("block".to_string()),
                    Value::String(DEFAULT_BLOCK_LABEL.to_string()),
                );
                block
            }
        }
    }

    /// Check the configuration before anything is compiled.
    ///
    /// Unknown `skip` entries only warn since they may name tags; unknown
    /// `skip_stairs` and `block_stairs` entries are errors.
    pub fn validate(&self) -> Result<()> {
        let mut stair_names = BTreeSet::new();
        for stair in &self.stairs {
            if stair.name.is_empty() {
                return Err(BuildpipeError::InvalidConfig(
                    "stair name must not be empty".to_string(),
                ));
            }
            if !stair_names.insert(stair.name.as_str()) {
                return Err(BuildpipeError::DuplicateStair(stair.name.clone()));
            }
            stair.scope()?;
        }
        let stair_tags: BTreeSet<&str> = self.stairs.iter().flat_map(|s| s.all_tags()).collect();

        let mut project_names = BTreeSet::new();
        for project in &self.projects {
            if project.name.is_empty() {
                return Err(BuildpipeError::InvalidConfig(
                    "project name must not be empty".to_string(),
                ));
            }
            if !project_names.insert(project.name.as_str()) {
                return Err(BuildpipeError::DuplicateProject(project.name.clone()));
            }
            if project.path.is_empty() {
                return Err(BuildpipeError::InvalidConfig(format!(
                    "project {} needs at least one path",
                    project.name
                )));
            }
            for stair in project.skip_stairs.iter().chain(&project.block_stairs) {
                if !stair_names.contains(stair.as_str()) {
                    return Err(BuildpipeError::UnknownStair {
                        project: project.name.clone(),
                        stair: stair.clone(),
                    });
                }
            }
            for entry in &project.skip {
                if !stair_names.contains(entry.as_str()) && !stair_tags.contains(entry.as_str()) {
                    warn!(
                        project = %project.name,
                        skip = %entry,
                        "skip entry matches no stair name or tag"
                    );
                }
            }
        }

        IgnoreSet::new(&self.ignore)?;
        DeployWindow::from_policy(&self.deploy)?;
        Ok(())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Accept either a single string or a list of strings.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}
