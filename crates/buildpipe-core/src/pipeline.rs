//! Pipeline compilation: stairs × affected projects → ordered steps.

use chrono::{DateTime, Utc};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::affected::ProjectAffectednessEngine;
use crate::changes::{ChangeSet, ChangeSetResolver};
use crate::config::{PipelineConfig, Project, Scope, Stair};
use crate::error::Result;
use crate::gate::AutodeployGate;
use crate::git::ChangeSource;
use crate::paths::IgnoreSet;
use crate::stage::StageFilter;
use crate::step::{key, merge_overrides, rewrite_trigger_env, Step};

pub const ENV_STAIR_NAME: &str = "BUILDPIPE_STAIR_NAME";
pub const ENV_STAIR_SCOPE: &str = "BUILDPIPE_STAIR_SCOPE";
pub const ENV_PROJECT_NAME: &str = "BUILDPIPE_PROJECT_NAME";
pub const ENV_PROJECT_PATH: &str = "BUILDPIPE_PROJECT_PATH";

/// Result of compiling a configuration against a change set.
#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    /// Generated steps in execution order.
    pub steps: Vec<Step>,

    /// Names of affected projects, sorted.
    pub affected_projects: Vec<String>,

    /// Changed files after ignore filtering.
    pub changed_files: ChangeSet,

    /// Whether deploy stairs were allowed to run.
    pub autodeploy: bool,
}

impl CompiledPipeline {
    /// Number of command/trigger steps (waits and blocks excluded).
    pub fn command_count(&self) -> usize {
        self.steps.iter().filter(|s| s.as_command().is_some()).count()
    }
}

/// Expands stairs into steps for a fixed set of affected projects.
pub struct StepCompiler;

impl StepCompiler {
    /// Compile the step list.
    ///
    /// Stairs are processed in declaration order. A deploy stair is dropped
    /// entirely while `can_autodeploy` is false and does not count as the
    /// previous stair. A stair that applies to no project emits nothing but
    /// still becomes the previous stair, whose `continue_on_failure` decides
    /// the kind of wait marker the next emitted stair gets.
    pub fn compile(
        config: &PipelineConfig,
        affected: &[&Project],
        can_autodeploy: bool,
    ) -> Result<Vec<Step>> {
        let block = config.block_marker();
        let mut steps = Vec::new();
        let mut previous_continue_on_failure = false;

        for stair in &config.stairs {
            let scope = stair.scope()?;

            if stair.deploy && !can_autodeploy {
                info!(stair = %stair.name, "autodeploy gate closed, skipping deploy stair");
                continue;
            }

            let stair_projects = StageFilter::stair_projects(stair, affected);
            if stair_projects.is_empty() {
                debug!(stair = %stair.name, "no affected project for stair");
                previous_continue_on_failure = stair.continue_on_failure;
                continue;
            }

            steps.push(Step::wait(previous_continue_on_failure));
            if stair_projects.iter().any(|p| p.blocks(&stair.name)) {
                steps.push(Step::Block(block.clone()));
            }

            let generated: Vec<Mapping> = match scope {
                Scope::Project => stair_projects
                    .iter()
                    .map(|project| Self::project_step(stair, project))
                    .collect(),
                Scope::Stair => vec![Self::stair_step(stair)],
            };
            info!(
                stair = %stair.name,
                scope = %scope,
                steps = generated.len(),
                "generated stair steps"
            );

            for mut step in generated {
                Self::add_pipeline_env(&mut step, &config.env);
                Self::post_process(stair, &mut step);
                steps.push(Step::Command(step));
            }

            previous_continue_on_failure = stair.continue_on_failure;
        }

        Ok(steps)
    }

    /// One step of a per-project stair.
    fn project_step(stair: &Stair, project: &Project) -> Mapping {
        let emoji = stair.emoji().or_else(|| project.emoji()).unwrap_or("");
        let label = format!("{} {} {}", stair.name, project.name, emoji);

        let mut env = Mapping::new();
        env.insert(key(ENV_STAIR_NAME), key(&stair.name));
        env.insert(key(ENV_STAIR_SCOPE), key(Scope::Project.as_str()));
        env.insert(key(ENV_PROJECT_NAME), key(&project.name));
        env.insert(key(ENV_PROJECT_PATH), key(project.main_path()));
        for (name, value) in &project.env {
            if env.contains_key(name) {
                warn!(
                    project = %project.name,
                    env_key = ?name,
                    "project env cannot override a buildpipe variable"
                );
                continue;
            }
            env.insert(name.clone(), value.clone());
        }

        let mut step = Mapping::new();
        step.insert(key("label"), key(label.trim()));
        step.insert(key("env"), Value::Mapping(env));
        if stair.deploy {
            step.insert(key("concurrency"), Value::Number(1.into()));
            step.insert(
                key("concurrency_group"),
                key(&format!("{}-{}", stair.name, project.name)),
            );
        }
        step
    }

    /// The single step of a whole-pipeline stair.
    fn stair_step(stair: &Stair) -> Mapping {
        let label = format!("{} {}", stair.name, stair.emoji().unwrap_or(""));

        let mut env = Mapping::new();
        env.insert(key(ENV_STAIR_NAME), key(&stair.name));
        env.insert(key(ENV_STAIR_SCOPE), key(Scope::Stair.as_str()));

        let mut step = Mapping::new();
        step.insert(key("label"), key(label.trim()));
        step.insert(key("env"), Value::Mapping(env));
        step
    }

    /// Pipeline-wide env fills in keys the step does not set itself.
    fn add_pipeline_env(step: &mut Mapping, pipeline_env: &Mapping) {
        if pipeline_env.is_empty() {
            return;
        }
        if let Some(Value::Mapping(env)) = step.get_mut("env") {
            for (name, value) in pipeline_env {
                if !env.contains_key(name) {
                    env.insert(name.clone(), value.clone());
                }
            }
        }
    }

    /// Stair overrides, then the trigger env rewrite.
    fn post_process(stair: &Stair, step: &mut Mapping) {
        merge_overrides(step, &stair.buildkite);
        rewrite_trigger_env(step);
    }
}

/// End-to-end compilation from raw inputs.
pub struct BuildPipeline;

impl BuildPipeline {
    /// Validate `config`, resolve changes, find affected projects, consult
    /// the autodeploy gate at `now` and compile the steps.
    pub fn generate(
        config: &PipelineConfig,
        branch: &str,
        raw_changes: &str,
        now: DateTime<Utc>,
    ) -> Result<CompiledPipeline> {
        config.validate()?;
        Self::generate_validated(config, branch, raw_changes, now)
    }

    /// Like [`BuildPipeline::generate`], asking `source` for the branch and
    /// the change listing. A failing source aborts the whole run.
    pub fn generate_from_source(
        config: &PipelineConfig,
        source: &dyn ChangeSource,
        now: DateTime<Utc>,
    ) -> Result<CompiledPipeline> {
        config.validate()?;

        let branch = source.current_branch()?;
        let deploy_branch = config.deploy_branch();
        info!(branch = %branch, deploy_branch = %deploy_branch, "resolving changes");

        let raw = source.changed_files(&branch, deploy_branch, config.last_commit_only)?;
        Self::generate_validated(config, &branch, &raw, now)
    }

    fn generate_validated(
        config: &PipelineConfig,
        branch: &str,
        raw_changes: &str,
        now: DateTime<Utc>,
    ) -> Result<CompiledPipeline> {
        let ignore = IgnoreSet::new(&config.ignore)?;
        let changed_files =
            ChangeSetResolver::resolve_with(branch, config.deploy_branch(), raw_changes, &ignore);
        let affected = ProjectAffectednessEngine::affected(&config.projects, &changed_files);
        let autodeploy = AutodeployGate::can_autodeploy(&config.deploy, now)?;

        let steps = StepCompiler::compile(config, &affected, autodeploy)?;

        Ok(CompiledPipeline {
            steps,
            affected_projects: affected.iter().map(|p| p.name.clone()).collect(),
            changed_files,
            autodeploy,
        })
    }
}
