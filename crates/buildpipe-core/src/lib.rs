//! Buildpipe Core Library
//!
//! Compiles a monorepo pipeline configuration plus the set of changed files
//! into the Buildkite steps that actually need to run.
//!
//! The flow is:
//!
//! - [`ChangeSetResolver`] turns a raw listing into a [`ChangeSet`];
//! - [`ProjectAffectednessEngine`] picks the projects it touches;
//! - [`AutodeployGate`] decides whether deploy stairs may run now;
//! - [`StepCompiler`] expands each stair into steps, filtered by [`StageFilter`];
//! - [`upload`] renders the result and hands it to `buildkite-agent`.

pub mod affected;
pub mod changes;
pub mod config;
pub mod error;
pub mod gate;
pub mod git;
pub mod paths;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod step;
pub mod telemetry;
pub mod upload;

pub use affected::ProjectAffectednessEngine;
pub use changes::{ChangeSet, ChangeSetResolver};
pub use config::{
    BlacklistDates, DeployPolicy, PipelineConfig, Project, Scope, Stair, TagRequirement,
};
pub use error::{BuildpipeError, Result};
pub use gate::{AutodeployGate, AutodeployVerdict, DeployWindow};
pub use git::{ChangeSource, GitChangeSource};
pub use paths::IgnoreSet;
pub use pipeline::{BuildPipeline, CompiledPipeline, StepCompiler};
pub use runner::{CommandOutput, CommandRunner};
pub use stage::StageFilter;
pub use step::{merge_overrides, rewrite_trigger_env, Step};
pub use telemetry::{init_tracing, parse_level};
pub use upload::{render_pipeline, write_pipeline, BuildkiteUploader};
