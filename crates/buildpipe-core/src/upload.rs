//! Rendering the generated pipeline and handing it to the Buildkite agent.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::Result;
use crate::runner::CommandRunner;
use crate::step::Step;

/// Default artifact path, relative to the working directory.
pub const DEFAULT_OUTFILE: &str = "pipeline_output.yml";

/// Default agent binary used for uploads.
pub const DEFAULT_AGENT: &str = "buildkite-agent";

#[derive(Serialize)]
struct PipelineDocument<'a> {
    steps: &'a [Step],
}

/// Render `steps` as a pipeline document (`steps: [...]`).
pub fn render_pipeline(steps: &[Step]) -> Result<String> {
    Ok(serde_yaml::to_string(&PipelineDocument { steps })?)
}

/// Render `steps` and write them to `path`, replacing any existing file.
///
/// The document is written next to `path` and renamed into place, so a
/// failed write never leaves a truncated pipeline behind.
pub fn write_pipeline(steps: &[Step], path: &Path) -> Result<()> {
    let rendered = render_pipeline(steps)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(rendered.as_bytes())?;
    staged.flush()?;
    staged.persist(path).map_err(|e| e.error)?;
    info!(path = %path.display(), steps = steps.len(), "wrote pipeline");
    Ok(())
}

/// Uploads a pipeline file with `buildkite-agent pipeline upload`.
#[derive(Debug, Clone)]
pub struct BuildkiteUploader {
    agent: PathBuf,
}

impl Default for BuildkiteUploader {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT)
    }
}

impl BuildkiteUploader {
    pub fn new(agent: impl Into<PathBuf>) -> Self {
        Self {
            agent: agent.into(),
        }
    }

    pub fn upload(&self, path: &Path) -> Result<()> {
        let agent = self.agent.to_string_lossy();
        let target = path.to_string_lossy();
        CommandRunner::stdout(&agent, &["pipeline", "upload", &*target], None)?;
        info!(path = %path.display(), "uploaded pipeline");
        Ok(())
    }
}
