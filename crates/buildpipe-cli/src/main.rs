//! Buildpipe CLI
//!
//! The `buildpipe` command runs inside a Buildkite job. It reads the pipeline
//! configuration, works out which projects the current change touches,
//! writes the generated steps to a file and uploads them with
//! `buildkite-agent pipeline upload`. Nothing is written when no file changed
//! or no project is affected.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use buildpipe_core::upload::DEFAULT_OUTFILE;
use buildpipe_core::{
    init_tracing, parse_level, render_pipeline, write_pipeline, BuildPipeline, BuildkiteUploader,
    ChangeSource, GitChangeSource, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "buildpipe")]
#[command(author = "Buildpipe Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dynamically generate Buildkite pipelines for monorepos", long_about = None)]
struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, env = "BUILDKITE_PLUGIN_BUILDPIPE_INFILE")]
    infile: PathBuf,

    /// Where to write the generated pipeline
    #[arg(
        short,
        long,
        env = "BUILDKITE_PLUGIN_BUILDPIPE_OUTFILE",
        default_value = DEFAULT_OUTFILE
    )]
    outfile: PathBuf,

    /// Print the pipeline to stdout instead of writing and uploading it
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_DRY_RUN")]
    dry_run: bool,

    /// Repository to inspect for changes
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_REPO", default_value = ".")]
    repo: PathBuf,

    /// Git arguments listing changes on the deploy branch
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_DIFF_DEFAULT")]
    diff_default: Option<String>,

    /// Git arguments listing changes on other branches
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_DIFF_PR")]
    diff_pr: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "BUILDKITE_PLUGIN_BUILDPIPE_JSON")]
    json: bool,
}

/// What a successful invocation did.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// The change listing was empty; nothing was written or uploaded.
    NoChanges,
    /// No project was affected; nothing was written or uploaded.
    NothingAffected,
    /// Dry run: the pipeline went to stdout only. `steps` counts command steps.
    Printed { steps: usize },
    /// The pipeline was written to `path` and uploaded.
    Uploaded { path: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json, parse_level(&cli.log_level));

    let source = change_source(&cli);
    match run(&cli, &source, &BuildkiteUploader::default()) {
        Ok(Outcome::Uploaded { path }) => {
            info!(path = %path.display(), "pipeline generated");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Printed { steps }) => {
            info!(steps, "dry run, pipeline not written or uploaded");
            ExitCode::SUCCESS
        }
        Ok(Outcome::NoChanges | Outcome::NothingAffected) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "buildpipe failed");
            ExitCode::FAILURE
        }
    }
}

fn change_source(cli: &Cli) -> GitChangeSource {
    let mut source = GitChangeSource::from_env(&cli.repo);
    if let Some(command) = &cli.diff_default {
        source = source.with_diff_default(command);
    }
    if let Some(command) = &cli.diff_pr {
        source = source.with_diff_pr(command);
    }
    source
}

fn run(cli: &Cli, source: &dyn ChangeSource, uploader: &BuildkiteUploader) -> Result<Outcome> {
    let config = load_config(&cli.infile)?;
    let compiled = BuildPipeline::generate_from_source(&config, source, Utc::now())
        .with_context(|| format!("Failed to compile pipeline from {}", cli.infile.display()))?;

    if compiled.changed_files.is_empty() {
        info!("No files were changed");
        return Ok(Outcome::NoChanges);
    }
    if compiled.affected_projects.is_empty() {
        info!("No project was affected");
        return Ok(Outcome::NothingAffected);
    }

    if cli.dry_run {
        let rendered = render_pipeline(&compiled.steps).context("Failed to render pipeline")?;
        print!("{rendered}");
        return Ok(Outcome::Printed {
            steps: compiled.command_count(),
        });
    }

    write_pipeline(&compiled.steps, &cli.outfile)
        .with_context(|| format!("Failed to write {}", cli.outfile.display()))?;
    uploader
        .upload(&cli.outfile)
        .context("Failed to upload pipeline")?;
    Ok(Outcome::Uploaded {
        path: cli.outfile.clone(),
    })
}

/// Parse the config file. Validation happens once, during compilation.
fn load_config(path: &Path) -> Result<PipelineConfig> {
    PipelineConfig::from_path(path)
        .with_context(|| format!("Failed to read config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildpipe_core::{BuildpipeError, Result as CoreResult};
    use std::fs;

    const CONFIG: &str = r#"
stairs:
  - name: test
    scope: project
    buildkite:
      command: make test
projects:
  - name: api
    path: api
"#;

    struct FakeChangeSource(&'static str);

    impl ChangeSource for FakeChangeSource {
        fn current_branch(&self) -> CoreResult<String> {
            Ok("feature".to_string())
        }

        fn changed_files(&self, _: &str, _: &str, _: bool) -> CoreResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenChangeSource;

    impl ChangeSource for BrokenChangeSource {
        fn current_branch(&self) -> CoreResult<String> {
            Err(BuildpipeError::ExternalCommand {
                command: "git rev-parse --abbrev-ref HEAD".to_string(),
                message: "not a git repository".to_string(),
            })
        }

        fn changed_files(&self, _: &str, _: &str, _: bool) -> CoreResult<String> {
            Ok(String::new())
        }
    }

    fn cli_with(dir: &Path, config: &str, extra: &[&str]) -> Cli {
        let infile = dir.join("buildpipe.yml");
        fs::write(&infile, config).unwrap();
        let outfile = dir.join("pipeline_output.yml");

        let mut args = vec![
            "buildpipe".to_string(),
            "--infile".to_string(),
            infile.display().to_string(),
            "--outfile".to_string(),
            outfile.display().to_string(),
        ];
        args.extend(extra.iter().map(|a| a.to_string()));
        Cli::try_parse_from(args).unwrap()
    }

    fn cli_in(dir: &Path, extra: &[&str]) -> Cli {
        cli_with(dir, CONFIG, extra)
    }

    #[test]
    fn test_infile_is_required() {
        assert!(Cli::try_parse_from(["buildpipe"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["buildpipe", "--infile", "buildpipe.yml"]).unwrap();
        assert_eq!(cli.outfile, PathBuf::from(DEFAULT_OUTFILE));
        assert_eq!(cli.repo, PathBuf::from("."));
        assert_eq!(cli.log_level, "info");
        assert!(!cli.dry_run);
        assert!(cli.diff_default.is_none());
    }

    #[test]
    fn test_dry_run_neither_writes_nor_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path(), &["--dry-run"]);

        let outcome = run(&cli, &FakeChangeSource("api/main.py"), &BuildkiteUploader::new("false"))
            .unwrap();
        assert_eq!(outcome, Outcome::Printed { steps: 1 });
        assert!(!cli.outfile.exists());
    }

    #[test]
    fn test_uploads_generated_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path(), &[]);

        let outcome =
            run(&cli, &FakeChangeSource("api/main.py"), &BuildkiteUploader::new("true")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Uploaded {
                path: cli.outfile.clone()
            }
        );
        let written = fs::read_to_string(&cli.outfile).unwrap();
        assert!(written.contains("test api"));
    }

    #[test]
    fn test_nothing_affected_skips_output() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path(), &[]);

        let outcome =
            run(&cli, &FakeChangeSource("docs/README.md"), &BuildkiteUploader::new("false"))
                .unwrap();
        assert_eq!(outcome, Outcome::NothingAffected);
        assert!(!cli.outfile.exists());
    }

    #[test]
    fn test_no_changed_files_skips_output_for_root_project() {
        let config = r#"
stairs:
  - name: test
    scope: project
projects:
  - name: all
    path: .
"#;
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with(dir.path(), config, &[]);

        let outcome = run(&cli, &FakeChangeSource(""), &BuildkiteUploader::new("false")).unwrap();
        assert_eq!(outcome, Outcome::NoChanges);
        assert!(!cli.outfile.exists());

        let outcome =
            run(&cli, &FakeChangeSource("Makefile"), &BuildkiteUploader::new("true")).unwrap();
        assert!(matches!(outcome, Outcome::Uploaded { .. }));
    }

    #[test]
    fn test_invalid_config_is_error() {
        let config = r#"
stairs:
  - name: test
    scope: project
projects:
  - name: api
    path: api
    skip_stairs: [deploy]
"#;
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with(dir.path(), config, &[]);

        let err = run(&cli, &FakeChangeSource("api/main.py"), &BuildkiteUploader::new("true"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("unrecognized stair deploy"));
        assert!(!cli.outfile.exists());
    }

    #[test]
    fn test_upload_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path(), &[]);

        let err = run(&cli, &FakeChangeSource("api/main.py"), &BuildkiteUploader::new("false"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to upload pipeline"));
    }

    #[test]
    fn test_source_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path(), &[]);

        assert!(run(&cli, &BrokenChangeSource, &BuildkiteUploader::new("true")).is_err());
        assert!(!cli.outfile.exists());
    }

    #[test]
    fn test_missing_config_is_error() {
        let err = load_config(Path::new("/nonexistent/buildpipe.yml")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config"));
    }
}
