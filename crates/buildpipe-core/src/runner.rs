//! Synchronous execution of external commands (git, buildkite-agent).

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use tracing::debug;

use crate::error::{BuildpipeError, Result};

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Command line, for error messages.
    pub command: String,

    /// Exit code (-1 if killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout of a successful command, or an error carrying stderr.
    pub fn into_stdout(self) -> Result<String> {
        if self.passed() {
            return Ok(self.stdout);
        }
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            format!("exited with code {}", self.exit_code)
        } else {
            format!("exited with code {}: {}", self.exit_code, stderr)
        };
        Err(BuildpipeError::ExternalCommand {
            command: self.command,
            message,
        })
    }
}

/// Runs external commands once, without retry.
pub struct CommandRunner;

impl CommandRunner {
    /// Run `program` with `args`, optionally inside `dir`.
    ///
    /// Failing to spawn is an error; a non-zero exit is reported in the
    /// returned output.
    pub fn run<S: AsRef<str>>(
        program: &str,
        args: &[S],
        dir: Option<&Path>,
    ) -> Result<CommandOutput> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(command = %command, "running command");

        let start = Instant::now();
        let mut cmd = Command::new(program);
        cmd.args(&args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(|e| BuildpipeError::ExternalCommand {
            command: command.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        Ok(CommandOutput {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run a command and return its stdout, failing on non-zero exit.
    pub fn stdout<S: AsRef<str>>(program: &str, args: &[S], dir: Option<&Path>) -> Result<String> {
        Self::run(program, args, dir)?.into_stdout()
    }
}
