//! Error taxonomy for pipeline compilation.

/// Buildpipe errors.
///
/// Configuration problems are reported before any step is compiled; external
/// command failures are fatal for the whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum BuildpipeError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("duplicate project name: {0}")]
    DuplicateProject(String),

    #[error("duplicate stair name: {0}")]
    DuplicateStair(String),

    #[error("unrecognized stair {stair} for project {project}")]
    UnknownStair { project: String, stair: String },

    #[error("stair {stair} has unknown scope {scope:?} (expected \"project\" or \"stair\")")]
    UnknownScope { stair: String, scope: String },

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("command `{command}` failed: {message}")]
    ExternalCommand { command: String, message: String },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildpipeError {
    /// Whether this error stems from the configuration rather than the
    /// environment the pipeline is compiled in.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BuildpipeError::InvalidConfig(_)
                | BuildpipeError::DuplicateProject(_)
                | BuildpipeError::DuplicateStair(_)
                | BuildpipeError::UnknownStair { .. }
                | BuildpipeError::UnknownScope { .. }
                | BuildpipeError::InvalidPattern { .. }
                | BuildpipeError::InvalidTimezone(_)
                | BuildpipeError::Yaml(_)
        )
    }
}

/// Result type for buildpipe operations.
pub type Result<T> = std::result::Result<T, BuildpipeError>;
