//! Error taxonomy for hotdeploy.
//!
//! [`HotDeployError`] is fatal: it stops the daemon before it starts serving.
//! [`ToolError`] and [`PipelineError`] abort a single job and are absorbed by
//! the repository worker that produced them.

use std::path::PathBuf;

/// Failures of an external command (git, tar, the supervisor binary).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Argument that git would parse as an option.
    #[error("refusing repository url {0:?}: it starts with '-'")]
    OptionLikeUrl(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The pipeline step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Clone,
    Pull,
    Provision,
    Launch,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Clone => "git clone",
            PipelineStep::Pull => "git pull",
            PipelineStep::Provision => "provision supervisor",
            PipelineStep::Launch => "launch supervisor",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job-aborting failure, carrying enough context to diagnose it from logs.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed for repository {repository}: {source}")]
pub struct PipelineError {
    pub repository: String,
    pub step: PipelineStep,
    #[source]
    pub source: ToolError,
}

impl PipelineError {
    pub fn new(repository: impl Into<String>, step: PipelineStep, source: ToolError) -> Self {
        Self {
            repository: repository.into(),
            step,
            source,
        }
    }
}

/// Fatal startup errors.
#[derive(Debug, thiserror::Error)]
pub enum HotDeployError {
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("bundled asset {name} unavailable: {reason}")]
    AssetUnavailable { name: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fatal startup operations.
pub type Result<T> = std::result::Result<T, HotDeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display_names_step_and_repository() {
        let err = PipelineError::new(
            "app",
            PipelineStep::Pull,
            ToolError::NonZeroExit {
                command: "git pull https://example.com/app.git".to_string(),
                exit_code: 1,
                stderr: "fatal: unable to access".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("git pull failed"));
        assert!(msg.contains("repository app"));
        assert!(msg.contains("unable to access"));
    }

    #[test]
    fn test_asset_unavailable_display() {
        let err = HotDeployError::AssetUnavailable {
            name: "air.tar.gz".to_string(),
            reason: "archive is empty".to_string(),
        };
        assert!(err.to_string().contains("air.tar.gz"));
        assert!(err.to_string().contains("archive is empty"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = HotDeployError::InvalidConfig("port must be non-zero".to_string());
        assert!(err.to_string().contains("invalid config"));
    }
}
