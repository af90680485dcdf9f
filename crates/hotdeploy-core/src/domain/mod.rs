//! Domain models for hotdeploy.
//!
//! - `WebhookEvent`: a decoded GitLab push hook
//! - `DeployJob`: an event bound to its repository configuration
//! - error taxonomy for fatal, job-aborting and tool failures

pub mod error;
pub mod event;
pub mod job;

pub use error::{HotDeployError, PipelineError, PipelineStep, Result, ToolError};
pub use event::{CommitAuthor, HookCommit, HookRepository, WebhookEvent};
pub use job::DeployJob;
