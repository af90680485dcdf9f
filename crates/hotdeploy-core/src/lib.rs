//! hotdeploy core library
//!
//! Turns GitLab push webhooks into per-repository deploys: sync the working
//! copy, provision the bundled `air` supervisor, and keep it running. Events
//! for one repository are processed strictly in order by a dedicated worker;
//! different repositories deploy concurrently.

pub mod assets;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod fakes;
pub mod obs;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod shutdown;
pub mod supervision;
pub mod telemetry;
pub mod toolchain;
pub mod worker;

pub use assets::{BundledAssets, SUPERVISOR_ARCHIVE, SUPERVISOR_BINARY};
pub use config::{RepositoryConfig, ServerConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use domain::{
    DeployJob, HotDeployError, PipelineError, PipelineStep, Result, ToolError, WebhookEvent,
};
pub use pipeline::{DeployPipeline, PipelineReport, SuperviseAction, SyncKind};
pub use process::SystemToolchain;
pub use registry::RepositoryRegistry;
pub use shutdown::Shutdown;
pub use telemetry::init_tracing;
pub use toolchain::{ExitSummary, SupervisorLaunch, SupervisorProcess, Toolchain};
pub use worker::QUEUE_CAPACITY;
