//! hotdeployd - GitLab webhook listener that keeps Go services hot-reloading
//!
//! On each push hook for a configured repository the daemon clones or pulls
//! the repository, provisions the bundled `air` supervisor next to it, and
//! keeps `air` running so the service rebuilds on every change.

mod server;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hotdeploy_core::telemetry::json_requested;
use hotdeploy_core::{
    BundledAssets, DeployPipeline, Dispatcher, RepositoryRegistry, ServerConfig, Shutdown,
    SystemToolchain,
};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "hotdeployd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy GitLab pushes into hot-reloading Go services", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    hotdeploy_core::init_tracing(json_requested(), Level::INFO);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("hotdeployd failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("cannot load config {}", cli.config.display()))?;
    let registry = RepositoryRegistry::from_config(&config);
    info!(
        config = %cli.config.display(),
        port = config.port,
        repositories = registry.count(),
        "loaded configuration"
    );

    let assets =
        BundledAssets::resolve(&config.assets_dir).context("cannot load bundled assets")?;
    let pipeline = DeployPipeline::new(
        Arc::new(SystemToolchain::new()),
        Arc::new(assets),
        config.work_root.clone(),
    );
    let shutdown = Shutdown::new();
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        pipeline,
        shutdown.clone(),
    ));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, path = %config.webhook_path, "listening for webhooks");

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let router = server::router(dispatcher.clone(), &config.webhook_path);
    let served = server::serve(listener, router, shutdown, config.shutdown_timeout()).await;
    if let Err(e) = &served {
        warn!(error = %e, "http server stopped with an error");
    }

    dispatcher.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
    shutdown.trigger();
}
