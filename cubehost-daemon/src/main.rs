//! cubehost-daemon entry point.

use anyhow::Result;
use clap::Parser;

use cubehost_core::config::CubehostConfig;
use cubehost_daemon::cli::DaemonCli;
use cubehost_daemon::logging;
use cubehost_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = CubehostConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;

    // CLI flags take precedence over file and environment
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(pid_file) = cli.pid_file {
        config.general.pid_file = pid_file;
    }
    if cli.no_reconcile {
        config.servers.reconcile_on_start = false;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cubehost-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "cubehost-daemon exited with error");
        return Err(e);
    }
    Ok(())
}
