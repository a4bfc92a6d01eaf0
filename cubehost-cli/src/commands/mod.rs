//! Command handlers -- one module per subcommand

pub mod config;
pub mod reconcile;
pub mod server;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use cubehost_core::config::CubehostConfig;
use cubehost_manager::{BollardDockerClient, LifecycleManager, LifecycleManagerBuilder, ManagerConfig};

use crate::error::CliError;

/// Load the effective configuration and build a lifecycle manager on top of it.
pub async fn connect(
    config_path: &Path,
) -> Result<(CubehostConfig, LifecycleManager<BollardDockerClient>), CliError> {
    let config = CubehostConfig::load(config_path)
        .await
        .map_err(|e| CliError::Config(format!("{}: {}", config_path.display(), e)))?;

    let docker = BollardDockerClient::connect(&config.docker.host)?;
    let manager = LifecycleManagerBuilder::new()
        .config(ManagerConfig::from_core(&config))
        .docker_client(Arc::new(docker))
        .build()?;
    Ok((config, manager))
}
