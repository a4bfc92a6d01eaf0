//! Daemon orchestration -- assembly, startup reconciliation, and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `cubehost-daemon`.
//! It loads configuration, connects to the container runtime, builds the
//! [`LifecycleManager`], reconciles every server directory at startup and
//! then idles until a shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Event logger (subscribed before reconciliation so its events are logged)
//! 3. Startup reconciliation (`recreate_all`)
//! 4. Uptime updater (metrics only)
//!
//! # Shutdown Order
//!
//! 1. Broadcast shutdown to background tasks and wait for them
//! 2. Remove PID file
//!
//! Containers are left running on shutdown; they carry their own restart
//! policy and are picked up again by the next startup reconciliation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::broadcast;

use cubehost_core::config::CubehostConfig;
use cubehost_core::health::HealthStatus;
use cubehost_manager::{
    BatchReport, BollardDockerClient, DockerClient, LifecycleManager, LifecycleManagerBuilder,
    ManagerConfig, ReconcileResult, Subscription,
};

use crate::health::{ComponentHealth, DaemonHealth, aggregate_status};
use crate::metrics_server;

/// The main daemon orchestrator.
///
/// Generic over the runtime client so tests can substitute an in-memory one;
/// production code uses [`BollardDockerClient`].
pub struct Orchestrator<D: DockerClient = BollardDockerClient> {
    /// Loaded and validated configuration.
    config: CubehostConfig,
    /// Server lifecycle manager.
    manager: LifecycleManager<D>,
    /// Shutdown broadcast sender (signals all background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator<BollardDockerClient> {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read, parsed or validated
    /// - The container runtime connection string is unusable
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = CubehostConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Connecting does not touch the socket yet; reachability is checked by
    /// the first API call (or [`Orchestrator::health`]).
    pub fn build_from_config(config: CubehostConfig) -> Result<Self> {
        let docker = BollardDockerClient::connect(&config.docker.host)
            .map_err(|e| anyhow::anyhow!("failed to create docker client: {}", e))?;
        Self::with_docker(config, Arc::new(docker))
    }
}

impl<D: DockerClient> Orchestrator<D> {
    /// Build with an explicit runtime client.
    pub fn with_docker(config: CubehostConfig, docker: Arc<D>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before the manager records anything
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let manager = LifecycleManagerBuilder::new()
            .config(ManagerConfig::from_core(&config))
            .docker_client(docker)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build lifecycle manager: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(16);

        tracing::info!(
            servers_dir = %config.servers.servers_dir,
            reconcile_on_start = config.servers.reconcile_on_start,
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        Ok(Self {
            config,
            manager,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Run startup reconciliation and block until a shutdown signal arrives.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.pid_file_path();
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        let result = self.serve().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let event_logger =
            spawn_event_logger(self.manager.subscribe(), self.shutdown_tx.subscribe());

        if self.config.servers.reconcile_on_start {
            if let Err(e) = self.reconcile().await {
                let _ = self.shutdown_tx.send(());
                let _ = event_logger.await;
                return Err(e);
            }
        } else {
            tracing::info!("startup reconciliation disabled");
        }

        let uptime_updater = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("cubehost-daemon running");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());

        let _ = event_logger.await;
        if let Some(task) = uptime_updater {
            let _ = task.await;
        }

        tracing::info!("cubehost-daemon shut down");
        Ok(())
    }

    /// Reconcile every server directory and log the outcome.
    ///
    /// Individual server failures are logged and counted but do not fail the
    /// pass; only an unreadable servers directory does.
    pub async fn reconcile(&self) -> Result<BatchReport> {
        let report = self
            .manager
            .recreate_all()
            .await
            .map_err(|e| anyhow::anyhow!("startup reconciliation failed: {}", e))?;

        for outcome in &report.outcomes {
            if let ReconcileResult::Failed { reason } = &outcome.result {
                tracing::warn!(
                    server_id = %outcome.server_id,
                    reason = %reason,
                    "server could not be reconciled"
                );
            }
        }

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            already_existed = report.already_existed,
            failed = report.failed,
            "startup reconciliation finished"
        );
        Ok(report)
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let docker = self.manager.health_check().await;

        let broadcast = ComponentHealth::enabled("broadcast", HealthStatus::Healthy);
        let metrics = if self.config.metrics.enabled {
            ComponentHealth::enabled("metrics", HealthStatus::Healthy)
        } else {
            ComponentHealth::disabled("metrics")
        };
        let components = vec![ComponentHealth::enabled("docker", docker), broadcast, metrics];

        let managed_servers = match self.manager.store().scan().await {
            Ok(entries) => entries.len(),
            Err(e) => {
                tracing::debug!(error = %e, "failed to count servers for health report");
                0
            }
        };

        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            use cubehost_core::metrics as m;
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs,
            managed_servers,
            components,
        }
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &CubehostConfig {
        &self.config
    }

    /// Get a reference to the lifecycle manager.
    pub fn manager(&self) -> &LifecycleManager<D> {
        &self.manager
    }

    fn pid_file_path(&self) -> Option<PathBuf> {
        let pid_file = self.config.general.pid_file.trim();
        (!pid_file.is_empty()).then(|| PathBuf::from(pid_file))
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file (prevents TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink attacks)
/// - Creates the parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the file already exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a background task that logs every broadcast event for audit.
fn spawn_event_logger(
    mut subscription: Subscription,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => {
                    match event {
                        Some(event) => {
                            let kind = event
                                .payload
                                .get("kind")
                                .and_then(|k| k.as_str())
                                .unwrap_or("unknown");
                            tracing::info!(
                                event_id = %event.id,
                                topic = %event.topic,
                                kind = kind,
                                payload = %event.payload,
                                "server event"
                            );
                        }
                        None => {
                            tracing::debug!("event stream closed, exiting event logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("event logger shutting down");
                    break;
                }
            }
        }
        if subscription.is_lagged() {
            tracing::warn!("event logger fell behind and was disconnected");
        }
    })
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics() {
    use cubehost_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Spawn a background task that periodically updates the uptime metric.
///
/// Updates every 10 seconds to keep the metric fresh for Prometheus scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use cubehost_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
