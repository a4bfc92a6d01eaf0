//! `cubehost status` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use cubehost_core::config::CubehostConfig;
use cubehost_manager::{DockerClient, LifecycleManager};

use crate::cli::StatusArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `status` command.
pub async fn execute<D: DockerClient>(
    args: StatusArgs,
    config: &CubehostConfig,
    manager: &LifecycleManager<D>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let report = build_status_report(config, manager, args.verbose).await;
    writer.render(&report)
}

/// Build the status report.
///
/// Never fails: an unreachable runtime is reported, not raised.
pub async fn build_status_report<D: DockerClient>(
    config: &CubehostConfig,
    manager: &LifecycleManager<D>,
    verbose: bool,
) -> StatusReport {
    let (daemon_running, daemon_pid) = check_daemon_status(&config.general.pid_file);
    let runtime = manager.health_check().await;

    let (servers, list_error) = match manager.list().await {
        Ok(statuses) => (
            statuses
                .iter()
                .map(|s| ServerLine {
                    server_id: s.metadata.server_id.clone(),
                    state: s.state_name(),
                })
                .collect::<Vec<_>>(),
            None,
        ),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    let running_servers = servers.iter().filter(|s| s.state == "running").count();

    StatusReport {
        daemon_running,
        daemon_pid,
        runtime: runtime.to_string(),
        runtime_healthy: runtime.is_healthy(),
        managed_servers: servers.len(),
        running_servers,
        list_error,
        servers: if verbose { servers } else { Vec::new() },
    }
}

/// Check if the daemon is running by reading its PID file and probing the process.
fn check_daemon_status(pid_file: &str) -> (bool, Option<u32>) {
    if pid_file.is_empty() {
        return (false, None);
    }
    let pid_path = Path::new(pid_file);

    let pid_content = match std::fs::read_to_string(pid_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(pid_file, "pid file does not exist");
            return (false, None);
        }
        Err(e) => {
            warn!(pid_file, error = %e, "failed to read pid file");
            return (false, None);
        }
    };

    let pid = match pid_content.trim().parse::<u32>() {
        Ok(p) => p,
        Err(e) => {
            warn!(pid_file, error = %e, "failed to parse pid");
            return (false, None);
        }
    };

    (is_process_alive(pid), Some(pid))
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use std::io::ErrorKind;

    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: kill(2) with signal 0 performs only the existence/permission check
    let result = unsafe { libc::kill(pid, 0) };

    if result == 0 {
        true
    } else {
        // EPERM: the process exists but belongs to another user
        std::io::Error::last_os_error().kind() == ErrorKind::PermissionDenied
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    false
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_pid: Option<u32>,
    pub runtime: String,
    pub runtime_healthy: bool,
    pub managed_servers: usize,
    pub running_servers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerLine>,
}

#[derive(Debug, Serialize)]
pub struct ServerLine {
    pub server_id: String,
    pub state: String,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match (self.daemon_running, self.daemon_pid) {
            (true, Some(pid)) => writeln!(w, "Daemon:  {} (pid {pid})", "running".green().bold())?,
            _ => writeln!(w, "Daemon:  {}", "not running".red().bold())?,
        }

        let runtime = if self.runtime_healthy {
            self.runtime.green()
        } else {
            self.runtime.red()
        };
        writeln!(w, "Runtime: {runtime}")?;
        writeln!(
            w,
            "Servers: {} managed, {} running",
            self.managed_servers, self.running_servers
        )?;
        if let Some(err) = &self.list_error {
            writeln!(w, "  {}", err.red())?;
        }

        if !self.servers.is_empty() {
            writeln!(w)?;
            for s in &self.servers {
                writeln!(w, "  {:<24} {}", s.server_id, s.state)?;
            }
        }
        Ok(())
    }
}
