//! Aggregated health check reporting.
//!
//! Collects each component's health into a unified [`DaemonHealth`]
//! report. The overall daemon status is the worst status among all
//! enabled components.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use std::fmt;

use serde::Serialize;

use cubehost_core::health::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all components).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Number of servers with a metadata record on disk.
    pub managed_servers: usize,
    /// Per-component health reports.
    pub components: Vec<ComponentHealth>,
}

impl fmt::Display for DaemonHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (uptime {}s, {} servers)",
            self.status, self.uptime_secs, self.managed_servers
        )
    }
}

/// Health status for a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name (e.g., "docker", "broadcast").
    pub name: String,
    /// Whether the component is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the component.
    pub status: HealthStatus,
}

impl ComponentHealth {
    /// An enabled component with the given status.
    pub fn enabled(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            status,
        }
    }

    /// A component turned off in configuration.
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            status: HealthStatus::Healthy,
        }
    }
}

/// Aggregate multiple component health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Only considers enabled components.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components.iter().filter(|c| c.enabled) {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", component.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                if !worst.is_unhealthy() {
                    reasons.clear();
                }
                reasons.push(format!("{}: {}", component.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}
