//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint. Lifecycle operation latencies are
//! bucketed with [`OPERATION_DURATION_BUCKETS`] so image pulls fit.
//!
//! ```ignore
//! let config = MetricsConfig::default();
//! install_metrics_recorder(&config)?;
//! ```

use std::net::SocketAddr;

use anyhow::Result;
use cubehost_core::config::MetricsConfig;
use cubehost_core::metrics::{LIFECYCLE_OPERATION_DURATION_SECONDS, OPERATION_DURATION_BUCKETS};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Parse the listen address out of the metrics config.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process.
///
/// # Errors
///
/// - Endpoint is not `/metrics`
/// - Socket address is invalid or binding fails
/// - Global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    tracing::info!(listen_addr = %addr, "installing Prometheus metrics recorder");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(LIFECYCLE_OPERATION_DURATION_SECONDS.to_owned()),
            &OPERATION_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    cubehost_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
