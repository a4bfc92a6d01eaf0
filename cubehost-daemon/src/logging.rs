//! Daemon log output.
//!
//! `[general].log_format` picks between JSON lines for log shippers and a
//! multi-line pretty layout for a terminal. `RUST_LOG` overrides
//! `[general].log_level` when set.

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cubehost_core::config::GeneralConfig;

/// Supported `log_format` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format = LogFormat::parse(&config.log_format)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        // span fields such as server_id go on every line
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(false))
            .try_init(),
    };
    installed.with_context(|| format!("failed to install {format:?} log subscriber"))
}
