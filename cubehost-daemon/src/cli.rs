//! CLI argument definitions for cubehost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// cubehost server orchestration daemon.
///
/// Reconciles every server directory into a running container at startup,
/// logs lifecycle events and serves Prometheus metrics until signalled.
#[derive(Parser, Debug)]
#[command(name = "cubehost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to cubehost.toml configuration file.
    #[arg(short, long, default_value = "/etc/cubehost/cubehost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Skip the startup reconciliation pass even if enabled in the config.
    #[arg(long)]
    pub no_reconcile: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["cubehost-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/cubehost/cubehost.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
        assert!(!cli.no_reconcile);
    }

    #[test]
    fn overrides() {
        let cli = DaemonCli::parse_from([
            "cubehost-daemon",
            "-c",
            "/tmp/c.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "",
            "--no-reconcile",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/c.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert_eq!(cli.pid_file.as_deref(), Some(""));
        assert!(cli.no_reconcile);
    }
}
