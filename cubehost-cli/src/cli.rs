//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// cubehost -- Minecraft Bedrock server orchestration.
///
/// Use `cubehost <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "cubehost", version, about, long_about = None)]
pub struct Cli {
    /// Path to the cubehost.toml configuration file.
    #[arg(short, long, default_value = "/etc/cubehost/cubehost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage individual servers.
    Server(ServerArgs),

    /// Recreate containers for every server directory.
    Reconcile,

    /// Show daemon, runtime and server overview.
    Status(StatusArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- server ----

/// Manage individual servers.
#[derive(Args, Debug)]
pub struct ServerArgs {
    #[command(subcommand)]
    pub action: ServerAction,
}

#[derive(Subcommand, Debug)]
pub enum ServerAction {
    /// Write metadata for a new server and create its container.
    Create(CreateArgs),
    /// Start a server's container.
    Start {
        /// Server ID.
        server_id: String,
    },
    /// Stop a server's container.
    Stop {
        /// Server ID.
        server_id: String,
    },
    /// Restart a server's container.
    Restart {
        /// Server ID.
        server_id: String,
    },
    /// Remove a server's container and (unless --keep-data) its directory.
    Delete {
        /// Server ID.
        server_id: String,
        /// Keep the data directory and metadata.
        #[arg(long)]
        keep_data: bool,
    },
    /// Adopt an existing data directory that has no container yet.
    Import {
        /// Server ID (directory name under servers_dir).
        server_id: String,
    },
    /// Remove and recreate a container from current metadata.
    Recreate {
        /// Server ID.
        server_id: String,
    },
    /// Show metadata and container state for one server.
    Status {
        /// Server ID.
        server_id: String,
    },
    /// List all servers.
    List,
    /// Send a console command line to the server.
    Exec {
        /// Server ID.
        server_id: String,
        /// Console line, tokenized with shell-style quoting (e.g. `say "hello all"`).
        line: String,
    },
    /// Player management.
    Player {
        /// Server ID.
        server_id: String,
        #[command(subcommand)]
        action: PlayerCommand,
    },
    /// Change server settings and recreate its container.
    Update(UpdateArgs),
    /// Print a file from the server's data directory.
    Cat {
        /// Server ID.
        server_id: String,
        /// Path relative to the server directory.
        path: String,
    },
}

/// Create a new server.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Server ID (lowercase letters, digits, '-' and '_').
    pub server_id: String,

    /// Display name (default: server ID).
    #[arg(long)]
    pub name: Option<String>,

    /// Game version selector (e.g. LATEST, 1.21.50.07).
    #[arg(long)]
    pub version: Option<String>,

    /// Memory limit (bytes, or with K/M/G suffix).
    #[arg(long, value_parser = parse_memory)]
    pub memory: Option<u64>,

    /// Network name (default: bridge with UDP port mapping).
    #[arg(long)]
    pub network: Option<String>,

    /// Host port published for the game's UDP port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Container image override.
    #[arg(long)]
    pub image: Option<String>,
}

/// Change server settings. Empty strings clear network, version and image.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Server ID.
    pub server_id: String,

    /// New display name.
    #[arg(long)]
    pub name: Option<String>,

    /// New version selector.
    #[arg(long)]
    pub version: Option<String>,

    /// New memory limit (bytes, or with K/M/G suffix).
    #[arg(long, value_parser = parse_memory)]
    pub memory: Option<u64>,

    /// New network name.
    #[arg(long)]
    pub network: Option<String>,

    /// New host port.
    #[arg(long)]
    pub port: Option<u16>,

    /// New container image.
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum PlayerCommand {
    /// Kick a player.
    Kick {
        /// Player name.
        player: String,
        /// Reason shown to the player.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Grant operator.
    Op {
        /// Player name.
        player: String,
    },
    /// Revoke operator.
    Deop {
        /// Player name.
        player: String,
    },
    /// Add to the allowlist.
    Allow {
        /// Player name.
        player: String,
    },
    /// Remove from the allowlist.
    Disallow {
        /// Player name.
        player: String,
    },
}

// ---- status ----

/// Display daemon liveness, runtime health and server counts.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list every server with its state.
    #[arg(short, long)]
    pub verbose: bool,
}

// ---- config ----

/// Manage cubehost configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, docker, servers, cache, broadcast, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

/// Parse a memory size such as `2147483648`, `512M` or `2G` into bytes.
///
/// Suffixes are binary (K = 1024).
pub fn parse_memory(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let multiplier: u64 = match c.to_ascii_uppercase() {
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                _ => return Err(format!("unknown size suffix '{c}' (expected K, M or G)")),
            };
            (&s[..i], multiplier)
        }
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid memory size '{s}'"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory size '{s}' overflows"))
}
