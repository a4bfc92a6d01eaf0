//! cubehost CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cubehost_cli::cli::{Cli, Commands};
use cubehost_cli::commands;
use cubehost_cli::error::CliError;
use cubehost_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = run(cli, &writer).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

/// Logs go to stderr so stdout stays clean for `--output json`.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    match cli.command {
        Commands::Config(args) => commands::config::execute(args, &cli.config, writer).await,
        Commands::Server(args) => {
            let (_, manager) = commands::connect(&cli.config).await?;
            commands::server::execute(args, &manager, writer).await
        }
        Commands::Reconcile => {
            let (_, manager) = commands::connect(&cli.config).await?;
            commands::reconcile::execute(&manager, writer).await
        }
        Commands::Status(args) => {
            let (config, manager) = commands::connect(&cli.config).await?;
            commands::status::execute(args, &config, &manager, writer).await
        }
    }
}
