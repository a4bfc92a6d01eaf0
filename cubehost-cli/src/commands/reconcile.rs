//! `cubehost reconcile` command handler

use std::io::Write;

use tracing::info;

use cubehost_manager::{BatchReport, DockerClient, LifecycleManager, ReconcileResult};

use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `reconcile` command.
///
/// Per-server failures are reported in the output; the command itself fails
/// only if at least one server could not be reconciled.
pub async fn execute<D: DockerClient>(
    manager: &LifecycleManager<D>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!("reconciling all servers");
    let report = manager.recreate_all().await?;
    writer.render(&report)?;

    if report.failed > 0 {
        return Err(CliError::Command(format!(
            "{} of {} server(s) failed to reconcile",
            report.failed, report.total
        )));
    }
    Ok(())
}

impl Render for BatchReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "{:<24} {:<16} Detail", "Server", "Result")?;
        writeln!(w, "{}", "-".repeat(72))?;
        for outcome in &self.outcomes {
            let (label, detail) = match &outcome.result {
                ReconcileResult::Created { container_id } => (
                    format!("{:<16}", "created").green(),
                    container_id[..12.min(container_id.len())].to_owned(),
                ),
                ReconcileResult::AlreadyExists { container_id } => (
                    format!("{:<16}", "already_exists").normal(),
                    container_id[..12.min(container_id.len())].to_owned(),
                ),
                ReconcileResult::Failed { reason } => {
                    (format!("{:<16}", "failed").red(), reason.clone())
                }
            };
            writeln!(w, "{:<24} {} {}", outcome.server_id, label, detail)?;
        }

        writeln!(w)?;
        writeln!(
            w,
            "total={} succeeded={} (already existed={}) failed={}",
            self.total, self.succeeded, self.already_existed, self.failed
        )
    }
}
