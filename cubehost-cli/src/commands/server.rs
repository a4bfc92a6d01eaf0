//! `cubehost server` command handler

use std::io::Write;

use serde::Serialize;
use tracing::info;

use cubehost_core::types::{ServerMetadata, ServerStatus};
use cubehost_manager::{
    CreateOutcome, DeleteMode, DockerClient, ExecOutput, LifecycleManager, NewServer,
    PlayerAction, ServerUpdate,
};

use crate::cli::{CreateArgs, PlayerCommand, ServerAction, ServerArgs, UpdateArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render, human_bytes};

/// Execute the `server` command.
pub async fn execute<D: DockerClient>(
    args: ServerArgs,
    manager: &LifecycleManager<D>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ServerAction::Create(create) => {
            let report = create_server(manager, create).await?;
            writer.render(&report)
        }
        ServerAction::Import { server_id } => {
            info!(server_id = %server_id, "importing server");
            let outcome = manager.import_existing(&server_id).await?;
            writer.render(&CreateReport::new(&server_id, &outcome))
        }
        ServerAction::Recreate { server_id } => {
            let outcome = manager.recreate(&server_id).await?;
            writer.render(&CreateReport::new(&server_id, &outcome))
        }
        ServerAction::Start { server_id } => {
            manager.start(&server_id).await?;
            writer.render(&action_report(manager, &server_id, "start").await)
        }
        ServerAction::Stop { server_id } => {
            manager.stop(&server_id).await?;
            writer.render(&action_report(manager, &server_id, "stop").await)
        }
        ServerAction::Restart { server_id } => {
            manager.restart(&server_id).await?;
            writer.render(&action_report(manager, &server_id, "restart").await)
        }
        ServerAction::Delete {
            server_id,
            keep_data,
        } => {
            let mode = if keep_data {
                DeleteMode::KeepData
            } else {
                DeleteMode::Purge
            };
            manager.delete(&server_id, mode).await?;
            writer.render(&ActionReport {
                server_id,
                action: if keep_data { "delete (data kept)" } else { "delete" }.to_owned(),
                state: "absent".to_owned(),
            })
        }
        ServerAction::Status { server_id } => {
            let status = manager.status(&server_id).await?;
            writer.render(&ServerView::from(&status))
        }
        ServerAction::List => {
            let statuses = manager.list().await?;
            writer.render(&ServerList {
                servers: statuses.iter().map(ServerView::from).collect(),
            })
        }
        ServerAction::Exec { server_id, line } => {
            let output = manager.executor().console(&server_id, &line).await?;
            writer.render(&ExecReport::new(&server_id, line, &output))
        }
        ServerAction::Player { server_id, action } => {
            let action = player_action(action);
            let output = manager.executor().player(&server_id, &action).await?;
            let line = action.to_console_args()?.join(" ");
            writer.render(&ExecReport::new(&server_id, line, &output))
        }
        ServerAction::Update(update) => {
            let server_id = update.server_id.clone();
            let metadata = manager.update_config(&server_id, server_update(update)).await?;
            let state = match manager.status(&server_id).await {
                Ok(status) => status.state_name(),
                Err(_) => "unknown".to_owned(),
            };
            writer.render(&UpdateReport { metadata, state })
        }
        ServerAction::Cat { server_id, path } => {
            let contents = manager.read_file(&server_id, &path).await?;
            writer.render(&FileReport {
                server_id,
                path,
                contents,
            })
        }
    }
}

/// Create a server from CLI arguments. The display name defaults to the ID.
pub async fn create_server<D: DockerClient>(
    manager: &LifecycleManager<D>,
    args: CreateArgs,
) -> Result<CreateReport, CliError> {
    let request = NewServer {
        name: args.name.unwrap_or_else(|| args.server_id.clone()),
        server_id: args.server_id,
        image: args.image,
        version: args.version,
        memory: args.memory,
        network: args.network,
        port: args.port,
    };
    let server_id = request.server_id.clone();
    info!(server_id = %server_id, "creating server");
    let outcome = manager.create_server(request).await?;
    Ok(CreateReport::new(&server_id, &outcome))
}

/// Map the CLI update flags onto a [`ServerUpdate`].
pub fn server_update(args: UpdateArgs) -> ServerUpdate {
    ServerUpdate {
        name: args.name,
        version: args.version,
        memory: args.memory,
        network: args.network,
        port: args.port,
        image: args.image,
    }
}

/// Map a player subcommand onto a [`PlayerAction`].
pub fn player_action(command: PlayerCommand) -> PlayerAction {
    match command {
        PlayerCommand::Kick { player, reason } => PlayerAction::Kick { player, reason },
        PlayerCommand::Op { player } => PlayerAction::Op { player },
        PlayerCommand::Deop { player } => PlayerAction::Deop { player },
        PlayerCommand::Allow { player } => PlayerAction::AllowlistAdd { player },
        PlayerCommand::Disallow { player } => PlayerAction::AllowlistRemove { player },
    }
}

async fn action_report<D: DockerClient>(
    manager: &LifecycleManager<D>,
    server_id: &str,
    action: &str,
) -> ActionReport {
    let state = match manager.status(server_id).await {
        Ok(status) => status.state_name(),
        Err(_) => "unknown".to_owned(),
    };
    ActionReport {
        server_id: server_id.to_owned(),
        action: action.to_owned(),
        state,
    }
}

/// Result of create / import / recreate.
#[derive(Debug, Serialize)]
pub struct CreateReport {
    pub server_id: String,
    /// `created` or `already_exists`
    pub outcome: String,
    pub container_id: String,
}

impl CreateReport {
    fn new(server_id: &str, outcome: &CreateOutcome) -> Self {
        Self {
            server_id: server_id.to_owned(),
            outcome: if outcome.is_created() {
                "created"
            } else {
                "already_exists"
            }
            .to_owned(),
            container_id: outcome.container_id().to_owned(),
        }
    }
}

impl Render for CreateReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let outcome = if self.outcome == "created" {
            self.outcome.green()
        } else {
            self.outcome.yellow()
        };
        writeln!(
            w,
            "{}: {} (container {})",
            self.server_id.bold(),
            outcome,
            short_id(&self.container_id)
        )
    }
}

/// Result of a state transition or delete.
#[derive(Debug, Serialize)]
pub struct ActionReport {
    pub server_id: String,
    pub action: String,
    pub state: String,
}

impl Render for ActionReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;
        writeln!(
            w,
            "{}: {} ok, now {}",
            self.server_id.bold(),
            self.action,
            colored_state(&self.state)
        )
    }
}

/// One server as shown by `status` and `list`.
#[derive(Debug, Serialize)]
pub struct ServerView {
    pub server_id: String,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl From<&ServerStatus> for ServerView {
    fn from(status: &ServerStatus) -> Self {
        let meta = &status.metadata;
        Self {
            server_id: meta.server_id.clone(),
            name: meta.name.clone(),
            state: status.state_name(),
            container_id: status.container.as_ref().map(|c| c.id.clone()),
            image: status
                .container
                .as_ref()
                .map(|c| c.image.clone())
                .or_else(|| meta.image.clone()),
            version: meta.version.clone(),
            memory: meta.memory,
            network: meta.network.clone(),
            port: meta.port,
        }
    }
}

impl Render for ServerView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Server: {} ({})", self.server_id.bold(), self.name)?;
        writeln!(w, "  State:     {}", colored_state(&self.state))?;
        if let Some(id) = &self.container_id {
            writeln!(w, "  Container: {}", short_id(id))?;
        }
        writeln!(w, "  Image:     {}", self.image.as_deref().unwrap_or("(default)"))?;
        writeln!(w, "  Version:   {}", self.version.as_deref().unwrap_or("LATEST"))?;
        writeln!(
            w,
            "  Memory:    {}",
            self.memory
                .map(human_bytes)
                .unwrap_or_else(|| "(default)".to_owned())
        )?;
        writeln!(w, "  Network:   {}", self.network.as_deref().unwrap_or("bridge"))?;
        if let Some(port) = self.port {
            writeln!(w, "  Port:      {port}/udp")?;
        }
        Ok(())
    }
}

/// `server list` payload.
#[derive(Debug, Serialize)]
pub struct ServerList {
    pub servers: Vec<ServerView>,
}

impl Render for ServerList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.servers.is_empty() {
            return writeln!(w, "No servers found.");
        }

        writeln!(w, "{:<24} {:<24} {:<10} Network", "ID", "Name", "State")?;
        writeln!(w, "{}", "-".repeat(72))?;
        for s in &self.servers {
            writeln!(
                w,
                "{:<24} {:<24} {} {}",
                s.server_id,
                s.name,
                paint_state(&s.state, &format!("{:<10}", s.state)),
                s.network.as_deref().unwrap_or("bridge")
            )?;
        }
        writeln!(w)?;
        writeln!(w, "{} server(s)", self.servers.len())
    }
}

/// Console / player command result.
#[derive(Debug, Serialize)]
pub struct ExecReport {
    pub server_id: String,
    pub command: String,
    pub exit_code: Option<i64>,
    pub output: String,
}

impl ExecReport {
    fn new(server_id: &str, command: String, output: &ExecOutput) -> Self {
        Self {
            server_id: server_id.to_owned(),
            command,
            exit_code: output.exit_code,
            output: output.output.clone(),
        }
    }
}

impl Render for ExecReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.output.is_empty() {
            writeln!(w, "{}: sent `{}`", self.server_id, self.command)
        } else {
            write!(w, "{}", self.output)?;
            if !self.output.ends_with('\n') {
                writeln!(w)?;
            }
            Ok(())
        }
    }
}

/// `server update` payload.
#[derive(Debug, Serialize)]
pub struct UpdateReport {
    pub metadata: ServerMetadata,
    pub state: String,
}

impl Render for UpdateReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;
        writeln!(
            w,
            "{}: configuration updated, now {}",
            self.metadata.server_id.bold(),
            colored_state(&self.state)
        )
    }
}

/// `server cat` payload.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub server_id: String,
    pub path: String,
    pub contents: String,
}

impl Render for FileReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        write!(w, "{}", self.contents)
    }
}

fn colored_state(state: &str) -> colored::ColoredString {
    paint_state(state, state)
}

/// Color `text` by container state. Padding must be applied to `text` beforehand.
fn paint_state(state: &str, text: &str) -> colored::ColoredString {
    use colored::Colorize;
    match state {
        "running" => text.green(),
        "absent" | "dead" => text.red(),
        "exited" | "created" | "paused" => text.yellow(),
        _ => text.normal(),
    }
}

fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}
