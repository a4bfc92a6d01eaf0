//! `cubehost config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use cubehost_core::config::CubehostConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Section names accepted by `config show --section`.
const SECTIONS: [&str; 6] = ["general", "docker", "servers", "cache", "broadcast", "metrics"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Load and validate the configuration file, reporting any errors.
///
/// # Errors
///
/// Returns `CliError::Config` if validation fails.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = validation_report(config_path, CubehostConfig::load(config_path).await);
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

/// Display the effective configuration (file + env overrides + defaults).
///
/// # Errors
///
/// Returns `CliError::Config` if loading fails or `CliError::Command` if the
/// section name is unknown.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = CubehostConfig::load(config_path).await?;
    let report = show_report(&config, config_path, section.as_deref())?;
    writer.render(&report)
}

/// Build the validation report for a load result.
pub fn validation_report<E: std::fmt::Display>(
    config_path: &Path,
    result: Result<CubehostConfig, E>,
) -> ConfigValidationReport {
    match result {
        Ok(_) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: true,
            errors: Vec::new(),
        },
        Err(e) => ConfigValidationReport {
            source: config_path.display().to_string(),
            valid: false,
            errors: vec![e.to_string()],
        },
    }
}

/// Build the `config show` report, optionally limited to one section.
pub fn show_report(
    config: &CubehostConfig,
    config_path: &Path,
    section: Option<&str>,
) -> Result<ConfigReport, CliError> {
    let config_toml = match section {
        None => toml::to_string_pretty(config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("docker") => toml::to_string_pretty(&config.docker),
        Some("servers") => toml::to_string_pretty(&config.servers),
        Some("cache") => toml::to_string_pretty(&config.cache),
        Some("broadcast") => toml::to_string_pretty(&config.broadcast),
        Some("metrics") => toml::to_string_pretty(&config.metrics),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: {})",
                other,
                SECTIONS.join(", ")
            )));
        }
    }
    .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    let value = match section {
        None => serde_json::to_value(config)?,
        Some(name) => serde_json::to_value(config)?
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null),
    };

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section: section.map(str::to_owned),
        config: value,
        config_toml,
    })
}

/// Configuration display report.
///
/// JSON output carries the structured `config`; text output prints the TOML form.
#[derive(Serialize)]
pub struct ConfigReport {
    /// Configuration file path
    pub source: String,
    /// Optional section name (None = full config)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Effective configuration as JSON
    pub config: serde_json::Value,
    /// Effective configuration as TOML
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if let Some(ref section) = self.section {
            let section_label = format!("[{}]", section);
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;
        Ok(())
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    /// Configuration file path
    pub source: String,
    /// Whether the configuration is valid
    pub valid: bool,
    /// Validation error messages (empty if valid)
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;

        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_full_config_contains_every_section() {
        let config = CubehostConfig::default();
        let report = show_report(&config, Path::new("cubehost.toml"), None).expect("report");
        for section in SECTIONS {
            assert!(
                report.config_toml.contains(&format!("[{section}]")),
                "missing [{section}] in:\n{}",
                report.config_toml
            );
        }
        assert!(report.config.get("servers").is_some());
    }

    #[test]
    fn show_single_section() {
        let config = CubehostConfig::default();
        let report =
            show_report(&config, Path::new("cubehost.toml"), Some("cache")).expect("report");
        assert!(report.config_toml.contains("inspect_ttl_secs"));
        assert!(!report.config_toml.contains("servers_dir"));
        assert_eq!(report.config["file_ttl_secs"], 30);
    }

    #[test]
    fn show_unknown_section_is_error() {
        let config = CubehostConfig::default();
        let err = show_report(&config, Path::new("cubehost.toml"), Some("network"))
            .err()
            .expect("unknown section should fail");
        assert!(err.to_string().contains("unknown section: network"));
    }

    #[test]
    fn validation_report_collects_error() {
        let report = validation_report::<String>(
            Path::new("bad.toml"),
            Err("general.log_level: must be one of".to_owned()),
        );
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);

        let mut out = Vec::new();
        report.render_text(&mut out).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("INVALID"));
        assert!(text.contains("bad.toml"));
    }
}
