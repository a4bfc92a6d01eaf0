//! Integration tests for `cubehost config` command.
//!
//! Tests config validation and display functionality with real TOML files.

use std::fs;

use cubehost_cli::cli::{ConfigAction, ConfigArgs, OutputFormat};
use cubehost_cli::commands::config::{self, show_report};
use cubehost_cli::output::OutputWriter;
use cubehost_core::config::CubehostConfig;
use tempfile::TempDir;

const VALID_CONFIG: &str = r#"
[general]
log_level = "info"
log_format = "json"
pid_file = ""

[servers]
servers_dir = "/srv/cubehost/servers"
default_network = "mc-ipvlan"
"#;

#[tokio::test]
async fn test_config_validate_valid_toml() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("cubehost.toml");
    fs::write(&config_path, VALID_CONFIG).expect("should write config");

    let writer = OutputWriter::new(OutputFormat::Json);
    let args = ConfigArgs {
        action: ConfigAction::Validate,
    };
    config::execute(args, &config_path, &writer)
        .await
        .expect("valid config should validate");
}

#[tokio::test]
async fn test_config_validate_malformed_toml() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[general\nlog_level = \"info\"\n").expect("should write config");

    let writer = OutputWriter::new(OutputFormat::Json);
    let args = ConfigArgs {
        action: ConfigAction::Validate,
    };
    let err = config::execute(args, &config_path, &writer)
        .await
        .expect_err("malformed TOML should fail");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_config_validate_rejects_bad_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("cubehost.toml");
    fs::write(
        &config_path,
        "[servers]\ndefault_memory_bytes = 1\n",
    )
    .expect("should write config");

    let result = CubehostConfig::load(&config_path).await;
    assert!(result.is_err(), "tiny memory limit should be rejected");
}

#[tokio::test]
async fn test_config_show_missing_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let writer = OutputWriter::new(OutputFormat::Text);
    let args = ConfigArgs {
        action: ConfigAction::Show { section: None },
    };
    let err = config::execute(args, &temp_dir.path().join("absent.toml"), &writer)
        .await
        .expect_err("missing file should fail");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_config_show_reflects_file_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("cubehost.toml");
    fs::write(&config_path, VALID_CONFIG).expect("should write config");

    let loaded = CubehostConfig::load(&config_path).await.expect("load");
    let report = show_report(&loaded, &config_path, Some("servers")).expect("report");

    assert_eq!(report.section.as_deref(), Some("servers"));
    assert_eq!(report.config["default_network"], "mc-ipvlan");
    assert!(report.config_toml.contains("servers_dir = \"/srv/cubehost/servers\""));
}
