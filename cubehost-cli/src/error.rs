//! CLI-specific error types and exit code mapping

use cubehost_core::error::CubehostError;
use cubehost_manager::ManagerError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to standard Unix exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Invalid request (bad ID, out-of-range value, bad console quoting).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The container runtime could not be reached or timed out.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The server or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server or container already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A command inside the container failed.
    #[error("exec failed: {0}")]
    Exec(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from cubehost-core.
    #[error("{0}")]
    Core(#[from] CubehostError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                        |
    /// |------|--------------------------------|
    /// | 0    | Success                        |
    /// | 1    | General / command error        |
    /// | 2    | Configuration error            |
    /// | 3    | Runtime unreachable or timeout |
    /// | 4    | Not found                      |
    /// | 5    | Conflict                       |
    /// | 6    | Command inside container failed|
    /// | 10   | IO error                       |
    /// | 64   | Invalid input                  |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(CubehostError::Config(_)) => 2,
            Self::RuntimeUnavailable(_) => 3,
            Self::NotFound(_) => 4,
            Self::Conflict(_) => 5,
            Self::Exec(_) => 6,
            Self::Invalid(_) => 64,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Validation { .. } => Self::Invalid(e.to_string()),
            ManagerError::NotFound(id) => Self::NotFound(id),
            ManagerError::ContainerNotFound(id) => {
                Self::NotFound(format!("no container for server '{id}'"))
            }
            ManagerError::Conflict(msg) => Self::Conflict(msg),
            ManagerError::Timeout { .. } | ManagerError::DockerConnection(_) => {
                Self::RuntimeUnavailable(e.to_string())
            }
            ManagerError::Execution { .. } => Self::Exec(e.to_string()),
            ManagerError::Config { .. } => Self::Config(e.to_string()),
            ManagerError::Io(io) => Self::Io(io),
            ManagerError::Orchestration { .. } | ManagerError::Metadata { .. } => {
                Self::Command(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_core_config_error() {
        use cubehost_core::error::ConfigError;
        let err = CliError::Core(CubehostError::Config(ConfigError::FileNotFound {
            path: "cubehost.toml".to_owned(),
        }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        assert_eq!(CliError::Io(io_err).exit_code(), 10);
    }

    #[test]
    fn test_manager_not_found_maps_to_4() {
        let err: CliError = ManagerError::NotFound("survival".to_owned()).into();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.to_string(), "not found: survival");
    }

    #[test]
    fn test_manager_timeout_maps_to_runtime_unavailable() {
        let err: CliError = ManagerError::Timeout {
            operation: "ping".to_owned(),
            target: "docker".to_owned(),
            timeout_secs: 30,
        }
        .into();
        assert!(matches!(err, CliError::RuntimeUnavailable(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_manager_validation_maps_to_invalid() {
        let err: CliError = ManagerError::Validation {
            field: "command".to_owned(),
            reason: "unterminated quote".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 64);
        assert!(err.to_string().contains("unterminated quote"));
    }

    #[test]
    fn test_manager_conflict_and_exec() {
        let conflict: CliError = ManagerError::Conflict("server 'a' already exists".to_owned()).into();
        assert_eq!(conflict.exit_code(), 5);

        let exec: CliError = ManagerError::Execution {
            server_id: "a".to_owned(),
            reason: "command exited with code 1".to_owned(),
        }
        .into();
        assert_eq!(exec.exit_code(), 6);
    }

    #[test]
    fn test_orchestration_failure_is_general_error() {
        let err: CliError = ManagerError::Orchestration {
            operation: "create".to_owned(),
            target: "a".to_owned(),
            reason: "no such network".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("no such network"));
    }
}
