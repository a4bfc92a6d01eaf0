//! Integration tests for `cubehost server`, `reconcile` and `status` handlers
//! against an in-memory container runtime.

use std::sync::Arc;

use cubehost_cli::cli::{CreateArgs, OutputFormat, ServerAction, ServerArgs, StatusArgs};
use cubehost_cli::commands::{reconcile, server, status};
use cubehost_cli::output::OutputWriter;
use cubehost_core::config::CubehostConfig;
use cubehost_manager::{LifecycleManager, LifecycleManagerBuilder, ManagerConfig};

mod mock {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use cubehost_core::types::{ContainerInfo, ContainerState, MountInfo};
    use cubehost_manager::{ContainerSpec, DockerClient, ExecOutput, ManagerError};

    /// In-memory runtime. Console commands echo their argv back as output.
    pub struct MemoryDocker {
        containers: Mutex<Vec<ContainerInfo>>,
        pub execs: Mutex<Vec<Vec<String>>>,
        next_id: AtomicUsize,
    }

    impl MemoryDocker {
        pub fn new() -> Self {
            Self {
                containers: Mutex::new(Vec::new()),
                execs: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(1),
            }
        }

        pub fn state_of(&self, name: &str) -> Option<ContainerState> {
            self.containers
                .lock()
                .expect("lock")
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.state)
        }

        fn set_state(&self, id: &str, state: ContainerState) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().expect("lock");
            let container = containers
                .iter_mut()
                .find(|c| c.id == id || c.name == id)
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
            container.state = state;
            Ok(())
        }
    }

    fn matches_label(info: &ContainerInfo, filter: &str) -> bool {
        match filter.split_once('=') {
            Some((key, value)) => info.label(key) == Some(value),
            None => info.labels.contains_key(filter),
        }
    }

    impl DockerClient for MemoryDocker {
        async fn list_containers(
            &self,
            label: Option<&str>,
        ) -> Result<Vec<ContainerInfo>, ManagerError> {
            Ok(self
                .containers
                .lock()
                .expect("lock")
                .iter()
                .filter(|c| label.is_none_or(|l| matches_label(c, l)))
                .cloned()
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ManagerError> {
            self.containers
                .lock()
                .expect("lock")
                .iter()
                .find(|c| c.id == id || c.name == id)
                .cloned()
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ManagerError> {
            let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.containers.lock().expect("lock").push(ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                labels: spec.labels.clone(),
                mounts: spec
                    .mounts
                    .iter()
                    .map(|m| MountInfo {
                        source: m.source.clone(),
                        destination: m.target.clone(),
                    })
                    .collect(),
                created_at: SystemTime::now(),
            });
            Ok(id)
        }

        async fn start_container(&self, id: &str) -> Result<(), ManagerError> {
            self.set_state(id, ContainerState::Running)
        }

        async fn stop_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
            self.set_state(id, ContainerState::Exited)
        }

        async fn restart_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
            self.set_state(id, ContainerState::Running)
        }

        async fn rename_container(&self, id: &str, name: &str) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().expect("lock");
            let container = containers
                .iter_mut()
                .find(|c| c.id == id || c.name == id)
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
            container.name = name.to_owned();
            Ok(())
        }

        async fn remove_container(&self, id: &str, _force: bool) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().expect("lock");
            let before = containers.len();
            containers.retain(|c| c.id != id && c.name != id);
            if containers.len() == before {
                return Err(ManagerError::ContainerNotFound(id.to_owned()));
            }
            Ok(())
        }

        async fn image_exists(&self, _image: &str) -> Result<bool, ManagerError> {
            Ok(true)
        }

        async fn pull_image(&self, _image: &str) -> Result<(), ManagerError> {
            Ok(())
        }

        async fn exec(&self, _id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
            self.execs.lock().expect("lock").push(argv.to_vec());
            Ok(ExecOutput {
                exit_code: Some(0),
                output: argv.join(" "),
            })
        }

        async fn ping(&self) -> Result<(), ManagerError> {
            Ok(())
        }
    }
}

use mock::MemoryDocker;

fn setup(dir: &std::path::Path) -> (CubehostConfig, Arc<MemoryDocker>, LifecycleManager<MemoryDocker>) {
    let mut config = CubehostConfig::default();
    config.servers.servers_dir = dir.display().to_string();
    config.servers.host_data_root = "/srv/cubehost".to_owned();
    config.general.pid_file = String::new();

    let docker = Arc::new(MemoryDocker::new());
    let manager = LifecycleManagerBuilder::new()
        .config(ManagerConfig::from_core(&config))
        .docker_client(Arc::clone(&docker))
        .build()
        .expect("manager should build");
    (config, docker, manager)
}

fn create_args(id: &str) -> CreateArgs {
    CreateArgs {
        server_id: id.to_owned(),
        name: None,
        version: None,
        memory: None,
        network: None,
        port: None,
        image: None,
    }
}

#[tokio::test]
async fn test_create_defaults_name_to_id_and_starts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, docker, manager) = setup(dir.path());

    let report = server::create_server(&manager, create_args("survival"))
        .await
        .expect("create should succeed");

    assert_eq!(report.server_id, "survival");
    assert_eq!(report.outcome, "created");
    let status = manager.status("survival").await.expect("status");
    assert_eq!(status.metadata.name, "survival");
    assert_eq!(
        docker.state_of("survival"),
        Some(cubehost_core::types::ContainerState::Running)
    );
}

#[tokio::test]
async fn test_create_twice_is_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, _, manager) = setup(dir.path());

    server::create_server(&manager, create_args("lobby"))
        .await
        .expect("first create");
    let err = server::create_server(&manager, create_args("lobby"))
        .await
        .expect_err("second create should fail");
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn test_invalid_id_is_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, _, manager) = setup(dir.path());

    let err = server::create_server(&manager, create_args("../etc"))
        .await
        .expect_err("path-like id should fail");
    assert_eq!(err.exit_code(), 64);
}

#[tokio::test]
async fn test_exec_sends_tokenized_console_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, docker, manager) = setup(dir.path());
    server::create_server(&manager, create_args("lobby"))
        .await
        .expect("create");

    let writer = OutputWriter::new(OutputFormat::Json);
    let args = ServerArgs {
        action: ServerAction::Exec {
            server_id: "lobby".to_owned(),
            line: r#"say "hello world""#.to_owned(),
        },
    };
    server::execute(args, &manager, &writer)
        .await
        .expect("exec should succeed");

    let execs = docker.execs.lock().expect("lock");
    let argv = execs.last().expect("one exec recorded");
    assert_eq!(argv.last().map(String::as_str), Some("hello world"));
    assert!(argv.iter().any(|a| a == "say"));
}

#[tokio::test]
async fn test_exec_on_missing_server_is_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, _, manager) = setup(dir.path());

    let writer = OutputWriter::new(OutputFormat::Json);
    let args = ServerArgs {
        action: ServerAction::Exec {
            server_id: "ghost".to_owned(),
            line: "list".to_owned(),
        },
    };
    let err = server::execute(args, &manager, &writer)
        .await
        .expect_err("exec on unknown server should fail");
    assert_eq!(err.exit_code(), 6);
}

#[tokio::test]
async fn test_stop_then_delete_keep_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, docker, manager) = setup(dir.path());
    server::create_server(&manager, create_args("creative"))
        .await
        .expect("create");

    let writer = OutputWriter::new(OutputFormat::Json);
    server::execute(
        ServerArgs {
            action: ServerAction::Stop {
                server_id: "creative".to_owned(),
            },
        },
        &manager,
        &writer,
    )
    .await
    .expect("stop");
    assert_eq!(
        docker.state_of("creative"),
        Some(cubehost_core::types::ContainerState::Exited)
    );

    server::execute(
        ServerArgs {
            action: ServerAction::Delete {
                server_id: "creative".to_owned(),
                keep_data: true,
            },
        },
        &manager,
        &writer,
    )
    .await
    .expect("delete");
    assert!(docker.state_of("creative").is_none());
    assert!(dir.path().join("creative").is_dir(), "data should be kept");
}

#[tokio::test]
async fn test_reconcile_and_status_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, _, manager) = setup(dir.path());
    server::create_server(&manager, create_args("alpha"))
        .await
        .expect("create");
    server::create_server(&manager, create_args("beta"))
        .await
        .expect("create");

    let writer = OutputWriter::new(OutputFormat::Json);
    reconcile::execute(&manager, &writer)
        .await
        .expect("reconcile should succeed when containers already exist");

    let report = status::build_status_report(&config, &manager, true).await;
    assert!(!report.daemon_running);
    assert!(report.runtime_healthy);
    assert_eq!(report.managed_servers, 2);
    assert_eq!(report.running_servers, 2);
    assert_eq!(report.servers.len(), 2);

    status::execute(StatusArgs { verbose: false }, &config, &manager, &writer)
        .await
        .expect("status should render");
}

#[tokio::test]
async fn test_reconcile_with_corrupt_record_fails_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_, _, manager) = setup(dir.path());
    server::create_server(&manager, create_args("good"))
        .await
        .expect("create");
    let broken = dir.path().join("broken");
    std::fs::create_dir_all(&broken).expect("mkdir");
    std::fs::write(
        broken.join(cubehost_manager::metadata::METADATA_FILE),
        "{not json",
    )
    .expect("write");

    let writer = OutputWriter::new(OutputFormat::Json);
    let err = reconcile::execute(&manager, &writer)
        .await
        .expect_err("one failed server should fail the command");
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("1 of 2"));
}
