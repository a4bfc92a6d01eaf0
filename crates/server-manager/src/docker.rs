//! Docker API abstraction for testability.
//!
//! The [`DockerClient`] trait abstracts the orchestration primitives the
//! lifecycle manager needs (create, start, stop, restart, rename, remove,
//! inspect, list, pull, exec), allowing production code to use [`BollardDockerClient`]
//! while tests use `MockDockerClient`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌─────────────────┐
//! │ LifecycleManager │   │ CommandExecutor │
//! └────────┬─────────┘   └───────┬─────────┘
//!          └──────────┬──────────┘
//!                     ▼
//!              ┌─────────────┐
//!              │DockerClient │ (trait)
//!              └─────────────┘
//!                   │     │
//!                   ▼     ▼
//!              ┌───────┐ ┌──────┐
//!              │Bollard│ │ Mock │
//!              └───┬───┘ └──────┘
//!                  │
//!                  ▼
//!            Docker Daemon
//! ```
//!
//! A single long-lived client is created at startup and shared read-only
//! (`Arc<D>`) by every component.
//!
//! # Container Reference Validation
//!
//! Containers are addressed by name (the server ID) or by ID. Every method
//! that accepts a reference validates it first:
//! - Must be 1-128 characters
//! - Must contain only ASCII alphanumerics, `-`, `_` and `.`

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::{StreamExt, TryStreamExt};

use cubehost_core::types::{ContainerInfo, ContainerState, MountInfo};

use crate::error::ManagerError;
use crate::spec::{ContainerSpec, RestartPolicy};

/// Connection timeout handed to bollard, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Validates a container reference (name or ID) before it reaches the API.
fn validate_container_ref(id: &str) -> Result<(), ManagerError> {
    if id.is_empty() || id.len() > 128 {
        return Err(ManagerError::Validation {
            field: "container".to_owned(),
            reason: format!("invalid container reference: length {} (must be 1-128)", id.len()),
        });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ManagerError::Validation {
            field: "container".to_owned(),
            reason: "invalid container reference: contains disallowed characters".to_owned(),
        });
    }
    Ok(())
}

/// Output of a command executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code reported by the runtime (None if it could not be determined)
    pub exit_code: Option<i64>,
    /// Combined stdout/stderr
    pub output: String,
}

impl ExecOutput {
    /// Returns true if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait abstracting Docker API operations.
///
/// All orchestration calls go through this trait. The trait is
/// `Send + Sync + 'static`, allowing safe sharing across async contexts.
///
/// # Implementations
///
/// - [`BollardDockerClient`]: Production implementation using the `bollard` library
/// - `MockDockerClient`: In-memory implementation (available in tests only)
///
/// # Error Handling
///
/// - **404 errors**: Converted to `ManagerError::ContainerNotFound`
/// - **Connection errors**: Wrapped as `ManagerError::DockerConnection`
/// - **Other API failures**: Wrapped as `ManagerError::Orchestration`
pub trait DockerClient: Send + Sync + 'static {
    /// Lists containers in any state.
    ///
    /// `label` is an optional `key=value` (or bare `key`) filter.
    fn list_containers(
        &self,
        label: Option<&str>,
    ) -> impl Future<Output = Result<Vec<ContainerInfo>, ManagerError>> + Send;

    /// Inspects a specific container, including its mounts.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ContainerNotFound`: Container does not exist (404)
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInfo, ManagerError>> + Send;

    /// Creates a container from a spec and returns its ID.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, ManagerError>> + Send;

    /// Starts a created or stopped container.
    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Stops a container, sending SIGKILL after `timeout_secs`.
    ///
    /// Stopping an already stopped container succeeds.
    fn stop_container(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Restarts a container.
    fn restart_container(
        &self,
        id: &str,
        timeout_secs: u64,
    ) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Renames a container. The ID and labels are unchanged.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ContainerNotFound`: Container does not exist (404)
    /// - `ManagerError::Conflict`: `name` is already taken (409)
    fn rename_container(
        &self,
        id: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Removes a container. `force` kills it first if running.
    fn remove_container(
        &self,
        id: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Checks whether an image is present locally.
    fn image_exists(&self, image: &str) -> impl Future<Output = Result<bool, ManagerError>> + Send;

    /// Pulls an image, returning once the pull has completed.
    fn pull_image(&self, image: &str) -> impl Future<Output = Result<(), ManagerError>> + Send;

    /// Runs an argument vector inside a container (no shell involved).
    fn exec(
        &self,
        id: &str,
        argv: &[String],
    ) -> impl Future<Output = Result<ExecOutput, ManagerError>> + Send;

    /// Checks Docker daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), ManagerError>> + Send;
}

/// Production Docker client implementation using `bollard`.
///
/// Communicates with the Docker daemon via a Unix socket or TCP connection.
/// Internally uses `Arc<bollard::Docker>` for safe sharing across async tasks.
///
/// # Examples
///
/// ```ignore
/// use cubehost_manager::BollardDockerClient;
///
/// // Connect using the platform default socket
/// let client = BollardDockerClient::connect_local()?;
///
/// // Or from a connection string
/// let client = BollardDockerClient::connect("tcp://10.0.0.5:2375")?;
/// # Ok::<(), cubehost_manager::ManagerError>(())
/// ```
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDockerClient {
    /// Connects using a connection string.
    ///
    /// - empty: platform default (`connect_local`)
    /// - `unix:///path/to/docker.sock` or a bare path: Unix socket
    /// - `tcp://host:port` or `http://host:port`: plain HTTP
    pub fn connect(host: &str) -> Result<Self, ManagerError> {
        let host = host.trim();
        if host.is_empty() {
            return Self::connect_local();
        }
        if let Some(path) = host.strip_prefix("unix://") {
            return Self::connect_with_socket(path);
        }
        if host.starts_with("tcp://") || host.starts_with("http://") {
            return Self::connect_with_http(host);
        }
        if host.starts_with('/') {
            return Self::connect_with_socket(host);
        }
        Err(ManagerError::DockerConnection(format!(
            "unsupported docker host '{host}' (expected unix://, tcp:// or http://)"
        )))
    }

    /// Connects to Docker using the default local socket.
    pub fn connect_local() -> Result<Self, ManagerError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            ManagerError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to Docker using a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, ManagerError> {
        let docker = bollard::Docker::connect_with_socket(
            socket_path,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| {
            ManagerError::DockerConnection(format!(
                "failed to connect to docker at {socket_path}: {e}"
            ))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to Docker over plain HTTP.
    pub fn connect_with_http(addr: &str) -> Result<Self, ManagerError> {
        let docker = bollard::Docker::connect_with_http(
            addr,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| {
            ManagerError::DockerConnection(format!("failed to connect to docker at {addr}: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn orchestration(operation: &str, target: &str, err: impl std::fmt::Display) -> ManagerError {
    ManagerError::Orchestration {
        operation: operation.to_owned(),
        target: target.to_owned(),
        reason: err.to_string(),
    }
}

/// Splits `repo[:tag]` into the `fromImage`/`tag` pair expected by the pull API.
///
/// A colon inside the registry host (`host:5000/repo`) is not a tag separator.
/// Digest references are passed through whole.
pub(crate) fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

fn to_bollard_config(spec: &ContainerSpec) -> bollard::container::Config<String> {
    use bollard::models::{HostConfig, PortBinding, RestartPolicyNameEnum};

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.ports {
        exposed_ports.insert(port.key(), HashMap::new());
        if let Some(host_port) = port.host_port {
            port_bindings.insert(
                port.key(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }
    }

    let binds = spec
        .mounts
        .iter()
        .map(|m| format!("{}:{}", m.source, m.target))
        .collect();

    let restart_policy = match spec.restart_policy {
        RestartPolicy::UnlessStopped => bollard::models::RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        },
    };

    let host_config = HostConfig {
        binds: Some(binds),
        memory: Some(i64::try_from(spec.memory_bytes).unwrap_or(i64::MAX)),
        network_mode: Some(spec.network.network_mode.clone()),
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        restart_policy: Some(restart_policy),
        ..Default::default()
    };

    bollard::container::Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        tty: Some(spec.interactive),
        open_stdin: Some(spec.interactive),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Docker가 보고한 RFC 3339 생성 시각을 변환합니다. 없거나 해석할 수 없으면 UNIX epoch.
fn parse_created(raw: Option<&str>) -> SystemTime {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(SystemTime::from)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn mounts_from(points: Option<Vec<bollard::models::MountPoint>>) -> Vec<MountInfo> {
    points
        .unwrap_or_default()
        .into_iter()
        .map(|m| MountInfo {
            source: m.source.unwrap_or_default(),
            destination: m.destination.unwrap_or_default(),
        })
        .collect()
}

impl DockerClient for BollardDockerClient {
    async fn list_containers(&self, label: Option<&str>) -> Result<Vec<ContainerInfo>, ManagerError> {
        use bollard::container::ListContainersOptions;

        let mut filters = HashMap::new();
        if let Some(label) = label {
            filters.insert("label".to_owned(), vec![label.to_owned()]);
        }

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| orchestration("list", label.unwrap_or("*"), e))?;

        let mut result = Vec::with_capacity(containers.len());
        for container in containers {
            let names = container.names.unwrap_or_default();
            let name = names
                .first()
                .map(|n| n.trim_start_matches('/').to_owned())
                .unwrap_or_default();
            let created = container.created.unwrap_or_default();

            result.push(ContainerInfo {
                id: container.id.unwrap_or_default(),
                name,
                image: container.image.unwrap_or_default(),
                state: ContainerState::from_str_loose(&container.state.unwrap_or_default()),
                labels: container
                    .labels
                    .unwrap_or_default()
                    .into_iter()
                    .collect::<BTreeMap<_, _>>(),
                mounts: mounts_from(container.mounts),
                created_at: SystemTime::UNIX_EPOCH
                    + Duration::from_secs(u64::try_from(created).unwrap_or(0)),
            });
        }

        Ok(result)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ManagerError> {
        validate_container_ref(id)?;

        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| {
                if is_status(&e, 404) {
                    ManagerError::ContainerNotFound(id.to_owned())
                } else {
                    orchestration("inspect", id, e)
                }
            })?;

        let name = details
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default();
        let (image, labels) = match details.config {
            Some(config) => (
                config.image.unwrap_or_default(),
                config
                    .labels
                    .unwrap_or_default()
                    .into_iter()
                    .collect::<BTreeMap<_, _>>(),
            ),
            None => (String::new(), BTreeMap::new()),
        };
        let state = details
            .state
            .and_then(|s| s.status)
            .map(|s| ContainerState::from_str_loose(&format!("{s:?}")))
            .unwrap_or_default();

        Ok(ContainerInfo {
            id: details.id.unwrap_or_default(),
            name,
            image,
            state,
            labels,
            mounts: mounts_from(details.mounts),
            created_at: parse_created(details.created.as_deref()),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ManagerError> {
        validate_container_ref(&spec.name)?;

        use bollard::container::CreateContainerOptions;

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), to_bollard_config(spec))
            .await
            .map_err(|e| {
                if is_status(&e, 409) {
                    ManagerError::Conflict(spec.name.clone())
                } else {
                    orchestration("create", &spec.name, e)
                }
            })?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ManagerError> {
        validate_container_ref(id)?;

        use bollard::container::StartContainerOptions;

        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already started
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ManagerError::ContainerNotFound(id.to_owned())),
            Err(e) => Err(orchestration("start", id, e)),
        }
    }

    async fn stop_container(&self, id: &str, timeout_secs: u64) -> Result<(), ManagerError> {
        validate_container_ref(id)?;

        use bollard::container::StopContainerOptions;

        let t = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ManagerError::ContainerNotFound(id.to_owned())),
            Err(e) => Err(orchestration("stop", id, e)),
        }
    }

    async fn restart_container(&self, id: &str, timeout_secs: u64) -> Result<(), ManagerError> {
        validate_container_ref(id)?;

        use bollard::container::RestartContainerOptions;

        let t = isize::try_from(timeout_secs).unwrap_or(isize::MAX);
        self.docker
            .restart_container(id, Some(RestartContainerOptions { t }))
            .await
            .map_err(|e| {
                if is_status(&e, 404) {
                    ManagerError::ContainerNotFound(id.to_owned())
                } else {
                    orchestration("restart", id, e)
                }
            })
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), ManagerError> {
        validate_container_ref(id)?;
        validate_container_ref(name)?;

        use bollard::container::RenameContainerOptions;

        self.docker
            .rename_container(id, RenameContainerOptions { name })
            .await
            .map_err(|e| {
                if is_status(&e, 404) {
                    ManagerError::ContainerNotFound(id.to_owned())
                } else if is_status(&e, 409) {
                    ManagerError::Conflict(name.to_owned())
                } else {
                    orchestration("rename", id, e)
                }
            })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ManagerError> {
        validate_container_ref(id)?;

        use bollard::container::RemoveContainerOptions;

        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                if is_status(&e, 404) {
                    ManagerError::ContainerNotFound(id.to_owned())
                } else {
                    orchestration("remove", id, e)
                }
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, ManagerError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(orchestration("inspect image", image, e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), ManagerError> {
        use bollard::image::CreateImageOptions;

        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: from_image.to_owned(),
            tag: tag.to_owned(),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| orchestration("pull", image, e))?;

        Ok(())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
        validate_container_ref(id)?;

        use bollard::exec::{CreateExecOptions, StartExecResults};

        if argv.is_empty() {
            return Err(ManagerError::Execution {
                server_id: id.to_owned(),
                reason: "empty argument vector".to_owned(),
            });
        }

        let created = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ManagerError::Execution {
                server_id: id.to_owned(),
                reason: format!("exec create denied: {e}"),
            })?;

        let mut output = String::new();
        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| ManagerError::Execution {
                server_id: id.to_owned(),
                reason: format!("exec start failed: {e}"),
            })? {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| ManagerError::Execution {
                        server_id: id.to_owned(),
                        reason: format!("exec stream failed: {e}"),
                    })?;
                    output.push_str(&chunk.to_string());
                }
            }
            StartExecResults::Detached => {}
        }

        let inspected = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| ManagerError::Execution {
                server_id: id.to_owned(),
                reason: format!("exec inspect failed: {e}"),
            })?;

        Ok(ExecOutput {
            exit_code: inspected.exit_code,
            output,
        })
    }

    async fn ping(&self) -> Result<(), ManagerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ManagerError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }
}

/// 테스트용 Mock Docker 클라이언트
///
/// 컨테이너 생성/삭제를 메모리에 반영하므로 라이프사이클 흐름을
/// Docker 없이 검증할 수 있습니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockDockerClient {
    /// 현재 컨테이너 목록
    pub containers: std::sync::Mutex<Vec<ContainerInfo>>,
    /// 로컬에 존재하는 이미지
    pub images: std::sync::Mutex<Vec<String>>,
    /// pull 호출 기록
    pub pulls: std::sync::Mutex<Vec<String>>,
    /// exec 호출 기록
    pub execs: std::sync::Mutex<Vec<Vec<String>>>,
    /// exec 종료 코드
    pub exec_exit_code: i64,
    /// 액션 호출 시 실패를 시뮬레이션할지 여부
    pub fail_actions: bool,
    /// 생성이 실패하는 컨테이너 이름
    pub fail_create: std::sync::Mutex<Vec<String>>,
    /// 시작이 실패하는 컨테이너 이름
    pub fail_start: std::sync::Mutex<Vec<String>>,
    /// 다음 컨테이너 ID 일련번호
    next_id: std::sync::atomic::AtomicUsize,
    /// 지금까지의 list 호출 수
    list_calls: std::sync::atomic::AtomicUsize,
    /// 지정한 list 호출에서 멈출 지점
    list_pause: std::sync::Mutex<Option<ListPause>>,
}

#[cfg(test)]
struct ListPause {
    at: usize,
    entered: tokio::sync::oneshot::Sender<()>,
    resume: tokio::sync::oneshot::Receiver<()>,
}

#[cfg(test)]
impl MockDockerClient {
    /// 빈 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 테스트용 컨테이너를 추가합니다.
    pub fn with_containers(self, containers: Vec<ContainerInfo>) -> Self {
        *self.containers.lock().unwrap() = containers;
        self
    }

    /// 로컬 이미지를 추가합니다.
    pub fn with_images(self, images: &[&str]) -> Self {
        *self.images.lock().unwrap() = images.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// exec 종료 코드를 설정합니다.
    pub fn with_exec_exit_code(mut self, code: i64) -> Self {
        self.exec_exit_code = code;
        self
    }

    /// 액션 호출 시 실패하도록 설정합니다.
    pub fn with_failing_actions(mut self) -> Self {
        self.fail_actions = true;
        self
    }

    /// 해당 이름의 컨테이너 생성이 실패하도록 설정합니다.
    pub fn fail_create_for(self, name: &str) -> Self {
        self.fail_create.lock().unwrap().push(name.to_owned());
        self
    }

    /// 해당 이름의 컨테이너 시작이 실패하도록 설정합니다.
    pub fn fail_start_for(self, name: &str) -> Self {
        self.fail_start.lock().unwrap().push(name.to_owned());
        self
    }

    /// 지금부터 `nth`번째 list 호출을 멈춥니다.
    ///
    /// 호출이 멈추면 첫 번째 채널이 완료되고, 두 번째 채널로 신호를 보내면 재개됩니다.
    pub fn pause_nth_list(
        &self,
        nth: usize,
    ) -> (tokio::sync::oneshot::Receiver<()>, tokio::sync::oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel();
        let at = self.list_calls.load(std::sync::atomic::Ordering::SeqCst) + nth;
        *self.list_pause.lock().unwrap() = Some(ListPause {
            at,
            entered: entered_tx,
            resume: resume_rx,
        });
        (entered_rx, resume_tx)
    }

    fn find(&self, id: &str) -> Option<ContainerInfo> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id || c.name == id)
            .cloned()
    }

    fn set_state(&self, id: &str, state: ContainerState) -> Result<(), ManagerError> {
        if self.fail_actions {
            return Err(orchestration("action", id, "mock failure"));
        }
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
        container.state = state;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn label_matches(labels: &BTreeMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(filter),
    }
}

#[cfg(test)]
impl DockerClient for MockDockerClient {
    async fn list_containers(&self, label: Option<&str>) -> Result<Vec<ContainerInfo>, ManagerError> {
        let call = self.list_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let pause = {
            let mut armed = self.list_pause.lock().unwrap();
            if armed.as_ref().is_some_and(|p| p.at == call) {
                armed.take()
            } else {
                None
            }
        };
        if let Some(pause) = pause {
            let _ = pause.entered.send(());
            let _ = pause.resume.await;
        }

        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|c| label.is_none_or(|l| label_matches(&c.labels, l)))
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ManagerError> {
        self.find(id)
            .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ManagerError> {
        if self.fail_actions || self.fail_create.lock().unwrap().contains(&spec.name) {
            return Err(orchestration("create", &spec.name, "mock failure"));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.iter().any(|c| c.name == spec.name) {
            return Err(ManagerError::Conflict(spec.name.clone()));
        }
        let serial = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        let id = format!("{serial:012x}");
        containers.push(ContainerInfo {
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
        if let Some(container) = self.find(id)
            && self.fail_start.lock().unwrap().contains(&container.name)
        {
            return Err(orchestration("start", id, "mock failure"));
        }
        self.set_state(id, ContainerState::Running)
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
        self.set_state(id, ContainerState::Exited)
    }

    async fn restart_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
        self.set_state(id, ContainerState::Running)
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), ManagerError> {
        if self.fail_actions {
            return Err(orchestration("rename", id, "mock failure"));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.iter().any(|c| c.name == name && c.id != id) {
            return Err(ManagerError::Conflict(name.to_owned()));
        }
        let container = containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
        container.name = name.to_owned();
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), ManagerError> {
        if self.fail_actions {
            return Err(orchestration("remove", id, "mock failure"));
        }
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id && c.name != id);
        if containers.len() == before {
            return Err(ManagerError::ContainerNotFound(id.to_owned()));
        }
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, ManagerError> {
        Ok(self.images.lock().unwrap().iter().any(|i| i == image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), ManagerError> {
        self.pulls.lock().unwrap().push(image.to_owned());
        self.images.lock().unwrap().push(image.to_owned());
        Ok(())
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
        self.inspect_container(id).await?;
        self.execs.lock().unwrap().push(argv.to_vec());
        Ok(ExecOutput {
            exit_code: Some(self.exec_exit_code),
            output: String::new(),
        })
    }

    async fn ping(&self) -> Result<(), ManagerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use cubehost_core::types::ServerMetadata;

    fn sample_spec() -> ContainerSpec {
        let mut meta = ServerMetadata::new("survival", "Survival");
        meta.memory = Some(1024 * 1024 * 1024);
        crate::spec::build(&meta, std::path::Path::new("/srv"), &ManagerConfig::default())
    }

    #[test]
    fn validate_container_ref_accepts_names_and_ids() {
        assert!(validate_container_ref("survival").is_ok());
        assert!(validate_container_ref("abc123def456").is_ok());
        assert!(validate_container_ref("my_server-2.old").is_ok());
    }

    #[test]
    fn validate_container_ref_rejects_bad_input() {
        assert!(validate_container_ref("").is_err());
        assert!(validate_container_ref("a/b").is_err());
        assert!(validate_container_ref("x; rm -rf /").is_err());
        assert!(validate_container_ref(&"a".repeat(129)).is_err());
    }

    #[test]
    fn split_image_ref_cases() {
        assert_eq!(
            split_image_ref("itzg/minecraft-bedrock-server"),
            ("itzg/minecraft-bedrock-server", "latest")
        );
        assert_eq!(
            split_image_ref("itzg/minecraft-bedrock-server:2024.12.0"),
            ("itzg/minecraft-bedrock-server", "2024.12.0")
        );
        assert_eq!(
            split_image_ref("registry.local:5000/bedrock"),
            ("registry.local:5000/bedrock", "latest")
        );
        assert_eq!(
            split_image_ref("registry.local:5000/bedrock:1"),
            ("registry.local:5000/bedrock", "1")
        );
        assert_eq!(split_image_ref("repo@sha256:abc"), ("repo@sha256:abc", ""));
    }

    #[test]
    fn bollard_config_binds_port_on_bridge() {
        let config = to_bollard_config(&sample_spec());
        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["19132/udp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("19132"));
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
        assert_eq!(host.memory, Some(1024 * 1024 * 1024));
        assert_eq!(host.binds.unwrap(), vec!["/srv/survival:/data".to_owned()]);
        assert!(config.exposed_ports.unwrap().contains_key("19132/udp"));
    }

    #[test]
    fn bollard_config_has_no_bindings_on_macvlan() {
        let mut meta = ServerMetadata::new("lan", "Lan");
        meta.network = Some("mc-macvlan".to_owned());
        let spec = crate::spec::build(&meta, std::path::Path::new("/srv"), &ManagerConfig::default());
        let config = to_bollard_config(&spec);
        assert!(config.host_config.unwrap().port_bindings.is_none());
        assert!(config.exposed_ports.unwrap().contains_key("19132/udp"));
    }

    #[test]
    fn bollard_config_carries_labels_and_env() {
        let config = to_bollard_config(&sample_spec());
        let labels = config.labels.unwrap();
        assert_eq!(labels["cubehost.server-id"], "survival");
        assert!(config.env.unwrap().contains(&"EULA=TRUE".to_owned()));
        assert_eq!(config.tty, Some(true));
    }

    #[test]
    fn connect_rejects_unknown_scheme() {
        let result = BollardDockerClient::connect("ftp://example");
        assert!(matches!(result, Err(ManagerError::DockerConnection(_))));
    }

    #[tokio::test]
    async fn mock_client_create_then_list_by_label() {
        let client = MockDockerClient::new();
        let id = client.create_container(&sample_spec()).await.unwrap();
        let found = client
            .list_containers(Some("cubehost.server-id=survival"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert!(
            client
                .list_containers(Some("cubehost.server-id=creative"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn mock_client_duplicate_create_conflicts() {
        let client = MockDockerClient::new();
        client.create_container(&sample_spec()).await.unwrap();
        let err = client.create_container(&sample_spec()).await.unwrap_err();
        assert!(matches!(err, ManagerError::Conflict(_)));
    }

    #[tokio::test]
    async fn mock_client_state_transitions() {
        let client = MockDockerClient::new();
        client.create_container(&sample_spec()).await.unwrap();
        client.start_container("survival").await.unwrap();
        assert!(client.inspect_container("survival").await.unwrap().state.is_running());
        client.stop_container("survival", 10).await.unwrap();
        assert_eq!(
            client.inspect_container("survival").await.unwrap().state,
            ContainerState::Exited
        );
        client.remove_container("survival", true).await.unwrap();
        assert!(client.inspect_container("survival").await.is_err());
    }

    #[tokio::test]
    async fn mock_client_ids_are_not_reused_after_remove() {
        let client = MockDockerClient::new();
        let mut other = sample_spec();
        other.name = "creative".to_owned();

        let first = client.create_container(&sample_spec()).await.unwrap();
        let second = client.create_container(&other).await.unwrap();
        client.remove_container(&first, true).await.unwrap();
        let third = client.create_container(&sample_spec()).await.unwrap();

        assert_ne!(third, first);
        assert_ne!(third, second);
    }

    #[tokio::test]
    async fn mock_client_rename_keeps_id() {
        let client = MockDockerClient::new();
        let id = client.create_container(&sample_spec()).await.unwrap();
        client.rename_container(&id, "survival-old").await.unwrap();

        let renamed = client.inspect_container(&id).await.unwrap();
        assert_eq!(renamed.name, "survival-old");
        assert!(client.inspect_container("survival").await.is_err());
        client.create_container(&sample_spec()).await.unwrap();
        let err = client.rename_container(&id, "survival").await.unwrap_err();
        assert!(matches!(err, ManagerError::Conflict(_)));
    }

    #[tokio::test]
    async fn mock_client_targeted_failures() {
        let client = MockDockerClient::new().fail_start_for("survival");
        let id = client.create_container(&sample_spec()).await.unwrap();
        assert!(client.start_container(&id).await.unwrap_err().is_orchestration());

        let client = MockDockerClient::new().fail_create_for("survival");
        assert!(client.create_container(&sample_spec()).await.is_err());
    }

    #[test]
    fn parse_created_reads_rfc3339() {
        let parsed = parse_created(Some("2024-05-01T12:30:00.123456789Z"));
        let secs = parsed
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(secs, 1_714_566_600);

        let offset = parse_created(Some("2024-05-01T21:30:00+09:00"));
        assert_eq!(offset, SystemTime::UNIX_EPOCH + Duration::from_secs(1_714_566_600));
    }

    #[test]
    fn parse_created_falls_back_to_epoch() {
        assert_eq!(parse_created(None), SystemTime::UNIX_EPOCH);
        assert_eq!(parse_created(Some("yesterday")), SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn mock_client_failing_actions() {
        let client = MockDockerClient::new().with_failing_actions();
        let err = client.create_container(&sample_spec()).await.unwrap_err();
        assert!(err.is_orchestration());
    }

    #[tokio::test]
    async fn mock_client_pull_records_image() {
        let client = MockDockerClient::new();
        assert!(!client.image_exists("img").await.unwrap());
        client.pull_image("img").await.unwrap();
        assert!(client.image_exists("img").await.unwrap());
        assert_eq!(client.pulls.lock().unwrap().len(), 1);
    }

    #[test]
    fn docker_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<MockDockerClient>();
        assert_send_sync::<BollardDockerClient>();
    }

    #[test]
    fn exec_output_success() {
        let ok = ExecOutput {
            exit_code: Some(0),
            output: String::new(),
        };
        let failed = ExecOutput {
            exit_code: Some(1),
            output: String::new(),
        };
        assert!(ok.success());
        assert!(!failed.success());
    }
}
