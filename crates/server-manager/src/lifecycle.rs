//! 라이프사이클 관리자 -- 메타데이터와 컨테이너 상태를 맞추는 전체 흐름
//!
//! [`LifecycleManager`]는 메타데이터 저장소, 컨테이너 스펙 빌더, Docker 클라이언트,
//! 캐시, 브로드캐스트 허브를 묶어 서버 단위 작업을 수행합니다.
//!
//! # 내부 흐름
//! ```text
//! request ──> KeyedLocks(server_id)
//!                 |
//!            MetadataStore.read()
//!                 |
//!            spec::build() ──> DockerClient (timeout)
//!                 |
//!            TtlCache.invalidate() ──> BroadcastHub.publish()
//! ```
//!
//! 같은 서버 ID에 대한 변경 작업은 직렬화되고, 서로 다른 서버는 동시에 진행됩니다.
//! 조회(`status`, `list`, `read_file`)는 서버 잠금을 잡지 않습니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cubehost_core::event::TOPIC_SERVERS;
use cubehost_core::health::HealthStatus;
use cubehost_core::metrics as m;
use cubehost_core::types::{ContainerInfo, ServerMetadata, ServerStatus, validate_server_id};

use crate::broadcast::{BroadcastHub, Subscription};
use crate::cache::TtlCache;
use crate::config::ManagerConfig;
use crate::docker::DockerClient;
use crate::error::ManagerError;
use crate::event::{ServerEvent, ServerEventKind};
use crate::exec::CommandExecutor;
use crate::locks::KeyedLocks;
use crate::metadata::{METADATA_FILE, MetadataStore};
use crate::spec::{self, DATA_PATH, LABEL_MANAGED, LABEL_SERVER_ID};

/// 컨테이너 조회 캐시 네임스페이스
pub const NS_INSPECT: &str = "inspect";
/// 파일 내용 캐시 네임스페이스
pub const NS_FILE: &str = "file";

/// 새 서버 생성 요청
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewServer {
    /// 서버 ID
    pub server_id: String,
    /// 표시 이름
    pub name: String,
    /// 컨테이너 이미지
    #[serde(default)]
    pub image: Option<String>,
    /// 게임 버전
    #[serde(default)]
    pub version: Option<String>,
    /// 메모리 제한 (바이트)
    #[serde(default)]
    pub memory: Option<u64>,
    /// 네트워크 이름
    #[serde(default)]
    pub network: Option<String>,
    /// 호스트 포트
    #[serde(default)]
    pub port: Option<u16>,
}

impl NewServer {
    /// 요청을 메타데이터 레코드로 변환합니다.
    pub fn into_metadata(self) -> ServerMetadata {
        let mut meta = ServerMetadata::new(self.server_id, self.name);
        meta.image = self.image.filter(|s| !s.trim().is_empty());
        meta.version = self.version.filter(|s| !s.trim().is_empty());
        meta.memory = self.memory;
        meta.network = self.network.filter(|s| !s.trim().is_empty());
        meta.port = self.port;
        meta
    }
}

/// 서버 설정 변경 요청
///
/// `None` 필드는 그대로 둡니다. `network`와 `image`에 빈 문자열을 주면
/// 값을 지우고 전역 기본값으로 돌아갑니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUpdate {
    /// 표시 이름
    #[serde(default)]
    pub name: Option<String>,
    /// 게임 버전
    #[serde(default)]
    pub version: Option<String>,
    /// 메모리 제한 (바이트)
    #[serde(default)]
    pub memory: Option<u64>,
    /// 네트워크 이름
    #[serde(default)]
    pub network: Option<String>,
    /// 호스트 포트
    #[serde(default)]
    pub port: Option<u16>,
    /// 컨테이너 이미지
    #[serde(default)]
    pub image: Option<String>,
}

impl ServerUpdate {
    /// 변경할 필드가 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 메타데이터에 변경 사항을 적용합니다. 검증은 호출자가 합니다.
    pub fn apply(&self, meta: &mut ServerMetadata) {
        if let Some(name) = &self.name {
            meta.name = name.trim().to_owned();
        }
        if let Some(version) = &self.version {
            meta.version = Some(version.trim().to_owned()).filter(|v| !v.is_empty());
        }
        if let Some(memory) = self.memory {
            meta.memory = Some(memory);
        }
        if let Some(network) = &self.network {
            meta.network = Some(network.trim().to_owned()).filter(|n| !n.is_empty());
        }
        if let Some(port) = self.port {
            meta.port = Some(port);
        }
        if let Some(image) = &self.image {
            meta.image = Some(image.trim().to_owned()).filter(|i| !i.is_empty());
        }
    }
}

/// 컨테이너 상태 전이
#[derive(Debug, Clone, Copy)]
enum Transition {
    Start,
    Stop,
    Restart,
}

impl Transition {
    fn operation(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }

    fn event_kind(self) -> ServerEventKind {
        match self {
            Self::Start => ServerEventKind::Started,
            Self::Stop => ServerEventKind::Stopped,
            Self::Restart => ServerEventKind::Restarted,
        }
    }
}

/// 삭제 범위
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// 컨테이너와 데이터 디렉토리 모두 삭제
    #[default]
    Purge,
    /// 컨테이너만 삭제하고 데이터는 보존
    KeepData,
}

/// 생성 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreateOutcome {
    /// 새 컨테이너를 생성하고 시작함
    Created {
        /// 컨테이너 ID
        container_id: String,
    },
    /// 같은 서버 ID 레이블의 컨테이너가 이미 있음
    AlreadyExists {
        /// 기존 컨테이너 ID
        container_id: String,
    },
}

impl CreateOutcome {
    /// 컨테이너 ID
    pub fn container_id(&self) -> &str {
        match self {
            Self::Created { container_id } | Self::AlreadyExists { container_id } => container_id,
        }
    }

    /// 새로 생성되었는지 확인합니다.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

impl fmt::Display for CreateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { container_id } => write!(f, "created ({})", short_id(container_id)),
            Self::AlreadyExists { container_id } => {
                write!(f, "already exists ({})", short_id(container_id))
            }
        }
    }
}

/// 일괄 재조정에서 서버 하나의 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileResult {
    /// 새로 생성됨
    Created {
        /// 컨테이너 ID
        container_id: String,
    },
    /// 이미 존재함
    AlreadyExists {
        /// 컨테이너 ID
        container_id: String,
    },
    /// 실패함
    Failed {
        /// 실패 사유
        reason: String,
    },
}

impl From<CreateOutcome> for ReconcileResult {
    fn from(outcome: CreateOutcome) -> Self {
        match outcome {
            CreateOutcome::Created { container_id } => Self::Created { container_id },
            CreateOutcome::AlreadyExists { container_id } => Self::AlreadyExists { container_id },
        }
    }
}

/// 서버별 재조정 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOutcome {
    /// 서버 ID
    pub server_id: String,
    /// 결과
    #[serde(flatten)]
    pub result: ReconcileResult,
}

/// 일괄 재조정 보고서
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 처리한 서버 디렉토리 수
    pub total: usize,
    /// 성공 수 (이미 존재한 경우 포함)
    pub succeeded: usize,
    /// 그중 이미 존재했던 수
    pub already_existed: usize,
    /// 실패 수
    pub failed: usize,
    /// 서버 ID 순으로 정렬된 개별 결과
    pub outcomes: Vec<ServerOutcome>,
}

impl BatchReport {
    fn from_outcomes(mut outcomes: Vec<ServerOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        let mut report = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in &outcomes {
            match outcome.result {
                ReconcileResult::Created { .. } => report.succeeded += 1,
                ReconcileResult::AlreadyExists { .. } => {
                    report.succeeded += 1;
                    report.already_existed += 1;
                }
                ReconcileResult::Failed { .. } => report.failed += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }
}

/// 서버 라이프사이클 관리자
///
/// # 사용 예시
/// ```ignore
/// use cubehost_manager::{LifecycleManagerBuilder, BollardDockerClient};
///
/// let docker = Arc::new(BollardDockerClient::connect(&config.docker_host)?);
/// let manager = LifecycleManagerBuilder::new()
///     .config(config)
///     .docker_client(docker)
///     .build()?;
///
/// let report = manager.recreate_all().await;
/// ```
pub struct LifecycleManager<D: DockerClient> {
    config: ManagerConfig,
    docker: Arc<D>,
    store: MetadataStore,
    inspect_cache: TtlCache<Option<ContainerInfo>>,
    file_cache: TtlCache<String>,
    hub: BroadcastHub,
    server_locks: KeyedLocks,
    image_locks: KeyedLocks,
    executor: CommandExecutor<D>,
}

impl<D: DockerClient> LifecycleManager<D> {
    /// 매니저 설정
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// 메타데이터 저장소
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// 브로드캐스트 허브
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// 상태 변경 알림을 구독합니다.
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// 명령 실행기
    pub fn executor(&self) -> &CommandExecutor<D> {
        &self.executor
    }

    /// Docker 데몬 연결을 확인합니다.
    pub async fn ping(&self) -> Result<(), ManagerError> {
        self.call("ping", "docker", self.docker.ping()).await
    }

    /// Docker 연결과 저장소 디렉토리를 점검합니다.
    pub async fn health_check(&self) -> HealthStatus {
        if let Err(e) = self.ping().await {
            return HealthStatus::Unhealthy(format!("docker daemon not reachable: {e}"));
        }
        match tokio::fs::metadata(self.store.root()).await {
            Ok(meta) if meta.is_dir() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded("servers directory not accessible".to_owned()),
        }
    }

    // ─── 생성 ──────────────────────────────────────────────────────

    /// 새 서버의 메타데이터를 기록하고 컨테이너를 생성합니다.
    ///
    /// 메타데이터는 컨테이너 생성 전에 기록됩니다. 컨테이너 생성이나 시작이
    /// 실패하면 레코드는 남고 컨테이너는 없는 상태가 되며, 같은 요청을 다시 보내면
    /// `Conflict`가 반환됩니다. 이때는 [`LifecycleManager::create`]로 남은 레코드의
    /// 컨테이너 생성을 재시도합니다.
    ///
    /// # Errors
    /// - `ManagerError::Validation`: 요청 값이 범위를 벗어남
    /// - `ManagerError::Conflict`: 같은 ID의 메타데이터가 이미 있음
    pub async fn create_server(&self, request: NewServer) -> Result<CreateOutcome, ManagerError> {
        let meta = request.into_metadata();
        meta.validate()?;
        let server_id = meta.server_id.clone();

        self.instrument("create", async {
            let _guard = self.server_locks.lock(&server_id).await;
            if self.store.exists(&server_id).await {
                return Err(ManagerError::Conflict(format!("server '{server_id}' already exists")));
            }
            self.store.write(&meta).await?;
            let meta = self.store.read(&server_id).await?;

            let root = self.resolve_host_root().await;
            let outcome = self.provision(&meta, &root, true).await?;
            self.publish_outcome(&server_id, &outcome, ServerEventKind::Created);
            Ok(outcome)
        })
        .await
    }

    /// 기존 메타데이터로 컨테이너를 생성합니다.
    ///
    /// `create_server`의 컨테이너 단계가 실패한 뒤의 재시도 경로이기도 합니다.
    /// 같은 서버 ID 레이블의 컨테이너가 이미 있으면 `AlreadyExists`를 반환합니다
    /// (strict 모드에서는 `ManagerError::Conflict`).
    pub async fn create(&self, server_id: &str) -> Result<CreateOutcome, ManagerError> {
        validate_server_id(server_id)?;
        self.instrument("create", async {
            let _guard = self.server_locks.lock(server_id).await;
            let meta = self.store.read(server_id).await?;
            let root = self.resolve_host_root().await;
            let outcome = self.provision(&meta, &root, true).await?;
            self.publish_outcome(server_id, &outcome, ServerEventKind::Created);
            Ok(outcome)
        })
        .await
    }

    /// 데이터 디렉토리만 있는 서버를 가져옵니다.
    ///
    /// 메타데이터가 없으면 서버 ID를 이름으로 하는 기본 레코드를 만든 뒤
    /// 컨테이너를 생성합니다.
    pub async fn import_existing(&self, server_id: &str) -> Result<CreateOutcome, ManagerError> {
        validate_server_id(server_id)?;
        self.instrument("import", async {
            let _guard = self.server_locks.lock(server_id).await;
            if !self.store.dir_exists(server_id).await {
                return Err(ManagerError::NotFound(server_id.to_owned()));
            }
            if !self.store.exists(server_id).await {
                info!(server_id = server_id, "writing default metadata for imported server");
                self.store
                    .write(&ServerMetadata::new(server_id, server_id))
                    .await?;
            }
            let meta = self.store.read(server_id).await?;
            let root = self.resolve_host_root().await;
            let outcome = self.provision(&meta, &root, true).await?;
            self.publish_outcome(server_id, &outcome, ServerEventKind::Imported);
            Ok(outcome)
        })
        .await
    }

    /// 현재 메타데이터로 컨테이너를 다시 만들고 시작합니다.
    ///
    /// 기존 컨테이너는 새 컨테이너가 시작된 뒤에 제거됩니다. 실패하면 기존
    /// 컨테이너가 원래 상태로 남습니다.
    pub async fn recreate(&self, server_id: &str) -> Result<CreateOutcome, ManagerError> {
        validate_server_id(server_id)?;
        self.instrument("recreate", async {
            let guard = self.server_locks.lock(server_id).await;
            let meta = self.store.read(server_id).await?;
            let root = self.resolve_host_root().await;
            let outcome = match self.find_container(server_id).await? {
                Some(existing) => {
                    match self.replace_container(&existing, &meta, &root, true, false).await {
                        Ok(container_id) => CreateOutcome::Created { container_id },
                        Err(e) => {
                            drop(guard);
                            self.notify_failure(server_id, "recreate").await;
                            return Err(e);
                        }
                    }
                }
                None => self.provision(&meta, &root, true).await?,
            };
            self.publish_outcome(server_id, &outcome, ServerEventKind::Recreated);
            Ok(outcome)
        })
        .await
    }

    /// 모든 서버 디렉토리를 재조정합니다.
    ///
    /// 호스트 데이터 루트는 한 번만 결정합니다. 서버 하나의 실패는 기록만 하고
    /// 나머지 처리를 멈추지 않습니다. 디렉토리 목록 자체를 읽지 못하면 에러입니다.
    pub async fn recreate_all(&self) -> Result<BatchReport, ManagerError> {
        let started = Instant::now();
        counter!(m::RECONCILE_RUNS_TOTAL).increment(1);

        let entries = self.store.scan().await?;
        let root = self.resolve_host_root().await;
        info!(
            servers = entries.len(),
            host_data_root = %root.display(),
            concurrency = self.config.reconcile_concurrency,
            "reconciling servers"
        );

        let root = root.as_path();
        let outcomes: Vec<ServerOutcome> = stream::iter(entries)
            .map(move |(server_id, loaded)| self.reconcile_one(server_id, loaded, root))
            .buffer_unordered(self.config.reconcile_concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::from_outcomes(outcomes);
        gauge!(m::LIFECYCLE_MANAGED_SERVERS).set(report.total as f64);
        self.hub.publish(
            TOPIC_SERVERS,
            serde_json::json!({
                "kind": "reconciled",
                "total": report.total,
                "failed": report.failed,
            }),
        );

        info!(
            total = report.total,
            succeeded = report.succeeded,
            already_existed = report.already_existed,
            failed = report.failed,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_one(
        &self,
        server_id: String,
        loaded: Result<ServerMetadata, ManagerError>,
        root: &Path,
    ) -> ServerOutcome {
        let result = match loaded {
            Ok(meta) => {
                let _guard = self.server_locks.lock(&server_id).await;
                self.provision(&meta, root, true).await
            }
            Err(e) => Err(e),
        };

        let result = match result {
            Ok(outcome) => {
                self.publish_outcome(&server_id, &outcome, ServerEventKind::Created);
                ReconcileResult::from(outcome)
            }
            Err(e) => {
                counter!(m::RECONCILE_FAILURES_TOTAL).increment(1);
                warn!(server_id = %server_id, error = %e, "failed to reconcile server");
                ReconcileResult::Failed {
                    reason: e.to_string(),
                }
            }
        };
        ServerOutcome { server_id, result }
    }

    // ─── 상태 전이 ─────────────────────────────────────────────────

    /// 서버 컨테이너를 시작합니다.
    pub async fn start(&self, server_id: &str) -> Result<(), ManagerError> {
        self.transition(server_id, Transition::Start).await
    }

    /// 서버 컨테이너를 정지합니다.
    pub async fn stop(&self, server_id: &str) -> Result<(), ManagerError> {
        self.transition(server_id, Transition::Stop).await
    }

    /// 서버 컨테이너를 재시작합니다.
    pub async fn restart(&self, server_id: &str) -> Result<(), ManagerError> {
        self.transition(server_id, Transition::Restart).await
    }

    async fn transition(&self, server_id: &str, transition: Transition) -> Result<(), ManagerError> {
        validate_server_id(server_id)?;
        let operation = transition.operation();
        self.instrument(operation, async {
            let guard = self.server_locks.lock(server_id).await;
            let container = self
                .find_container(server_id)
                .await?
                .ok_or_else(|| ManagerError::ContainerNotFound(server_id.to_owned()))?;

            let id = container.id.as_str();
            let grace = self.config.stop_timeout_secs;
            // 정지 유예 시간만큼 API 타임아웃을 늘림
            let timeout = self.config.api_timeout() + Duration::from_secs(grace);
            let result = match transition {
                Transition::Start => {
                    self.call("start", server_id, self.docker.start_container(id))
                        .await
                }
                Transition::Stop => {
                    self.call_with("stop", server_id, timeout, self.docker.stop_container(id, grace))
                        .await
                }
                Transition::Restart => {
                    self.call_with(
                        "restart",
                        server_id,
                        timeout,
                        self.docker.restart_container(id, grace),
                    )
                    .await
                }
            };
            // 실패해도 관측 상태가 바뀌었을 수 있음
            self.inspect_cache.invalidate(NS_INSPECT, server_id).await;
            drop(guard);
            result?;

            let state = self.observed_state(server_id).await;
            self.notify(ServerEvent::new(server_id, transition.event_kind()).with_state(state));
            Ok(())
        })
        .await
    }

    /// 서버를 삭제합니다.
    ///
    /// `DeleteMode::Purge`는 데이터 디렉토리까지 지웁니다.
    ///
    /// # Errors
    /// - `ManagerError::NotFound`: 메타데이터와 컨테이너가 모두 없음
    pub async fn delete(&self, server_id: &str, mode: DeleteMode) -> Result<(), ManagerError> {
        validate_server_id(server_id)?;
        self.instrument("delete", async {
            let _guard = self.server_locks.lock(server_id).await;
            let container = self.find_container(server_id).await?;
            let has_data = self.store.dir_exists(server_id).await;
            if container.is_none() && !has_data {
                return Err(ManagerError::NotFound(server_id.to_owned()));
            }

            if let Some(container) = container {
                match self
                    .call("remove", server_id, self.docker.remove_container(&container.id, true))
                    .await
                {
                    Ok(()) | Err(ManagerError::ContainerNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.inspect_cache.invalidate(NS_INSPECT, server_id).await;
            }

            if mode == DeleteMode::Purge && has_data {
                self.store.remove(server_id).await?;
                self.file_cache
                    .invalidate_prefix(NS_FILE, &file_key_prefix(server_id))
                    .await;
            }

            self.notify(ServerEvent::new(server_id, ServerEventKind::Deleted).with_state("absent"));
            Ok(())
        })
        .await
    }

    /// 메타데이터를 변경하고, 컨테이너가 있으면 새 스펙으로 다시 만듭니다.
    ///
    /// 변경 전에 실행 중이던 서버만 다시 시작합니다. 새 컨테이너가 준비된 뒤에만
    /// 메타데이터를 기록하므로, 실패하면 레코드와 기존 컨테이너가 모두 변경 전
    /// 상태로 남습니다.
    pub async fn update_config(
        &self,
        server_id: &str,
        update: ServerUpdate,
    ) -> Result<ServerMetadata, ManagerError> {
        validate_server_id(server_id)?;
        if update.is_empty() {
            return Err(ManagerError::Validation {
                field: "update".to_owned(),
                reason: "no fields to update".to_owned(),
            });
        }

        self.instrument("update", async {
            let guard = self.server_locks.lock(server_id).await;
            let mut meta = self.store.read(server_id).await?;
            update.apply(&mut meta);
            meta.validate()?;

            match self.find_container(server_id).await? {
                Some(existing) => {
                    let root = self.resolve_host_root().await;
                    let start = existing.state.is_running();
                    if let Err(e) = self
                        .replace_container(&existing, &meta, &root, start, true)
                        .await
                    {
                        drop(guard);
                        self.notify_failure(server_id, "update").await;
                        return Err(e);
                    }
                }
                None => self.store.write(&meta).await?,
            }
            drop(guard);

            let state = self.observed_state(server_id).await;
            self.notify(ServerEvent::new(server_id, ServerEventKind::ConfigUpdated).with_state(state));
            Ok(meta)
        })
        .await
    }

    // ─── 조회 ──────────────────────────────────────────────────────

    /// 서버 상태를 조회합니다 (컨테이너 정보는 캐시 경유).
    pub async fn status(&self, server_id: &str) -> Result<ServerStatus, ManagerError> {
        validate_server_id(server_id)?;
        let metadata = self.store.read(server_id).await?;
        let container = self.observe(server_id).await?;
        Ok(ServerStatus {
            metadata,
            container,
        })
    }

    /// 읽을 수 있는 모든 서버의 상태를 조회합니다.
    ///
    /// 손상된 메타데이터는 경고만 남기고 건너뜁니다.
    pub async fn list(&self) -> Result<Vec<ServerStatus>, ManagerError> {
        let entries = self.store.scan().await?;
        let mut statuses = Vec::with_capacity(entries.len());
        for (server_id, loaded) in entries {
            match loaded {
                Ok(metadata) => {
                    let container = self.observe(&server_id).await?;
                    statuses.push(ServerStatus {
                        metadata,
                        container,
                    });
                }
                Err(e) => warn!(server_id = %server_id, error = %e, "skipping unreadable server"),
            }
        }
        gauge!(m::LIFECYCLE_MANAGED_SERVERS).set(statuses.len() as f64);
        Ok(statuses)
    }

    /// 서버 디렉토리 안의 파일을 읽습니다 (캐시 경유).
    pub async fn read_file(&self, server_id: &str, relative: &str) -> Result<String, ManagerError> {
        let (path, normalized) = self.store.resolve_file(server_id, relative)?;
        let key = file_key(server_id, &normalized);
        self.file_cache
            .get(NS_FILE, &key, || async {
                match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => Ok(contents),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(ManagerError::NotFound(key.clone()))
                    }
                    Err(e) => Err(ManagerError::Io(e)),
                }
            })
            .await
    }

    /// 서버 디렉토리 안의 파일을 씁니다.
    ///
    /// 메타데이터 파일은 이 경로로 수정할 수 없습니다.
    pub async fn write_file(
        &self,
        server_id: &str,
        relative: &str,
        contents: &str,
    ) -> Result<(), ManagerError> {
        let (path, normalized) = self.store.resolve_file(server_id, relative)?;
        if normalized == METADATA_FILE {
            return Err(ManagerError::Validation {
                field: "path".to_owned(),
                reason: "metadata file cannot be written directly".to_owned(),
            });
        }

        let _guard = self.server_locks.lock(server_id).await;
        if !self.store.dir_exists(server_id).await {
            return Err(ManagerError::NotFound(server_id.to_owned()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        self.file_cache
            .invalidate(NS_FILE, &file_key(server_id, &normalized))
            .await;

        debug!(server_id = server_id, path = %normalized, bytes = contents.len(), "file written");
        self.notify(ServerEvent::new(
            server_id,
            ServerEventKind::FileWritten { path: normalized },
        ));
        Ok(())
    }

    // ─── 내부 ──────────────────────────────────────────────────────

    /// 컨테이너를 만들고 (필요하면) 시작합니다. 호출자가 서버 잠금을 잡고 있어야 합니다.
    async fn provision(
        &self,
        meta: &ServerMetadata,
        host_root: &Path,
        start: bool,
    ) -> Result<CreateOutcome, ManagerError> {
        let server_id = meta.server_id.as_str();

        if let Some(existing) = self.find_container(server_id).await? {
            if self.config.strict_create {
                return Err(ManagerError::Conflict(format!(
                    "container for server '{server_id}' already exists"
                )));
            }
            debug!(server_id = server_id, container_id = %existing.id, "container already exists");
            return Ok(CreateOutcome::AlreadyExists {
                container_id: existing.id,
            });
        }

        let spec = spec::build(meta, host_root, &self.config);
        self.ensure_image(&spec.image).await?;

        let container_id = self
            .call("create", server_id, self.docker.create_container(&spec))
            .await?;
        self.inspect_cache.invalidate(NS_INSPECT, server_id).await;

        if start
            && let Err(e) = self
                .call("start", server_id, self.docker.start_container(&container_id))
                .await
        {
            // 생성 이전 상태(컨테이너 없음)로 되돌림
            self.discard(server_id, &container_id).await;
            self.inspect_cache.invalidate(NS_INSPECT, server_id).await;
            return Err(e);
        }

        info!(
            server_id = server_id,
            container_id = %short_id(&container_id),
            image = %spec.image,
            network = %spec.network.network_mode,
            "container created"
        );
        Ok(CreateOutcome::Created { container_id })
    }

    /// 기존 컨테이너를 `meta`로 만든 새 컨테이너로 교체하고 새 컨테이너 ID를 반환합니다.
    /// 호출자가 서버 잠금을 잡고 있어야 합니다.
    ///
    /// 기존 컨테이너는 임시 이름으로 옮겨 두고, 새 컨테이너가 생성되고 (필요하면)
    /// 시작된 뒤에 제거합니다. `persist`가 참이면 교체를 확정하기 직전에 `meta`를
    /// 기록합니다. 어느 단계든 실패하면 새 컨테이너를 지우고 기존 컨테이너를 원래
    /// 이름과 실행 상태로 되돌립니다.
    async fn replace_container(
        &self,
        existing: &ContainerInfo,
        meta: &ServerMetadata,
        host_root: &Path,
        start: bool,
        persist: bool,
    ) -> Result<String, ManagerError> {
        let server_id = meta.server_id.as_str();
        let spec = spec::build(meta, host_root, &self.config);
        self.ensure_image(&spec.image).await?;

        let was_running = existing.state.is_running();
        let parked = parked_name(server_id, &existing.id);
        self.call(
            "rename",
            server_id,
            self.docker.rename_container(&existing.id, &parked),
        )
        .await?;

        let container_id = match self
            .call("create", server_id, self.docker.create_container(&spec))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.restore_previous(server_id, existing, was_running).await;
                self.inspect_cache.invalidate(NS_INSPECT, server_id).await;
                return Err(e);
            }
        };

        let grace = self.config.stop_timeout_secs;
        let stop_timeout = self.config.api_timeout() + Duration::from_secs(grace);
        let committed: Result<(), ManagerError> = async {
            if was_running {
                self.call_with(
                    "stop",
                    server_id,
                    stop_timeout,
                    self.docker.stop_container(&existing.id, grace),
                )
                .await?;
            }
            if start {
                self.call("start", server_id, self.docker.start_container(&container_id))
                    .await?;
            }
            if persist {
                self.store.write(meta).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = committed {
            self.discard(server_id, &container_id).await;
            self.restore_previous(server_id, existing, was_running).await;
            self.inspect_cache.invalidate(NS_INSPECT, server_id).await;
            return Err(e);
        }

        match self
            .call("remove", server_id, self.docker.remove_container(&existing.id, true))
            .await
        {
            Ok(()) | Err(ManagerError::ContainerNotFound(_)) => {}
            Err(e) => warn!(
                server_id = server_id,
                container_id = %short_id(&existing.id),
                error = %e,
                "failed to remove replaced container"
            ),
        }
        self.inspect_cache.invalidate(NS_INSPECT, server_id).await;

        info!(
            server_id = server_id,
            previous = %short_id(&existing.id),
            container_id = %short_id(&container_id),
            image = %spec.image,
            "container replaced"
        );
        Ok(container_id)
    }

    /// 옮겨 둔 기존 컨테이너의 실행 상태와 이름을 되돌립니다. 실패는 경고로만 남깁니다.
    async fn restore_previous(&self, server_id: &str, previous: &ContainerInfo, was_running: bool) {
        if was_running
            && let Err(e) = self
                .call("start", server_id, self.docker.start_container(&previous.id))
                .await
        {
            warn!(
                server_id = server_id,
                container_id = %short_id(&previous.id),
                error = %e,
                "failed to restart previous container"
            );
        }
        if let Err(e) = self
            .call(
                "rename",
                server_id,
                self.docker.rename_container(&previous.id, &previous.name),
            )
            .await
        {
            warn!(
                server_id = server_id,
                container_id = %short_id(&previous.id),
                error = %e,
                "failed to restore name of previous container"
            );
        }
    }

    /// 방금 만든 컨테이너를 지웁니다. 실패는 경고로만 남깁니다.
    async fn discard(&self, server_id: &str, container_id: &str) {
        if let Err(e) = self
            .call("remove", server_id, self.docker.remove_container(container_id, true))
            .await
        {
            warn!(
                server_id = server_id,
                container_id = %short_id(container_id),
                error = %e,
                "failed to remove container after failed operation"
            );
        }
    }

    /// 이미지가 없으면 pull 합니다. 같은 이미지의 pull은 직렬화됩니다.
    async fn ensure_image(&self, image: &str) -> Result<(), ManagerError> {
        let _guard = self.image_locks.lock(image).await;
        if self.call("image_exists", image, self.docker.image_exists(image)).await? {
            return Ok(());
        }
        info!(image = image, "pulling image");
        let started = Instant::now();
        self.call_with(
            "pull",
            image,
            self.config.pull_timeout(),
            self.docker.pull_image(image),
        )
        .await?;
        info!(
            image = image,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "image pulled"
        );
        Ok(())
    }

    /// 서버 ID 레이블로 컨테이너를 찾습니다 (캐시 미사용).
    async fn find_container(&self, server_id: &str) -> Result<Option<ContainerInfo>, ManagerError> {
        let filter = format!("{LABEL_SERVER_ID}={server_id}");
        let found = self
            .call("list", server_id, self.docker.list_containers(Some(&filter)))
            .await?;
        // 교체 중에는 같은 레이블의 컨테이너가 잠시 둘일 수 있음
        let Some(summary) = found
            .iter()
            .find(|c| c.name == server_id)
            .or_else(|| found.first())
        else {
            return Ok(None);
        };
        match self
            .call("inspect", server_id, self.docker.inspect_container(&summary.id))
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(ManagerError::ContainerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 캐시를 거쳐 컨테이너를 조회합니다.
    async fn observe(&self, server_id: &str) -> Result<Option<ContainerInfo>, ManagerError> {
        self.inspect_cache
            .get(NS_INSPECT, server_id, || self.find_container(server_id))
            .await
    }

    async fn observed_state(&self, server_id: &str) -> String {
        match self.observe(server_id).await {
            Ok(Some(info)) => info.state.to_string(),
            Ok(None) => "absent".to_owned(),
            Err(e) => {
                debug!(server_id = server_id, error = %e, "state lookup after transition failed");
                "unknown".to_owned()
            }
        }
    }

    /// 호스트 관점 데이터 루트를 결정합니다.
    ///
    /// 설정값 → 실행 중인 관리 컨테이너의 `/data` 마운트 상위 디렉토리 → `servers_dir`
    async fn resolve_host_root(&self) -> PathBuf {
        if let Some(root) = &self.config.host_data_root {
            return root.clone();
        }
        match self.discover_host_root().await {
            Ok(Some(root)) => {
                debug!(host_data_root = %root.display(), "discovered host data root");
                root
            }
            Ok(None) => self.config.servers_dir.clone(),
            Err(e) => {
                warn!(error = %e, "host data root discovery failed, using servers_dir");
                self.config.servers_dir.clone()
            }
        }
    }

    async fn discover_host_root(&self) -> Result<Option<PathBuf>, ManagerError> {
        let filter = format!("{LABEL_MANAGED}=true");
        let containers = self
            .call("list", "managed", self.docker.list_containers(Some(&filter)))
            .await?;
        for summary in containers.iter().filter(|c| c.state.is_running()) {
            let info = match self
                .call("inspect", &summary.name, self.docker.inspect_container(&summary.id))
                .await
            {
                Ok(info) => info,
                Err(ManagerError::ContainerNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let source = info
                .mounts
                .iter()
                .find(|mnt| mnt.destination == DATA_PATH)
                .and_then(|mnt| Path::new(&mnt.source).parent().map(Path::to_path_buf));
            if let Some(root) = source.filter(|p| !p.as_os_str().is_empty()) {
                return Ok(Some(root));
            }
        }
        Ok(None)
    }

    fn publish_outcome(&self, server_id: &str, outcome: &CreateOutcome, kind: ServerEventKind) {
        if outcome.is_created() {
            self.notify(ServerEvent::new(server_id, kind).with_state("running"));
        }
    }

    async fn notify_failure(&self, server_id: &str, operation: &str) {
        let state = self.observed_state(server_id).await;
        self.notify(
            ServerEvent::new(
                server_id,
                ServerEventKind::Failed {
                    operation: operation.to_owned(),
                },
            )
            .with_state(state),
        );
    }

    fn notify(&self, event: ServerEvent) {
        info!(event = %event, "server state changed");
        if event.kind.changes_membership() {
            self.hub.publish_event(event.to_list_broadcast());
        }
        self.hub.publish_event(event.to_broadcast());
    }

    async fn call<T>(
        &self,
        operation: &str,
        target: &str,
        fut: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        self.call_with(operation, target, self.config.api_timeout(), fut)
            .await
    }

    async fn call_with<T>(
        &self,
        operation: &str,
        target: &str,
        timeout: Duration,
        fut: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_elapsed| ManagerError::Timeout {
                operation: operation.to_owned(),
                target: target.to_owned(),
                timeout_secs: timeout.as_secs(),
            })?
    }

    async fn instrument<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, ManagerError>>,
    ) -> Result<T, ManagerError> {
        let started = Instant::now();
        let result = fut.await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!(
            m::LIFECYCLE_OPERATIONS_TOTAL,
            m::LABEL_OPERATION => operation,
            m::LABEL_RESULT => outcome
        )
        .increment(1);
        histogram!(m::LIFECYCLE_OPERATION_DURATION_SECONDS, m::LABEL_OPERATION => operation)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!(operation = operation, error = %e, "lifecycle operation failed");
        }
        result
    }
}

fn file_key(server_id: &str, normalized: &str) -> String {
    format!("{server_id}/{normalized}")
}

fn file_key_prefix(server_id: &str) -> String {
    format!("{server_id}/")
}

fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

/// 교체하는 동안 기존 컨테이너가 쓰는 이름
fn parked_name(server_id: &str, container_id: &str) -> String {
    format!("{server_id}-replaced-{}", short_id(container_id))
}

/// 라이프사이클 관리자 빌더
pub struct LifecycleManagerBuilder<D: DockerClient> {
    config: ManagerConfig,
    docker: Option<Arc<D>>,
    hub: Option<BroadcastHub>,
}

impl<D: DockerClient> LifecycleManagerBuilder<D> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            docker: None,
            hub: None,
        }
    }

    /// 매니저 설정을 지정합니다.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Docker 클라이언트를 설정합니다.
    pub fn docker_client(mut self, docker: Arc<D>) -> Self {
        self.docker = Some(docker);
        self
    }

    /// 외부에서 만든 브로드캐스트 허브를 사용합니다.
    ///
    /// 설정하지 않으면 설정값으로 새 허브를 만듭니다.
    pub fn broadcast_hub(mut self, hub: BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// 매니저를 빌드합니다.
    pub fn build(self) -> Result<LifecycleManager<D>, ManagerError> {
        self.config.validate()?;

        let docker = self.docker.ok_or_else(|| ManagerError::Config {
            field: "docker_client".to_owned(),
            reason: "docker client must be provided".to_owned(),
        })?;

        let hub = self.hub.unwrap_or_else(|| {
            BroadcastHub::new(
                Duration::from_millis(self.config.coalesce_window_ms),
                self.config.subscriber_topic_limit,
            )
        });

        let inspect_ttl = Duration::from_secs(self.config.inspect_ttl_secs);
        let file_ttl = Duration::from_secs(self.config.file_ttl_secs);

        Ok(LifecycleManager {
            store: MetadataStore::new(self.config.servers_dir.clone()),
            inspect_cache: TtlCache::new(inspect_ttl).with_namespace(NS_INSPECT, inspect_ttl),
            file_cache: TtlCache::new(file_ttl).with_namespace(NS_FILE, file_ttl),
            executor: CommandExecutor::new(Arc::clone(&docker), self.config.api_timeout()),
            server_locks: KeyedLocks::new(),
            image_locks: KeyedLocks::new(),
            docker,
            hub,
            config: self.config,
        })
    }
}

impl<D: DockerClient> Default for LifecycleManagerBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}
