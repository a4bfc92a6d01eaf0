//! 통합 테스트 -- 메타데이터부터 브로드캐스트까지 전체 흐름 검증
//!
//! 메타데이터 기록 → 스펙 생성 → 컨테이너 생성/시작 → 캐시 무효화 → 이벤트 발행
//! 시나리오를 공개 API만 사용하여 테스트합니다.

use std::sync::Arc;
use std::time::Duration;

use cubehost_core::types::{ContainerState, ServerMetadata};
use cubehost_manager::{
    BroadcastHub, CreateOutcome, DeleteMode, LifecycleManager, LifecycleManagerBuilder,
    ManagerConfig, ManagerConfigBuilder, ManagerError, NewServer, ReconcileResult, ServerUpdate,
    network, spec, tokenize,
};

// Mock Docker client for integration tests
mod mock {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use cubehost_core::types::{ContainerInfo, ContainerState, MountInfo};
    use cubehost_manager::{ContainerSpec, DockerClient, ExecOutput, ManagerError};
    use tokio::sync::Mutex;

    pub struct TestDockerClient {
        pub containers: Mutex<Vec<ContainerInfo>>,
        images: Mutex<HashSet<String>>,
        pub pulls: Mutex<Vec<String>>,
        pub execs: Mutex<Vec<Vec<String>>>,
        failing_servers: Mutex<HashSet<String>>,
        hang_ping: bool,
        next_id: AtomicUsize,
    }

    impl TestDockerClient {
        pub fn new() -> Self {
            Self {
                containers: Mutex::new(Vec::new()),
                images: Mutex::new(HashSet::new()),
                pulls: Mutex::new(Vec::new()),
                execs: Mutex::new(Vec::new()),
                failing_servers: Mutex::new(HashSet::new()),
                hang_ping: false,
                next_id: AtomicUsize::new(1),
            }
        }

        pub fn hanging() -> Self {
            Self {
                hang_ping: true,
                ..Self::new()
            }
        }

        pub async fn fail_create_for(&self, server_id: &str) {
            self.failing_servers.lock().await.insert(server_id.to_owned());
        }

        pub async fn count(&self) -> usize {
            self.containers.lock().await.len()
        }

        pub async fn state_of(&self, name: &str) -> Option<ContainerState> {
            self.containers
                .lock()
                .await
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.state)
        }

        async fn set_state(&self, id: &str, state: ContainerState) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().await;
            let container = containers
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
            container.state = state;
            Ok(())
        }
    }

    fn matches_label(labels: &BTreeMap<String, String>, filter: &str) -> bool {
        match filter.split_once('=') {
            Some((k, v)) => labels.get(k).is_some_and(|l| l == v),
            None => labels.contains_key(filter),
        }
    }

    impl DockerClient for TestDockerClient {
        async fn list_containers(
            &self,
            label: Option<&str>,
        ) -> Result<Vec<ContainerInfo>, ManagerError> {
            Ok(self
                .containers
                .lock()
                .await
                .iter()
                .filter(|c| label.is_none_or(|l| matches_label(&c.labels, l)))
                .cloned()
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ManagerError> {
            self.containers
                .lock()
                .await
                .iter()
                .find(|c| c.id == id || c.name == id)
                .cloned()
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ManagerError> {
            if self.failing_servers.lock().await.contains(&spec.name) {
                return Err(ManagerError::Orchestration {
                    operation: "create".to_owned(),
                    target: spec.name.clone(),
                    reason: "test failure".to_owned(),
                });
            }
            let id = format!("{:064x}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.containers.lock().await.push(ContainerInfo {
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
            self.set_state(id, ContainerState::Running).await
        }

        async fn stop_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
            self.set_state(id, ContainerState::Exited).await
        }

        async fn restart_container(&self, id: &str, _timeout_secs: u64) -> Result<(), ManagerError> {
            self.set_state(id, ContainerState::Running).await
        }

        async fn rename_container(&self, id: &str, name: &str) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().await;
            if containers.iter().any(|c| c.name == name && c.id != id) {
                return Err(ManagerError::Conflict(name.to_owned()));
            }
            let container = containers
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| ManagerError::ContainerNotFound(id.to_owned()))?;
            container.name = name.to_owned();
            Ok(())
        }

        async fn remove_container(&self, id: &str, _force: bool) -> Result<(), ManagerError> {
            let mut containers = self.containers.lock().await;
            let before = containers.len();
            containers.retain(|c| c.id != id);
            if containers.len() == before {
                return Err(ManagerError::ContainerNotFound(id.to_owned()));
            }
            Ok(())
        }

        async fn image_exists(&self, image: &str) -> Result<bool, ManagerError> {
            Ok(self.images.lock().await.contains(image))
        }

        async fn pull_image(&self, image: &str) -> Result<(), ManagerError> {
            self.pulls.lock().await.push(image.to_owned());
            self.images.lock().await.insert(image.to_owned());
            Ok(())
        }

        async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ManagerError> {
            self.inspect_container(id).await?;
            self.execs.lock().await.push(argv.to_vec());
            Ok(ExecOutput {
                exit_code: Some(0),
                output: "ok".to_owned(),
            })
        }

        async fn ping(&self) -> Result<(), ManagerError> {
            if self.hang_ping {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }
}

use mock::TestDockerClient;

struct Env {
    _dir: tempfile::TempDir,
    docker: Arc<TestDockerClient>,
    manager: LifecycleManager<TestDockerClient>,
}

fn env_with(docker: TestDockerClient, concurrency: usize) -> Env {
    let dir = tempfile::tempdir().unwrap();
    let docker = Arc::new(docker);
    let config = ManagerConfigBuilder::new()
        .servers_dir(dir.path())
        .host_data_root("/srv/cubehost")
        .reconcile_concurrency(concurrency)
        .coalesce_window_ms(0)
        .build()
        .unwrap();
    let manager = LifecycleManagerBuilder::new()
        .config(config)
        .docker_client(Arc::clone(&docker))
        .build()
        .unwrap();
    Env {
        _dir: dir,
        docker,
        manager,
    }
}

fn env() -> Env {
    env_with(TestDockerClient::new(), 1)
}

fn survival() -> NewServer {
    NewServer {
        server_id: "survival".to_owned(),
        name: "Survival".to_owned(),
        version: Some("LATEST".to_owned()),
        memory: Some(2_147_483_648),
        ..NewServer::default()
    }
}

#[tokio::test]
async fn double_create_yields_one_container() {
    let env = env();
    env.manager
        .store()
        .write(&ServerMetadata::new("survival", "Survival"))
        .await
        .unwrap();

    let first = env.manager.create("survival").await.unwrap();
    let second = env.manager.create("survival").await.unwrap();

    assert!(matches!(first, CreateOutcome::Created { .. }));
    assert!(matches!(second, CreateOutcome::AlreadyExists { .. }));
    assert_eq!(first.container_id(), second.container_id());
    assert_eq!(env.docker.count().await, 1);
}

#[tokio::test]
async fn concurrent_creates_for_same_server_are_serialized() {
    let env = env();
    env.manager
        .store()
        .write(&ServerMetadata::new("survival", "Survival"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(env.manager.create("survival"), env.manager.create("survival"));
    let created = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| o.is_created())
        .count();
    assert_eq!(created, 1);
    assert_eq!(env.docker.count().await, 1);
}

#[tokio::test]
async fn batch_reconciliation_isolates_corrupted_metadata() {
    const N: usize = 7;
    const M: usize = 3;

    let env = env_with(TestDockerClient::new(), 2);
    for i in 0..N {
        let id = format!("server-{i}");
        if i < M {
            let dir = env.manager.store().server_dir(&id);
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join(".cubehost.json"), b"{\"name\": 42")
                .await
                .unwrap();
        } else {
            env.manager
                .store()
                .write(&ServerMetadata::new(&id, format!("Server {i}")))
                .await
                .unwrap();
        }
    }

    let report = env.manager.recreate_all().await.unwrap();
    assert_eq!(report.total, N);
    assert_eq!(report.succeeded, N - M);
    assert_eq!(report.failed, M);
    assert_eq!(report.outcomes.len(), N);
    assert_eq!(env.docker.count().await, N - M);

    for outcome in &report.outcomes[..M] {
        assert!(matches!(outcome.result, ReconcileResult::Failed { .. }));
    }
}

#[tokio::test]
async fn batch_continues_after_orchestration_failure() {
    let env = env();
    for id in ["alpha", "beta", "gamma"] {
        env.manager
            .store()
            .write(&ServerMetadata::new(id, id))
            .await
            .unwrap();
    }
    env.docker.fail_create_for("beta").await;

    let report = env.manager.recreate_all().await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcomes[1].server_id, "beta");
    assert_eq!(env.docker.state_of("gamma").await, Some(ContainerState::Running));
}

#[tokio::test]
async fn image_is_pulled_once_across_batch() {
    let env = env_with(TestDockerClient::new(), 4);
    for i in 0..5 {
        env.manager
            .store()
            .write(&ServerMetadata::new(format!("s{i}"), "Server"))
            .await
            .unwrap();
    }
    env.manager.recreate_all().await.unwrap();
    assert_eq!(env.docker.pulls.lock().await.len(), 1);
}

#[tokio::test]
async fn status_is_invalidated_by_transitions() {
    let env = env();
    env.manager.create_server(survival()).await.unwrap();
    assert_eq!(env.manager.status("survival").await.unwrap().state_name(), "running");

    env.manager.stop("survival").await.unwrap();
    assert_eq!(env.manager.status("survival").await.unwrap().state_name(), "exited");

    env.manager.delete("survival", DeleteMode::KeepData).await.unwrap();
    assert_eq!(env.manager.status("survival").await.unwrap().state_name(), "absent");
}

#[tokio::test]
async fn purge_delete_removes_everything() {
    let env = env();
    env.manager.create_server(survival()).await.unwrap();
    env.manager.delete("survival", DeleteMode::Purge).await.unwrap();
    assert_eq!(env.docker.count().await, 0);
    assert!(matches!(
        env.manager.status("survival").await,
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test]
async fn subscribers_receive_lifecycle_events() {
    let env = env();
    let mut servers_view = env.manager.subscribe();
    let mut detail_view = env.manager.subscribe();

    env.manager.create_server(survival()).await.unwrap();

    let mut seen = Vec::new();
    while let Some(event) = servers_view.try_recv() {
        seen.push(event.topic);
    }
    assert!(seen.iter().any(|t| t == "servers"));
    assert!(seen.iter().any(|t| t == "server:survival"));

    while detail_view.try_recv().is_some() {}
    env.manager.restart("survival").await.unwrap();
    let mut last = None;
    while let Some(event) = detail_view.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.topic, "server:survival");
    assert_eq!(last.payload["kind"], "restarted");
    assert_eq!(last.payload["state"], "running");
}

#[tokio::test]
async fn update_config_switches_to_direct_network() {
    let env = env();
    env.manager.create_server(survival()).await.unwrap();
    let update = ServerUpdate {
        network: Some("minecraft-macvlan".to_owned()),
        ..ServerUpdate::default()
    };
    env.manager.update_config("survival", update).await.unwrap();

    let status = env.manager.status("survival").await.unwrap();
    assert!(status.is_running());
    let decision = network::resolve(&status.metadata, "");
    assert!(!decision.requires_port_mapping);
    assert_eq!(env.docker.count().await, 1);
}

#[tokio::test]
async fn console_commands_are_tokenized() {
    let env = env();
    env.manager.create_server(survival()).await.unwrap();
    env.manager
        .executor()
        .console("survival", r#"ban "Player One""#)
        .await
        .unwrap();
    let execs = env.docker.execs.lock().await.clone();
    assert_eq!(execs[0], vec!["send-command", "ban", "Player One"]);
}

#[tokio::test]
async fn exec_on_stopped_server_fails() {
    let env = env();
    env.manager.create_server(survival()).await.unwrap();
    env.manager.stop("survival").await.unwrap();
    let err = env
        .manager
        .executor()
        .console("survival", "list")
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Execution { .. }));
}

#[tokio::test(start_paused = true)]
async fn hung_docker_call_times_out() {
    let env = env_with(TestDockerClient::hanging(), 1);
    let err = env.manager.ping().await.unwrap_err();
    assert!(matches!(err, ManagerError::Timeout { .. }));
    assert!(env.manager.health_check().await.is_unhealthy());
}

#[tokio::test(start_paused = true)]
async fn rapid_publishes_coalesce_to_latest() {
    let hub = BroadcastHub::new(Duration::from_millis(250), 16);
    let mut sub = hub.subscribe();
    for i in 0..10 {
        hub.publish("server:survival", serde_json::json!({ "seq": i }));
    }
    let event = sub.recv().await.unwrap();
    assert_eq!(event.payload["seq"], 9);
    assert!(sub.try_recv().is_none());
}

#[test]
fn tokenizer_keeps_quoted_substrings() {
    assert_eq!(
        tokenize(r#"ban "Player One""#).unwrap(),
        vec!["ban".to_owned(), "Player One".to_owned()]
    );
    assert!(tokenize(r#"ban "Player One"#).is_err());
}

#[test]
fn network_decisions_for_reference_metadata() {
    let mut meta = ServerMetadata::new("survival", "Survival");
    meta.version = Some("LATEST".to_owned());
    meta.memory = Some(2_147_483_648);
    let decision = network::resolve(&meta, "");
    assert_eq!(decision.network_mode, "bridge");
    assert!(decision.requires_port_mapping);
    assert_eq!(decision.exposed_port, Some(19132));

    let mut lan = ServerMetadata::new("lan", "Lan");
    lan.network = Some("minecraft-macvlan".to_owned());
    let decision = network::resolve(&lan, "");
    assert_eq!(decision.network_mode, "minecraft-macvlan");
    assert!(!decision.requires_port_mapping);
    assert_eq!(decision.exposed_port, None);
}

#[test]
fn spec_build_is_byte_identical() {
    let mut meta = ServerMetadata::new("survival", "Survival");
    meta.memory = Some(2_147_483_648);
    let config = ManagerConfig::default();
    let root = std::path::Path::new("/srv/cubehost");
    let a = serde_json::to_vec(&spec::build(&meta, root, &config)).unwrap();
    let b = serde_json::to_vec(&spec::build(&meta, root, &config)).unwrap();
    assert_eq!(a, b);
}
