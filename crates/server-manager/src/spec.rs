//! 컨테이너 스펙 생성
//!
//! [`build`]는 메타데이터와 전역 설정만으로 런타임 독립적인 [`ContainerSpec`]을
//! 만듭니다. 같은 입력은 언제나 같은 스펙을 만들며, 선택 필드가 비어 있어도
//! 실패하지 않습니다 (모든 선택 필드에 기본값이 있음).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cubehost_core::types::{NetworkDecision, ServerMetadata};

use crate::config::ManagerConfig;
use crate::network::{self, SERVICE_PORT};

/// 컨테이너 내부 데이터 경로
pub const DATA_PATH: &str = "/data";

/// 서버 ID 레이블
pub const LABEL_SERVER_ID: &str = "cubehost.server-id";
/// 표시 이름 레이블
pub const LABEL_SERVER_NAME: &str = "cubehost.server-name";
/// 관리 대상 표시 레이블
pub const LABEL_MANAGED: &str = "cubehost.managed";

/// 버전 미지정 시 기본값
pub const DEFAULT_VERSION: &str = "LATEST";
/// 표시 이름 미지정 시 기본값
pub const DEFAULT_DISPLAY_NAME: &str = "Bedrock Server";

/// 컨테이너 재시작 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// 명시적으로 정지하지 않는 한 재시작
    UnlessStopped,
}

/// 바인드 마운트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// 호스트 경로
    pub source: String,
    /// 컨테이너 경로
    pub target: String,
}

/// 포트 노출 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// 컨테이너 포트
    pub container_port: u16,
    /// 프로토콜 ("udp")
    pub protocol: String,
    /// 호스트 바인딩 포트 (None이면 노출만 함)
    pub host_port: Option<u16>,
}

impl PortSpec {
    /// `19132/udp` 형식의 키
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// 런타임 독립적인 컨테이너 스펙
///
/// 메타데이터와 전역 설정의 순수 함수 결과이며, 따로 수정하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// 컨테이너 이름 (= 서버 ID)
    pub name: String,
    /// 이미지 참조
    pub image: String,
    /// `KEY=VALUE` 환경변수 목록
    pub env: Vec<String>,
    /// 레이블 (정렬된 순서)
    pub labels: BTreeMap<String, String>,
    /// 바인드 마운트
    pub mounts: Vec<MountSpec>,
    /// 메모리 제한 (바이트)
    pub memory_bytes: u64,
    /// 네트워크 결정
    pub network: NetworkDecision,
    /// 포트 설정
    pub ports: Vec<PortSpec>,
    /// 재시작 정책
    pub restart_policy: RestartPolicy,
    /// stdin/tty 연결 (콘솔 명령 전달용)
    pub interactive: bool,
}

/// 메타데이터로부터 컨테이너 스펙을 생성합니다.
pub fn build(metadata: &ServerMetadata, host_data_root: &Path, config: &ManagerConfig) -> ContainerSpec {
    let decision = network::resolve(metadata, &config.default_network);

    let display_name = non_empty(Some(metadata.name.as_str())).unwrap_or(DEFAULT_DISPLAY_NAME);
    let version = non_empty(metadata.version.as_deref()).unwrap_or(DEFAULT_VERSION);
    let image = non_empty(metadata.image.as_deref()).unwrap_or(&config.default_image);

    let mut env = vec![
        "EULA=TRUE".to_owned(),
        format!("VERSION={version}"),
        format!("SERVER_NAME={display_name}"),
    ];
    if config.enable_ssh {
        env.push("ENABLE_SSH=TRUE".to_owned());
    }

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_SERVER_ID.to_owned(), metadata.server_id.clone());
    labels.insert(LABEL_SERVER_NAME.to_owned(), display_name.to_owned());
    labels.insert(LABEL_MANAGED.to_owned(), "true".to_owned());

    let source = host_data_root.join(&metadata.server_id);
    let mounts = vec![MountSpec {
        source: source.to_string_lossy().into_owned(),
        target: DATA_PATH.to_owned(),
    }];

    let ports = vec![PortSpec {
        container_port: SERVICE_PORT,
        protocol: "udp".to_owned(),
        host_port: if decision.requires_port_mapping {
            decision.exposed_port
        } else {
            None
        },
    }];

    ContainerSpec {
        name: metadata.server_id.clone(),
        image: image.to_owned(),
        env,
        labels,
        mounts,
        memory_bytes: metadata.memory.unwrap_or(config.default_memory_bytes),
        network: decision,
        ports,
        restart_policy: RestartPolicy::UnlessStopped,
        interactive: true,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ManagerConfig {
        ManagerConfig::default()
    }

    fn survival() -> ServerMetadata {
        let mut meta = ServerMetadata::new("survival", "Survival");
        meta.version = Some("1.21.50".to_owned());
        meta.memory = Some(2_147_483_648);
        meta
    }

    #[test]
    fn build_is_deterministic() {
        let meta = survival();
        let root = Path::new("/srv/servers");
        let a = build(&meta, root, &config());
        let b = build(&meta, root, &config());
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn mount_source_joins_host_root_and_id() {
        let spec = build(&survival(), Path::new("/srv/servers"), &config());
        assert_eq!(
            spec.mounts,
            vec![MountSpec {
                source: "/srv/servers/survival".to_owned(),
                target: "/data".to_owned(),
            }]
        );
    }

    #[test]
    fn env_contains_eula_version_and_name() {
        let spec = build(&survival(), Path::new("/srv"), &config());
        assert_eq!(
            spec.env,
            vec!["EULA=TRUE", "VERSION=1.21.50", "SERVER_NAME=Survival"]
        );
    }

    #[test]
    fn missing_optionals_use_defaults() {
        let meta = ServerMetadata::new("bare", "");
        let cfg = config();
        let spec = build(&meta, Path::new("/srv"), &cfg);
        assert!(spec.env.contains(&"VERSION=LATEST".to_owned()));
        assert!(spec.env.contains(&"SERVER_NAME=Bedrock Server".to_owned()));
        assert_eq!(spec.image, cfg.default_image);
        assert_eq!(spec.memory_bytes, cfg.default_memory_bytes);
        assert_eq!(spec.labels[LABEL_SERVER_NAME], "Bedrock Server");
    }

    #[test]
    fn ssh_flag_only_when_enabled() {
        let mut cfg = config();
        let spec = build(&survival(), Path::new("/srv"), &cfg);
        assert!(!spec.env.iter().any(|e| e.starts_with("ENABLE_SSH")));

        cfg.enable_ssh = true;
        let spec = build(&survival(), Path::new("/srv"), &cfg);
        assert_eq!(spec.env.last().map(String::as_str), Some("ENABLE_SSH=TRUE"));
    }

    #[test]
    fn labels_identify_server() {
        let spec = build(&survival(), Path::new("/srv"), &config());
        assert_eq!(spec.labels[LABEL_SERVER_ID], "survival");
        assert_eq!(spec.labels[LABEL_SERVER_NAME], "Survival");
        assert_eq!(spec.labels[LABEL_MANAGED], "true");
        assert_eq!(spec.name, "survival");
    }

    #[test]
    fn bridge_binds_service_port() {
        let spec = build(&survival(), Path::new("/srv"), &config());
        assert_eq!(spec.network.network_mode, "bridge");
        assert_eq!(spec.ports[0].key(), "19132/udp");
        assert_eq!(spec.ports[0].host_port, Some(19132));
    }

    #[test]
    fn macvlan_exposes_port_without_binding() {
        let mut meta = survival();
        meta.network = Some("minecraft-macvlan".to_owned());
        let spec = build(&meta, Path::new("/srv"), &config());
        assert_eq!(spec.network.network_mode, "minecraft-macvlan");
        assert_eq!(spec.ports[0].container_port, 19132);
        assert_eq!(spec.ports[0].host_port, None);
    }

    #[test]
    fn metadata_image_overrides_default() {
        let mut meta = survival();
        meta.image = Some("itzg/minecraft-bedrock-server:2024.12.0".to_owned());
        let spec = build(&meta, Path::new("/srv"), &config());
        assert_eq!(spec.image, "itzg/minecraft-bedrock-server:2024.12.0");
    }

    #[test]
    fn restart_policy_is_unless_stopped() {
        let spec = build(&survival(), Path::new("/srv"), &config());
        assert_eq!(spec.restart_policy, RestartPolicy::UnlessStopped);
        assert!(spec.interactive);
    }

    #[test]
    fn extension_fields_do_not_affect_spec() {
        let plain = survival();
        let mut extended = survival();
        extended
            .extra
            .insert("motd".to_owned(), serde_json::json!("hello"));
        let root = Path::new("/srv");
        assert_eq!(build(&plain, root, &config()), build(&extended, root, &config()));
    }
}
