//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 서버 메타데이터, 네트워크 결정, 컨테이너 관측 정보 등
//! 모든 크레이트가 공유하는 데이터 구조를 정의합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// 서버 ID 최대 길이
pub const MAX_SERVER_ID_LEN: usize = 64;
/// 표시 이름 최대 길이
pub const MAX_SERVER_NAME_LEN: usize = 100;
/// 메모리 하한 (256 MiB)
pub const MIN_MEMORY_BYTES: u64 = 256 * 1024 * 1024;
/// 메모리 상한 (32 GiB)
pub const MAX_MEMORY_BYTES: u64 = 32 * 1024 * 1024 * 1024;
/// 네트워크 이름 최대 길이
pub const MAX_NETWORK_NAME_LEN: usize = 128;

/// 서버 메타데이터: 서버 하나당 하나의 영속 레코드
///
/// 컨테이너 스펙을 재구성하는 유일한 원천입니다. 실행 중인 컨테이너는
/// 언제나 현재 레코드로부터 다시 만들어낼 수 있어야 합니다.
///
/// 알 수 없는 필드는 `extra`에 보존되어 읽기/쓰기 왕복에서 사라지지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// 서버 ID (컨테이너 이름 및 데이터 디렉토리 이름)
    #[serde(default)]
    pub server_id: String,
    /// 표시 이름
    pub name: String,
    /// 컨테이너 이미지 (없으면 전역 기본값)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// 게임 버전 선택자 (없으면 "LATEST")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// 메모리 제한 (바이트)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    /// 네트워크 이름 (없으면 기본 bridge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// 호스트 포트 (포트 매핑이 필요한 경우에만 의미 있음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// 생성 시각 (Unix epoch 초)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// 확장 필드
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServerMetadata {
    /// 필수 필드만으로 메타데이터를 생성합니다.
    pub fn new(server_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            image: None,
            version: None,
            memory: None,
            network: None,
            port: None,
            created_at: None,
            extra: serde_json::Map::new(),
        }
    }

    /// 레코드 전체의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ServerError> {
        validate_server_id(&self.server_id)?;
        validate_server_name(&self.name)?;

        if let Some(memory) = self.memory {
            validate_memory(memory)?;
        }

        if let Some(network) = &self.network {
            validate_network_name(network)?;
        }

        if let Some(version) = &self.version
            && (version.is_empty()
                || version.len() > 64
                || !version
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(ServerError::Validation {
                field: "version".to_owned(),
                reason: "must be 1-64 characters of [A-Za-z0-9._-]".to_owned(),
            });
        }

        if self.port == Some(0) {
            return Err(ServerError::Validation {
                field: "port".to_owned(),
                reason: "must be 1-65535".to_owned(),
            });
        }

        Ok(())
    }
}

/// 서버 ID를 검증합니다.
///
/// 소문자, 숫자, `-`, `_`만 허용하며 첫 글자는 영숫자여야 합니다.
/// 컨테이너 이름과 디렉토리 이름으로 그대로 사용되므로 경로 구분자를 허용하지 않습니다.
pub fn validate_server_id(id: &str) -> Result<(), ServerError> {
    if id.is_empty() || id.len() > MAX_SERVER_ID_LEN {
        return Err(ServerError::Validation {
            field: "server_id".to_owned(),
            reason: format!("length {} (must be 1-{MAX_SERVER_ID_LEN})", id.len()),
        });
    }

    let mut chars = id.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let rest_ok =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if !first_ok || !rest_ok {
        return Err(ServerError::Validation {
            field: "server_id".to_owned(),
            reason: "must match [a-z0-9][a-z0-9_-]*".to_owned(),
        });
    }

    Ok(())
}

/// 표시 이름을 검증합니다.
pub fn validate_server_name(name: &str) -> Result<(), ServerError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_SERVER_NAME_LEN {
        return Err(ServerError::Validation {
            field: "name".to_owned(),
            reason: format!("length {len} (must be 1-{MAX_SERVER_NAME_LEN})"),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '\''))
    {
        return Err(ServerError::Validation {
            field: "name".to_owned(),
            reason: "contains characters outside letters, digits, space and -_.'".to_owned(),
        });
    }

    if name.trim().is_empty() {
        return Err(ServerError::Validation {
            field: "name".to_owned(),
            reason: "must not be blank".to_owned(),
        });
    }

    Ok(())
}

/// 메모리 제한을 검증합니다 (256 MiB ~ 32 GiB).
pub fn validate_memory(bytes: u64) -> Result<(), ServerError> {
    if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&bytes) {
        return Err(ServerError::Validation {
            field: "memory".to_owned(),
            reason: format!("{bytes} bytes (must be {MIN_MEMORY_BYTES}-{MAX_MEMORY_BYTES})"),
        });
    }
    Ok(())
}

/// 네트워크 이름을 검증합니다.
///
/// 빈 문자열은 "설정 없음"으로 취급하므로 허용합니다.
pub fn validate_network_name(network: &str) -> Result<(), ServerError> {
    if network.len() > MAX_NETWORK_NAME_LEN {
        return Err(ServerError::Validation {
            field: "network".to_owned(),
            reason: format!("length {} (max {MAX_NETWORK_NAME_LEN})", network.len()),
        });
    }
    if !network
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ServerError::Validation {
            field: "network".to_owned(),
            reason: "must contain only [A-Za-z0-9._-]".to_owned(),
        });
    }
    Ok(())
}

/// 네트워크 결정: 메타데이터와 전역 기본값에서 매번 새로 계산됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDecision {
    /// 적용할 네트워크 모드 (미설정 시 "bridge")
    pub network_mode: String,
    /// 호스트 포트 바인딩 필요 여부
    pub requires_port_mapping: bool,
    /// 호스트에 바인딩되는 포트 (직접 주소 지정 네트워크에서는 None)
    pub exposed_port: Option<u16>,
}

/// 런타임이 보고하는 컨테이너 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// 생성됨, 아직 시작하지 않음
    Created,
    /// 실행 중
    Running,
    /// 일시정지됨
    Paused,
    /// 재시작 중
    Restarting,
    /// 종료됨
    Exited,
    /// 제거 중
    Removing,
    /// 비정상 종료
    Dead,
    /// 알 수 없음
    #[default]
    Unknown,
}

impl ContainerState {
    /// Docker API 상태 문자열을 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "removing" => Self::Removing,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// 실행 중 여부
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Removing => "removing",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 컨테이너 마운트 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    /// 호스트 측 경로
    pub source: String,
    /// 컨테이너 내부 경로
    pub destination: String,
}

/// 컨테이너 정보
///
/// 오케스트레이션 API에서 관측한 컨테이너 상태입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// 컨테이너 ID
    pub id: String,
    /// 컨테이너 이름
    pub name: String,
    /// 이미지명
    pub image: String,
    /// 상태
    pub state: ContainerState,
    /// 레이블
    pub labels: BTreeMap<String, String>,
    /// 마운트 목록 (list 응답에는 비어 있을 수 있음)
    pub mounts: Vec<MountInfo>,
    /// 생성 시각
    pub created_at: SystemTime,
}

impl ContainerInfo {
    /// 레이블 값을 조회합니다.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

impl fmt::Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) image={} state={}",
            self.name,
            &self.id[..12.min(self.id.len())],
            self.image,
            self.state,
        )
    }
}

/// 서버 상태: 메타데이터와 관측된 컨테이너를 합친 조회 결과
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// 서버 메타데이터
    pub metadata: ServerMetadata,
    /// 관측된 컨테이너 (없으면 None)
    pub container: Option<ContainerInfo>,
}

impl ServerStatus {
    /// 컨테이너가 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.container.as_ref().is_some_and(|c| c.state.is_running())
    }

    /// 상태 요약 문자열 ("absent", "running", "exited" 등)
    pub fn state_name(&self) -> String {
        match &self.container {
            Some(c) => c.state.to_string(),
            None => "absent".to_owned(),
        }
    }
}
