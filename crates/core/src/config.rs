//! 설정 관리: cubehost.toml 파싱 및 런타임 설정
//!
//! [`CubehostConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`CUBEHOST_SERVERS_DEFAULT_NETWORK=mc-macvlan` 형식)
//! 3. 설정 파일 (`cubehost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), cubehost_core::error::CubehostError> {
//! use cubehost_core::config::CubehostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = CubehostConfig::load("cubehost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = CubehostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, CubehostError};
use crate::types::{MAX_MEMORY_BYTES, MIN_MEMORY_BYTES, validate_network_name};

/// 기본 컨테이너 이미지
pub const DEFAULT_IMAGE: &str = "itzg/minecraft-bedrock-server";
/// 기본 메모리 제한 (2 GiB)
pub const DEFAULT_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// cubehost 통합 설정
///
/// `cubehost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CubehostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 오케스트레이션 API 연결 설정
    #[serde(default)]
    pub docker: DockerConfig,
    /// 서버 관리 설정
    #[serde(default)]
    pub servers: ServersConfig,
    /// 캐시 설정
    #[serde(default)]
    pub cache: CacheConfig,
    /// 브로드캐스트 설정
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl CubehostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CubehostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CubehostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CubehostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CubehostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, CubehostError> {
        toml::from_str(toml_str).map_err(|e| {
            CubehostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CUBEHOST_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "CUBEHOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CUBEHOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "CUBEHOST_GENERAL_PID_FILE");

        // Docker
        override_string(&mut self.docker.host, "CUBEHOST_DOCKER_HOST");
        override_u64(
            &mut self.docker.api_timeout_secs,
            "CUBEHOST_DOCKER_API_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.docker.pull_timeout_secs,
            "CUBEHOST_DOCKER_PULL_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.docker.stop_timeout_secs,
            "CUBEHOST_DOCKER_STOP_TIMEOUT_SECS",
        );

        // Servers
        override_string(&mut self.servers.servers_dir, "CUBEHOST_SERVERS_SERVERS_DIR");
        override_string(
            &mut self.servers.host_data_root,
            "CUBEHOST_SERVERS_HOST_DATA_ROOT",
        );
        override_string(
            &mut self.servers.default_image,
            "CUBEHOST_SERVERS_DEFAULT_IMAGE",
        );
        override_string(
            &mut self.servers.default_network,
            "CUBEHOST_SERVERS_DEFAULT_NETWORK",
        );
        override_u64(
            &mut self.servers.default_memory_bytes,
            "CUBEHOST_SERVERS_DEFAULT_MEMORY_BYTES",
        );
        override_bool(&mut self.servers.enable_ssh, "CUBEHOST_SERVERS_ENABLE_SSH");
        override_bool(
            &mut self.servers.reconcile_on_start,
            "CUBEHOST_SERVERS_RECONCILE_ON_START",
        );
        override_usize(
            &mut self.servers.reconcile_concurrency,
            "CUBEHOST_SERVERS_RECONCILE_CONCURRENCY",
        );
        override_bool(
            &mut self.servers.strict_create,
            "CUBEHOST_SERVERS_STRICT_CREATE",
        );

        // Cache
        override_u64(
            &mut self.cache.inspect_ttl_secs,
            "CUBEHOST_CACHE_INSPECT_TTL_SECS",
        );
        override_u64(&mut self.cache.file_ttl_secs, "CUBEHOST_CACHE_FILE_TTL_SECS");

        // Broadcast
        override_u64(
            &mut self.broadcast.coalesce_window_ms,
            "CUBEHOST_BROADCAST_COALESCE_WINDOW_MS",
        );
        override_usize(
            &mut self.broadcast.subscriber_topic_limit,
            "CUBEHOST_BROADCAST_SUBSCRIBER_TOPIC_LIMIT",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "CUBEHOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "CUBEHOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "CUBEHOST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), CubehostError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.docker.api_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "docker.api_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.docker.pull_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "docker.pull_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.servers.servers_dir.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "servers.servers_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if self.servers.default_image.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "servers.default_image".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&self.servers.default_memory_bytes) {
            return Err(ConfigError::InvalidValue {
                field: "servers.default_memory_bytes".to_owned(),
                reason: format!("must be {MIN_MEMORY_BYTES}-{MAX_MEMORY_BYTES}"),
            }
            .into());
        }

        if let Err(e) = validate_network_name(&self.servers.default_network) {
            return Err(ConfigError::InvalidValue {
                field: "servers.default_network".to_owned(),
                reason: e.to_string(),
            }
            .into());
        }

        if self.servers.reconcile_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "servers.reconcile_concurrency".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.cache.inspect_ttl_secs == 0 || self.cache.file_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache".to_owned(),
                reason: "ttl values must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.broadcast.subscriber_topic_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broadcast.subscriber_topic_limit".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "metrics.port".to_owned(),
                reason: "must be 1-65535 when metrics are enabled".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용 안 함)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/cubehost.pid".to_owned(),
        }
    }
}

/// 오케스트레이션 API 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// 연결 문자열 (`unix:///var/run/docker.sock`, `tcp://host:2375`, 빈 문자열이면 로컬 기본값)
    pub host: String,
    /// API 호출 타임아웃 (초)
    pub api_timeout_secs: u64,
    /// 이미지 pull 타임아웃 (초)
    pub pull_timeout_secs: u64,
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_timeout_secs: 30,
            pull_timeout_secs: 600,
            stop_timeout_secs: 30,
        }
    }
}

/// 서버 관리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    /// 서버 데이터 디렉토리 (매니저 프로세스 관점의 경로)
    pub servers_dir: String,
    /// 호스트 관점의 데이터 루트 (빈 문자열이면 자동 탐지)
    pub host_data_root: String,
    /// 기본 컨테이너 이미지
    pub default_image: String,
    /// 기본 네트워크 (빈 문자열이면 bridge)
    pub default_network: String,
    /// 기본 메모리 제한 (바이트)
    pub default_memory_bytes: u64,
    /// 컨테이너 SSH 활성화
    pub enable_ssh: bool,
    /// 데몬 시작 시 일괄 재조정 수행
    pub reconcile_on_start: bool,
    /// 일괄 재조정 동시 처리 수
    pub reconcile_concurrency: usize,
    /// 이미 존재하는 컨테이너 생성 시 에러 반환
    pub strict_create: bool,
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            servers_dir: "/var/lib/cubehost/servers".to_owned(),
            host_data_root: String::new(),
            default_image: DEFAULT_IMAGE.to_owned(),
            default_network: String::new(),
            default_memory_bytes: DEFAULT_MEMORY_BYTES,
            enable_ssh: false,
            reconcile_on_start: true,
            reconcile_concurrency: 1,
            strict_create: false,
        }
    }
}

/// 캐시 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 컨테이너 조회 결과 TTL (초)
    pub inspect_ttl_secs: u64,
    /// 파일 내용 TTL (초)
    pub file_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inspect_ttl_secs: 30,
            file_ttl_secs: 30,
        }
    }
}

/// 브로드캐스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// 같은 토픽 이벤트 병합 창 (밀리초, 0이면 즉시 전달)
    pub coalesce_window_ms: u64,
    /// 관찰자당 대기 가능한 토픽 수
    pub subscriber_topic_limit: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 250,
            subscriber_topic_limit: 1024,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
