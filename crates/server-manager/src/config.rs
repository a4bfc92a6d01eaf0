//! 서버 매니저 설정
//!
//! [`ManagerConfig`]는 core의 [`CubehostConfig`](cubehost_core::config::CubehostConfig)에서
//! 서버 매니저가 사용하는 섹션(docker, servers, cache, broadcast)만 모아 평탄화한 설정입니다.
//!
//! # 사용 예시
//! ```ignore
//! use cubehost_core::config::CubehostConfig;
//! use cubehost_manager::config::ManagerConfig;
//!
//! let core_config = CubehostConfig::default();
//! let config = ManagerConfig::from_core(&core_config);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cubehost_core::config::{CubehostConfig, DEFAULT_IMAGE, DEFAULT_MEMORY_BYTES};
use cubehost_core::types::{MAX_MEMORY_BYTES, MIN_MEMORY_BYTES, validate_network_name};

use crate::error::ManagerError;

/// 서버 매니저 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// 오케스트레이션 API 연결 문자열 (빈 문자열이면 로컬 기본값)
    pub docker_host: String,
    /// API 호출 타임아웃 (초)
    pub api_timeout_secs: u64,
    /// 이미지 pull 타임아웃 (초)
    pub pull_timeout_secs: u64,
    /// 컨테이너 정지 유예 시간 (초)
    pub stop_timeout_secs: u64,
    /// 서버 데이터 디렉토리
    pub servers_dir: PathBuf,
    /// 호스트 관점 데이터 루트 (None이면 자동 탐지)
    pub host_data_root: Option<PathBuf>,
    /// 기본 컨테이너 이미지
    pub default_image: String,
    /// 기본 네트워크 (빈 문자열이면 bridge)
    pub default_network: String,
    /// 기본 메모리 제한 (바이트)
    pub default_memory_bytes: u64,
    /// 컨테이너 SSH 활성화
    pub enable_ssh: bool,
    /// 일괄 재조정 동시 처리 수
    pub reconcile_concurrency: usize,
    /// 이미 존재하는 컨테이너 생성 시 에러 반환
    pub strict_create: bool,
    /// 컨테이너 조회 캐시 TTL (초)
    pub inspect_ttl_secs: u64,
    /// 파일 내용 캐시 TTL (초)
    pub file_ttl_secs: u64,
    /// 브로드캐스트 병합 창 (밀리초)
    pub coalesce_window_ms: u64,
    /// 관찰자당 대기 가능한 토픽 수
    pub subscriber_topic_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            docker_host: String::new(),
            api_timeout_secs: 30,
            pull_timeout_secs: 600,
            stop_timeout_secs: 30,
            servers_dir: PathBuf::from("/var/lib/cubehost/servers"),
            host_data_root: None,
            default_image: DEFAULT_IMAGE.to_owned(),
            default_network: String::new(),
            default_memory_bytes: DEFAULT_MEMORY_BYTES,
            enable_ssh: false,
            reconcile_concurrency: 1,
            strict_create: false,
            inspect_ttl_secs: 30,
            file_ttl_secs: 30,
            coalesce_window_ms: 250,
            subscriber_topic_limit: 1024,
        }
    }
}

/// 설정 상한값 상수
const MAX_API_TIMEOUT_SECS: u64 = 600;
const MAX_PULL_TIMEOUT_SECS: u64 = 3600;
const MAX_STOP_TIMEOUT_SECS: u64 = 600;
const MAX_RECONCILE_CONCURRENCY: usize = 32;
const MAX_CACHE_TTL_SECS: u64 = 3600;
const MAX_COALESCE_WINDOW_MS: u64 = 5_000;
const MAX_SUBSCRIBER_TOPIC_LIMIT: usize = 100_000;

impl ManagerConfig {
    /// core의 `CubehostConfig`에서 매니저 설정을 생성합니다.
    pub fn from_core(core: &CubehostConfig) -> Self {
        let host_data_root = if core.servers.host_data_root.is_empty() {
            None
        } else {
            Some(PathBuf::from(&core.servers.host_data_root))
        };

        Self {
            docker_host: core.docker.host.clone(),
            api_timeout_secs: core.docker.api_timeout_secs,
            pull_timeout_secs: core.docker.pull_timeout_secs,
            stop_timeout_secs: core.docker.stop_timeout_secs,
            servers_dir: PathBuf::from(&core.servers.servers_dir),
            host_data_root,
            default_image: core.servers.default_image.clone(),
            default_network: core.servers.default_network.clone(),
            default_memory_bytes: core.servers.default_memory_bytes,
            enable_ssh: core.servers.enable_ssh,
            reconcile_concurrency: core.servers.reconcile_concurrency,
            strict_create: core.servers.strict_create,
            inspect_ttl_secs: core.cache.inspect_ttl_secs,
            file_ttl_secs: core.cache.file_ttl_secs,
            coalesce_window_ms: core.broadcast.coalesce_window_ms,
            subscriber_topic_limit: core.broadcast.subscriber_topic_limit,
        }
    }

    /// API 호출 타임아웃
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// 이미지 pull 타임아웃
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.api_timeout_secs == 0 || self.api_timeout_secs > MAX_API_TIMEOUT_SECS {
            return Err(ManagerError::Config {
                field: "api_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_API_TIMEOUT_SECS}"),
            });
        }

        if self.pull_timeout_secs == 0 || self.pull_timeout_secs > MAX_PULL_TIMEOUT_SECS {
            return Err(ManagerError::Config {
                field: "pull_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_PULL_TIMEOUT_SECS}"),
            });
        }

        if self.stop_timeout_secs > MAX_STOP_TIMEOUT_SECS {
            return Err(ManagerError::Config {
                field: "stop_timeout_secs".to_owned(),
                reason: format!("must be 0-{MAX_STOP_TIMEOUT_SECS}"),
            });
        }

        if self.servers_dir.as_os_str().is_empty() {
            return Err(ManagerError::Config {
                field: "servers_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.default_image.is_empty() {
            return Err(ManagerError::Config {
                field: "default_image".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if !(MIN_MEMORY_BYTES..=MAX_MEMORY_BYTES).contains(&self.default_memory_bytes) {
            return Err(ManagerError::Config {
                field: "default_memory_bytes".to_owned(),
                reason: format!("must be {MIN_MEMORY_BYTES}-{MAX_MEMORY_BYTES}"),
            });
        }

        validate_network_name(&self.default_network).map_err(|e| ManagerError::Config {
            field: "default_network".to_owned(),
            reason: e.to_string(),
        })?;

        if self.reconcile_concurrency == 0
            || self.reconcile_concurrency > MAX_RECONCILE_CONCURRENCY
        {
            return Err(ManagerError::Config {
                field: "reconcile_concurrency".to_owned(),
                reason: format!("must be 1-{MAX_RECONCILE_CONCURRENCY}"),
            });
        }

        for (field, ttl) in [
            ("inspect_ttl_secs", self.inspect_ttl_secs),
            ("file_ttl_secs", self.file_ttl_secs),
        ] {
            if ttl == 0 || ttl > MAX_CACHE_TTL_SECS {
                return Err(ManagerError::Config {
                    field: field.to_owned(),
                    reason: format!("must be 1-{MAX_CACHE_TTL_SECS}"),
                });
            }
        }

        if self.coalesce_window_ms > MAX_COALESCE_WINDOW_MS {
            return Err(ManagerError::Config {
                field: "coalesce_window_ms".to_owned(),
                reason: format!("must be 0-{MAX_COALESCE_WINDOW_MS}"),
            });
        }

        if self.subscriber_topic_limit == 0
            || self.subscriber_topic_limit > MAX_SUBSCRIBER_TOPIC_LIMIT
        {
            return Err(ManagerError::Config {
                field: "subscriber_topic_limit".to_owned(),
                reason: format!("must be 1-{MAX_SUBSCRIBER_TOPIC_LIMIT}"),
            });
        }

        Ok(())
    }
}

/// 서버 매니저 설정 빌더
#[derive(Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 문자열을 설정합니다.
    pub fn docker_host(mut self, host: impl Into<String>) -> Self {
        self.config.docker_host = host.into();
        self
    }

    /// API 호출 타임아웃(초)을 설정합니다.
    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// 이미지 pull 타임아웃(초)을 설정합니다.
    pub fn pull_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pull_timeout_secs = secs;
        self
    }

    /// 서버 데이터 디렉토리를 설정합니다.
    pub fn servers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.servers_dir = dir.into();
        self
    }

    /// 호스트 관점 데이터 루트를 고정합니다.
    pub fn host_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.host_data_root = Some(root.into());
        self
    }

    /// 기본 이미지를 설정합니다.
    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.config.default_image = image.into();
        self
    }

    /// 기본 네트워크를 설정합니다.
    pub fn default_network(mut self, network: impl Into<String>) -> Self {
        self.config.default_network = network.into();
        self
    }

    /// 기본 메모리 제한을 설정합니다.
    pub fn default_memory_bytes(mut self, bytes: u64) -> Self {
        self.config.default_memory_bytes = bytes;
        self
    }

    /// SSH 활성화 여부를 설정합니다.
    pub fn enable_ssh(mut self, enabled: bool) -> Self {
        self.config.enable_ssh = enabled;
        self
    }

    /// 일괄 재조정 동시 처리 수를 설정합니다.
    pub fn reconcile_concurrency(mut self, n: usize) -> Self {
        self.config.reconcile_concurrency = n;
        self
    }

    /// strict 생성 모드를 설정합니다.
    pub fn strict_create(mut self, strict: bool) -> Self {
        self.config.strict_create = strict;
        self
    }

    /// 캐시 TTL(초)을 설정합니다.
    pub fn cache_ttl_secs(mut self, inspect: u64, file: u64) -> Self {
        self.config.inspect_ttl_secs = inspect;
        self.config.file_ttl_secs = file;
        self
    }

    /// 브로드캐스트 병합 창(밀리초)을 설정합니다.
    pub fn coalesce_window_ms(mut self, ms: u64) -> Self {
        self.config.coalesce_window_ms = ms;
        self
    }

    /// 설정을 빌드합니다.
    pub fn build(self) -> Result<ManagerConfig, ManagerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
