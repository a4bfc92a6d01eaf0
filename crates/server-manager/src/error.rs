//! 서버 매니저 에러 타입
//!
//! [`ManagerError`]는 서버 매니저 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<ManagerError> for CubehostError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use cubehost_core::error::{CubehostError, ServerError};

/// 서버 매니저 도메인 에러
///
/// 메타데이터 검증, 오케스트레이션 API 호출, 컨테이너 내부 명령 실행,
/// 설정 에러 등 서버 매니저 내부의 모든 에러 상황을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// 메타데이터 값이 범위를 벗어남
    #[error("validation failed for '{field}': {reason}")]
    Validation {
        /// 문제가 된 필드명
        field: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 서버 메타데이터가 존재하지 않음
    #[error("server not found: {0}")]
    NotFound(String),

    /// 서버에 연결된 컨테이너가 존재하지 않음
    #[error("container not found for server: {0}")]
    ContainerNotFound(String),

    /// 이미 존재하는 서버 또는 컨테이너
    #[error("already exists: {0}")]
    Conflict(String),

    /// 오케스트레이션 API 거부
    #[error("{operation} failed for '{target}': {reason}")]
    Orchestration {
        /// 수행하던 작업
        operation: String,
        /// 대상 (서버 ID 또는 이미지)
        target: String,
        /// 실패 사유
        reason: String,
    },

    /// 오케스트레이션 API 호출 타임아웃
    #[error("{operation} timed out for '{target}' after {timeout_secs}s")]
    Timeout {
        /// 수행하던 작업
        operation: String,
        /// 대상
        target: String,
        /// 적용된 타임아웃 (초)
        timeout_secs: u64,
    },

    /// 컨테이너 내부 명령 실행 실패
    #[error("execution failed on '{server_id}': {reason}")]
    Execution {
        /// 대상 서버 ID
        server_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 메타데이터 파일 손상 또는 직렬화 실패
    #[error("metadata error for '{server_id}': {reason}")]
    Metadata {
        /// 대상 서버 ID
        server_id: String,
        /// 실패 사유
        reason: String,
    },

    /// Docker 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파일 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    /// 오케스트레이션 API 실패로 분류되는 에러인지 확인합니다.
    pub fn is_orchestration(&self) -> bool {
        matches!(
            self,
            Self::Orchestration { .. } | Self::Timeout { .. } | Self::DockerConnection(_)
        )
    }
}

impl From<ServerError> for ManagerError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Validation { field, reason } => Self::Validation { field, reason },
            ServerError::NotFound(id) => Self::NotFound(id),
            ServerError::Conflict(id) => Self::Conflict(id),
            ServerError::Orchestration {
                operation,
                target,
                reason,
            } => Self::Orchestration {
                operation,
                target,
                reason,
            },
            ServerError::Execution { server_id, reason } => Self::Execution { server_id, reason },
        }
    }
}

impl From<ManagerError> for CubehostError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Validation { field, reason } => {
                CubehostError::Server(ServerError::Validation { field, reason })
            }
            ManagerError::Config { field, reason } => {
                CubehostError::Server(ServerError::Validation { field, reason })
            }
            ManagerError::NotFound(id) | ManagerError::ContainerNotFound(id) => {
                CubehostError::Server(ServerError::NotFound(id))
            }
            ManagerError::Conflict(id) => CubehostError::Server(ServerError::Conflict(id)),
            ManagerError::Orchestration {
                operation,
                target,
                reason,
            } => CubehostError::Server(ServerError::Orchestration {
                operation,
                target,
                reason,
            }),
            ManagerError::Timeout {
                operation,
                target,
                timeout_secs,
            } => CubehostError::Server(ServerError::Orchestration {
                operation,
                target,
                reason: format!("timed out after {timeout_secs}s"),
            }),
            ManagerError::DockerConnection(reason) => {
                CubehostError::Server(ServerError::Orchestration {
                    operation: "connect".to_owned(),
                    target: "docker".to_owned(),
                    reason,
                })
            }
            ManagerError::Execution { server_id, reason } => {
                CubehostError::Server(ServerError::Execution { server_id, reason })
            }
            ManagerError::Metadata { server_id, reason } => {
                CubehostError::Server(ServerError::Validation {
                    field: format!("{server_id}.metadata"),
                    reason,
                })
            }
            ManagerError::Io(e) => CubehostError::Io(e),
        }
    }
}
