//! 에러 타입: 도메인별 에러 정의

/// cubehost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum CubehostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 서버 관리 에러
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 서버 관리 에러
///
/// 사용자에게 노출되는 실패 분류입니다. 각 변형은 어떤 작업이
/// 어느 서버에서 실패했는지 표시할 수 있을 만큼의 정보를 담습니다.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// 메타데이터 값이 범위를 벗어남 (이름, 메모리, 네트워크 등)
    #[error("validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// 서버 메타데이터 또는 컨테이너가 존재하지 않음
    #[error("not found: {0}")]
    NotFound(String),

    /// 이미 존재하는 컨테이너를 생성하려 함 (strict 모드에서만 에러)
    #[error("conflict: {0}")]
    Conflict(String),

    /// 오케스트레이션 API 거부 또는 타임아웃
    #[error("orchestration failed during {operation} on '{target}': {reason}")]
    Orchestration {
        operation: String,
        target: String,
        reason: String,
    },

    /// 컨테이너 내부 명령 실행 실패
    #[error("execution failed on '{server_id}': {reason}")]
    Execution { server_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_top_level() {
        let err: CubehostError = ConfigError::InvalidValue {
            field: "servers.default_memory_bytes".to_owned(),
            reason: "too small".to_owned(),
        }
        .into();
        assert!(matches!(err, CubehostError::Config(_)));
        assert!(err.to_string().contains("servers.default_memory_bytes"));
    }

    #[test]
    fn orchestration_error_display_includes_operation_and_target() {
        let err = ServerError::Orchestration {
            operation: "create".to_owned(),
            target: "survival".to_owned(),
            reason: "image not found".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("create"));
        assert!(msg.contains("survival"));
        assert!(msg.contains("image not found"));
    }

    #[test]
    fn server_error_converts_to_top_level() {
        let err: CubehostError = ServerError::NotFound("creative".to_owned()).into();
        assert!(matches!(err, CubehostError::Server(ServerError::NotFound(_))));
    }
}
