//! # cubehost-core
//!
//! cubehost 전체에서 공유하는 타입, 설정, 에러, 이벤트, 메트릭 정의.
//!
//! 서버 매니저, 데몬, CLI는 이 크레이트의 타입을 통해서만 서로 통신합니다.

pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, CubehostError, ServerError};

// 설정
pub use config::CubehostConfig;

// 이벤트
pub use event::BroadcastEvent;

// 상태 점검
pub use health::HealthStatus;

// 도메인 타입
pub use types::{
    ContainerInfo, ContainerState, MountInfo, NetworkDecision, ServerMetadata, ServerStatus,
};
