//! 상태 점검: 컴포넌트 건강 상태 표현

use std::fmt;

use serde::{Deserialize, Serialize};

/// 컴포넌트 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}
