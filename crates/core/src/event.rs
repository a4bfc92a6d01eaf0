//! 이벤트 시스템: 관찰자에게 전달되는 상태 변경 알림
//!
//! [`BroadcastEvent`]는 토픽 단위로 분류된 일회성 알림입니다.
//! 영속화되지 않으며, 발행 시점에 연결된 관찰자에게만 전달됩니다.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// --- 토픽 상수 ---

/// 서버 목록 변경 토픽 (생성/삭제/일괄 재조정)
pub const TOPIC_SERVERS: &str = "servers";
/// 개별 서버 토픽 접두어
pub const TOPIC_SERVER_PREFIX: &str = "server:";

/// 병합 키에 포함되는 페이로드 필드
const COALESCE_FIELDS: [&str; 2] = ["server_id", "path"];

/// 개별 서버의 상태 변경 토픽명을 만듭니다.
pub fn server_topic(server_id: &str) -> String {
    format!("{TOPIC_SERVER_PREFIX}{server_id}")
}

/// 브로드캐스트 이벤트
///
/// 같은 토픽의 이벤트는 관찰자에게 발행 순서대로 전달됩니다.
/// 서로 다른 토픽 사이의 순서는 보장하지 않습니다.
/// 미전달 이벤트의 대체 단위는 [`BroadcastEvent::coalesce_key`]입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// 이벤트 고유 ID (UUID v4)
    pub id: String,
    /// 토픽
    pub topic: String,
    /// 구조화된 페이로드
    pub payload: serde_json::Value,
    /// 발행 시각
    pub timestamp: SystemTime,
}

impl BroadcastEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload,
            timestamp: SystemTime::now(),
        }
    }

    /// 병합 키: 토픽에 페이로드의 `server_id`, `path` 문자열 필드를 덧붙인 값
    ///
    /// 키가 같은 미전달 이벤트만 서로 대체됩니다. 목록 토픽에 실린 서로 다른
    /// 서버의 이벤트나 서로 다른 파일의 쓰기 이벤트는 각자 전달됩니다.
    pub fn coalesce_key(&self) -> String {
        let mut key = self.topic.clone();
        for field in COALESCE_FIELDS {
            if let Some(value) = self.payload.get(field).and_then(serde_json::Value::as_str) {
                key.push('\u{1f}');
                key.push_str(field);
                key.push('=');
                key.push_str(value);
            }
        }
        key
    }
}

impl fmt::Display for BroadcastEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BroadcastEvent[{}] topic={} at={}",
            &self.id[..8.min(self.id.len())],
            self.topic,
            unix_timestamp_str(self.timestamp),
        )
    }
}

fn unix_timestamp_str(ts: SystemTime) -> String {
    match ts.duration_since(UNIX_EPOCH) {
        Ok(d) => format!("{}.{:03}", d.as_secs(), d.subsec_millis()),
        Err(_) => "0.000".to_owned(),
    }
}
