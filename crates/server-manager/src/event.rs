//! Server lifecycle events.
//!
//! [`ServerEvent`] describes a state change caused by a lifecycle operation.
//! The lifecycle manager converts each one into a [`BroadcastEvent`] on the
//! server's own topic, and operations that change the set of servers also
//! publish on [`TOPIC_SERVERS`].
//!
//! # Examples
//!
//! ```
//! use cubehost_manager::{ServerEvent, ServerEventKind};
//!
//! let event = ServerEvent::new("survival", ServerEventKind::Started);
//! let broadcast = event.to_broadcast();
//! assert_eq!(broadcast.topic, "server:survival");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use cubehost_core::event::{BroadcastEvent, TOPIC_SERVERS, server_topic};

/// Server lifecycle event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEventKind {
    /// 컨테이너 생성됨
    Created,
    /// 기존 데이터 디렉토리에서 가져옴
    Imported,
    /// 컨테이너 시작됨
    Started,
    /// 컨테이너 정지됨
    Stopped,
    /// 컨테이너 재시작됨
    Restarted,
    /// 컨테이너 재생성됨
    Recreated,
    /// 서버 삭제됨 (컨테이너와 데이터 모두)
    Deleted,
    /// 메타데이터 변경됨
    ConfigUpdated,
    /// 파일 내용 변경됨
    FileWritten {
        /// 정규화된 상대 경로
        path: String,
    },
    /// 작업이 실패함 (관측 상태를 다시 맞추라는 신호)
    Failed {
        /// 실패한 작업 이름
        operation: String,
    },
}

impl ServerEventKind {
    /// 서버 목록 자체가 바뀌는 이벤트인지 확인합니다.
    pub fn changes_membership(&self) -> bool {
        matches!(self, Self::Created | Self::Imported | Self::Deleted)
    }
}

impl fmt::Display for ServerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Imported => write!(f, "imported"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
            Self::Restarted => write!(f, "restarted"),
            Self::Recreated => write!(f, "recreated"),
            Self::Deleted => write!(f, "deleted"),
            Self::ConfigUpdated => write!(f, "config_updated"),
            Self::FileWritten { path } => write!(f, "file_written({path})"),
            Self::Failed { operation } => write!(f, "failed({operation})"),
        }
    }
}

/// Server lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 대상 서버 ID
    pub server_id: String,
    /// 이벤트 종류
    pub kind: ServerEventKind,
    /// 작업 이후 관측된 컨테이너 상태 (알 수 없으면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ServerEvent {
    /// Creates an event with no observed state attached.
    pub fn new(server_id: impl Into<String>, kind: ServerEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server_id: server_id.into(),
            kind,
            state: None,
        }
    }

    /// Attaches the container state observed after the operation.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Converts into a broadcast event on the server's own topic.
    pub fn to_broadcast(&self) -> BroadcastEvent {
        BroadcastEvent::new(server_topic(&self.server_id), self.payload())
    }

    /// Converts into a broadcast event on the server-list topic.
    pub fn to_list_broadcast(&self) -> BroadcastEvent {
        BroadcastEvent::new(TOPIC_SERVERS, self.payload())
    }

    fn payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "event_id": self.id,
            "server_id": self.server_id,
            "kind": self.kind.to_string(),
        });
        if let Some(state) = &self.state {
            payload["state"] = serde_json::Value::String(state.clone());
        }
        match &self.kind {
            ServerEventKind::FileWritten { path } => {
                payload["path"] = serde_json::Value::String(path.clone());
            }
            ServerEventKind::Failed { operation } => {
                payload["operation"] = serde_json::Value::String(operation.clone());
            }
            _ => {}
        }
        payload
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerEvent[{}] server={} kind={}",
            &self.id[..8.min(self.id.len())],
            self.server_id,
            self.kind,
        )
    }
}
