//! 클라이언트-서버 메시지 프로토콜 정의

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 방 메시지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Ping,
    Pong,
    ResourceUpdate,
    UserJoined,
    UserLeft,
    Error,
}

/// 방 메시지 (클라이언트 ↔ 서버 공통 형식)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// epoch millis
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl RoomMessage {
    pub fn new(kind: MessageType, timestamp: i64) -> Self {
        Self {
            kind,
            payload: None,
            timestamp,
            sender: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// 에러 메시지 생성
    pub fn error(code: &str, message: &str, timestamp: i64) -> Self {
        Self::new(MessageType::Error, timestamp).with_payload(serde_json::json!({
            "code": code,
            "message": message,
        }))
    }
}

/// 참여자 조회 결과 (online 파생 값 포함)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub connected_at: i64,
    pub last_activity_at: i64,
    pub online: bool,
}

/// 방 통계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub resource_id: String,
    pub total_participants: usize,
    pub online_participants: usize,
    pub created_at: i64,
    pub updated_at: i64,
}
