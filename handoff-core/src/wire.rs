//! JSON wire types shared by the HTTP API, the push socket, and the sync client.
//!
//! All timestamps leave the server as epoch millis. Incoming timestamps go
//! through `models::timestamp` so older string forms never reach the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{timestamp, Message, Role, Session, SessionStatus};

pub const PROTOCOL: &str = "handoff/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: i64,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

fn default_category() -> String {
    crate::models::category::TEXT.to_string()
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            id: Some(m.id),
            role: m.role,
            content: m.content.clone(),
            timestamp: m.timestamp,
            category: m.category.clone(),
            client_message_id: m.client_message_id.clone(),
        }
    }
}

impl From<Message> for WireMessage {
    fn from(m: Message) -> Self {
        WireMessage::from(&m)
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAgentRequest {
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    #[serde(default)]
    pub prior_messages: Vec<PriorMessage>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A message from the bot conversation that preceded the handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorMessage {
    pub role: String,
    pub content: String,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub role: Option<String>,
    pub client_message_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    pub ended_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAgentResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub queue_position: u32,
    /// Seconds.
    pub estimated_wait_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    /// The canonical stored message (the existing one when the write was a duplicate).
    pub message: WireMessage,
    pub duplicate: bool,
    pub messages: Vec<WireMessage>,
    pub last_message_timestamp: Option<i64>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub success: bool,
    pub messages: Vec<WireMessage>,
    pub status: SessionStatus,
    pub agent_name: Option<String>,
    pub last_message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndResponse {
    pub success: bool,
    pub status: String,
}

impl EndResponse {
    pub fn ended() -> Self {
        Self {
            success: true,
            status: "ended".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    pub success: bool,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

// ============================================================================
// Push channel frames
// ============================================================================

/// Events fanned out over push topics. Hints only; the poll path is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    MessageReceived {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        message: WireMessage,
    },
    SessionUpdated {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        status: SessionStatus,
        #[serde(rename = "lastMessage")]
        last_message: Option<WireMessage>,
        #[serde(rename = "updatedAt")]
        updated_at: i64,
    },
    CustomerTyping {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
}

impl PushEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            PushEvent::MessageReceived { session_id, .. }
            | PushEvent::SessionUpdated { session_id, .. }
            | PushEvent::CustomerTyping { session_id, .. } => *session_id,
        }
    }
}

/// Frames a push client may send over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    LeaveSession {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    JoinAgents,
    CustomerTyping {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    Ping,
}

/// Frames the server writes to a push socket: relayed events plus control replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(PushEvent),
    Control(ControlFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Pong,
    Joined { topic: String },
    Left { topic: String },
    Error { message: String },
}
