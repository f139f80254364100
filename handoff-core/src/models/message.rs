use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::HandoffError;

/// Rendering hints carried in `Message::category`.
pub mod category {
    pub const TEXT: &str = "text";
    pub const SYSTEM: &str = "system";
    pub const BOT: &str = "bot";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            "system" => Ok(Role::System),
            other => Err(HandoffError::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Sentinel for server-authored messages that must exist at most once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticMarker {
    AgentRequested,
    AgentJoined,
    SessionEnded,
}

impl SyntheticMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyntheticMarker::AgentRequested => "agent_requested",
            SyntheticMarker::AgentJoined => "agent_joined",
            SyntheticMarker::SessionEnded => "session_ended",
        }
    }
}

impl FromStr for SyntheticMarker {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent_requested" => Ok(SyntheticMarker::AgentRequested),
            "agent_joined" => Ok(SyntheticMarker::AgentJoined),
            "session_ended" => Ok(SyntheticMarker::SessionEnded),
            other => Err(HandoffError::Other(format!("unknown marker '{}'", other))),
        }
    }
}

/// A stored chat message. Immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub category: String,
    pub timestamp: i64,
    pub client_message_id: Option<String>,
    pub marker: Option<SyntheticMarker>,
}

impl Message {
    pub fn new(session_id: Uuid, role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            category: category::TEXT.to_string(),
            timestamp,
            client_message_id: None,
            marker: None,
        }
    }

    pub fn synthetic(
        session_id: Uuid,
        marker: SyntheticMarker,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            category: category::SYSTEM.to_string(),
            marker: Some(marker),
            ..Self::new(session_id, Role::System, content, timestamp)
        }
    }

    pub fn with_client_message_id(mut self, client_message_id: Option<String>) -> Self {
        self.client_message_id = client_message_id;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}
