use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::HandoffError;

/// Lifecycle status of a live-agent session. Transitions only move forward:
/// `waiting → active → {ended, closed}` or `waiting → {ended, closed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Closed)
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Active => 1,
            SessionStatus::Ended | SessionStatus::Closed => 2,
        }
    }

    /// True when moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(HandoffError::validation(format!("unknown session status '{}'", other))),
        }
    }
}

/// Who asked for the session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndedBy {
    Customer,
    Agent,
    System,
}

impl EndedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndedBy::Customer => "customer",
            EndedBy::Agent => "agent",
            EndedBy::System => "system",
        }
    }

    /// Agents close a conversation; customers and timeouts end it.
    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            EndedBy::Agent => SessionStatus::Closed,
            EndedBy::Customer | EndedBy::System => SessionStatus::Ended,
        }
    }
}

impl FromStr for EndedBy {
    type Err = HandoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" | "user" => Ok(EndedBy::Customer),
            "agent" => Ok(EndedBy::Agent),
            "system" => Ok(EndedBy::System),
            other => Err(HandoffError::validation(format!("unknown endedBy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub status: SessionStatus,
    pub agent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn new_waiting(customer_name: String, customer_email: String, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_name,
            customer_email,
            status: SessionStatus::Waiting,
            agent_id: None,
            created_at: now,
            updated_at: now,
            metadata: serde_json::json!({}),
        }
    }

    pub fn agent_name(&self) -> Option<String> {
        self.metadata
            .get("agentName")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.agent_id.clone())
    }

    /// Set a metadata key, turning non-object metadata into an object.
    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::json!({});
        }
        if let Some(obj) = self.metadata.as_object_mut() {
            obj.insert(key.to_string(), value);
        }
    }

    /// Advance `updated_at`; never moves it backwards.
    pub fn touch(&mut self, at: i64) {
        self.updated_at = self.updated_at.max(at);
    }
}
