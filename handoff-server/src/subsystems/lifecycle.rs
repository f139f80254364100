//! Session Lifecycle Manager
//!
//! Owns every status transition and the synthetic system messages that go with
//! them:
//! - request → `waiting` + "Connecting you to a live agent..."
//! - claim → `active` + exactly one "<agent> has joined the conversation"
//! - end → `ended`/`closed` + one end-of-chat notice; re-ending is a no-op
//!
//! Status writes are compare-and-set on the status the caller read, so a
//! terminal session never comes back. Synthetic messages rely on the store's
//! unique `(session_id, marker)` index, so racing callers persist one row.
//! Push notifications are published after the write and never awaited.

use std::sync::Arc;

use uuid::Uuid;

use handoff_core::config::SyncConfig;
use handoff_core::dedup::advance_cursor;
use handoff_core::error::{HandoffError, Result};
use handoff_core::models::category;
use handoff_core::wire::{
    EndResponse, PriorMessage, PullResponse, RequestAgentRequest, RequestAgentResponse,
    SendMessageRequest, SendMessageResponse, WireMessage,
};
use handoff_core::{
    ChatStore, Clock, EndedBy, Message, Role, Session, SessionStatus, SyntheticMarker,
};

use super::message_log::{AppendOutcome, ChatLog, NewMessage};
use super::push::PushChannel;

pub const AGENT_REQUESTED_TEXT: &str = "Connecting you to a live agent...";

const DEFAULT_LIST_LIMIT: u32 = 100;

pub struct SessionManager {
    store: Arc<dyn ChatStore>,
    log: ChatLog,
    push: Arc<dyn PushChannel>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ChatStore>,
        push: Arc<dyn PushChannel>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let log = ChatLog::new(store.clone(), clock.clone(), config.clone());
        Self {
            store,
            log,
            push,
            clock,
            config,
        }
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn push(&self) -> &Arc<dyn PushChannel> {
        &self.push
    }

    pub async fn ping(&self) -> Result<String> {
        self.store.ping().await
    }

    /// `requestLiveAgent`: open a `waiting` session seeded with the bot
    /// conversation so far.
    pub async fn request_live_agent(&self, req: RequestAgentRequest) -> Result<RequestAgentResponse> {
        let email = req
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| HandoffError::validation("customerEmail is required"))?;
        if !email.contains('@') {
            return Err(HandoffError::validation("customerEmail must be an email address"));
        }
        let name = req
            .customer_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());

        let now = self.clock.now_millis();
        let mut session = Session::new_waiting(name, email.to_string(), now);
        if let Some(serde_json::Value::Object(extra)) = req.metadata {
            for (key, value) in extra {
                session.set_metadata(&key, value);
            }
        }
        self.store.create_session(&session).await?;

        for (idx, prior) in req.prior_messages.iter().enumerate() {
            if let Some(new) = import_prior(idx, prior) {
                self.log.append(session.id, new).await?;
            }
        }

        let requested = self
            .log
            .ensure_marker(session.id, SyntheticMarker::AgentRequested, AGENT_REQUESTED_TEXT, now)
            .await?
            .into_message();

        let queue_position = self.store.waiting_ahead(session.created_at).await?.max(1);
        let estimated_wait_time = u64::from(queue_position) * self.config.average_handle_secs;

        let session = self.reload(session.id).await?;
        self.push.session_updated(&session, Some(WireMessage::from(&requested)));

        tracing::info!(
            session_id = %session.id,
            queue_position,
            prior_messages = req.prior_messages.len(),
            "Live agent requested"
        );

        Ok(RequestAgentResponse {
            success: true,
            session_id: session.id,
            status: session.status,
            queue_position,
            estimated_wait_time,
        })
    }

    /// `claimSession`: `waiting → active`, then inject the join message.
    pub async fn claim_session(
        &self,
        session_id: Uuid,
        agent_id: &str,
        agent_name: Option<&str>,
    ) -> Result<Session> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(HandoffError::validation("agentId is required"));
        }

        let mut session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Waiting {
            return Err(HandoffError::invalid_transition(session.status, "claim"));
        }

        session.status = SessionStatus::Active;
        session.agent_id = Some(agent_id.to_string());
        if let Some(name) = agent_name.map(str::trim).filter(|n| !n.is_empty()) {
            session.set_metadata("agentName", serde_json::Value::String(name.to_string()));
        }
        session.touch(self.clock.now_millis());
        if !self
            .store
            .transition_session(&session, SessionStatus::Waiting)
            .await?
        {
            let current = self.get_session(session_id).await?;
            tracing::debug!(session_id = %session_id, status = %current.status, "Claim lost to a concurrent transition");
            return Err(HandoffError::invalid_transition(current.status, "claim"));
        }

        let joined = self.ensure_agent_joined(&session).await?;
        let session = self.reload(session_id).await?;
        self.push.session_updated(&session, joined.as_ref().map(WireMessage::from));

        tracing::info!(session_id = %session_id, agent_id, "Session claimed");
        Ok(session)
    }

    /// `endSession`: idempotent. Only the call that performs the transition
    /// writes the end notice.
    pub async fn end_session(&self, session_id: Uuid, ended_by: EndedBy) -> Result<EndResponse> {
        self.end_from(session_id, ended_by, None).await?;
        Ok(EndResponse::ended())
    }

    /// Move the session to its terminal status. With `only_from`, a session
    /// that has already left that status is left alone. Returns whether this
    /// call performed the transition.
    async fn end_from(
        &self,
        session_id: Uuid,
        ended_by: EndedBy,
        only_from: Option<SessionStatus>,
    ) -> Result<bool> {
        let now = self.clock.now_millis();
        // Statuses only move forward, so a lost compare-and-set retries at
        // most until the session is terminal.
        let from = loop {
            let mut session = self.get_session(session_id).await?;
            if session.status.is_terminal() {
                tracing::debug!(session_id = %session_id, status = %session.status, "End ignored: already terminal");
                return Ok(false);
            }
            if matches!(only_from, Some(expected) if expected != session.status) {
                tracing::debug!(session_id = %session_id, status = %session.status, "End skipped: session moved on");
                return Ok(false);
            }
            let from = session.status;
            session.status = ended_by.terminal_status();
            session.touch(now);
            if self.store.transition_session(&session, from).await? {
                break from;
            }
            tracing::debug!(session_id = %session_id, from = %from, "End raced a concurrent transition; retrying");
        };

        let notice = self
            .log
            .ensure_marker(session_id, SyntheticMarker::SessionEnded, end_notice(ended_by), now)
            .await?;
        if let AppendOutcome::Created(m) = &notice {
            self.push.message_received(session_id, WireMessage::from(m));
        }

        let session = self.reload(session_id).await?;
        self.push
            .session_updated(&session, Some(WireMessage::from(notice.message())));

        tracing::info!(
            session_id = %session_id,
            from = %from,
            to = %session.status,
            ended_by = ended_by.as_str(),
            "Session ended"
        );
        Ok(true)
    }

    /// Send a message on behalf of the customer, the agent, or the system.
    pub async fn send_message(&self, session_id: Uuid, req: SendMessageRequest) -> Result<SendMessageResponse> {
        let content = req
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HandoffError::validation("content is required"))?
            .to_string();
        let role: Role = req.role.as_deref().unwrap_or("user").parse()?;

        let session = self.get_session(session_id).await?;
        match (session.status, role) {
            (s, _) if s.is_terminal() => {
                return Err(HandoffError::invalid_transition(s, "send a message to"));
            }
            (SessionStatus::Waiting, Role::Agent) => {
                return Err(HandoffError::invalid_transition(
                    SessionStatus::Waiting,
                    "send an agent message to",
                ));
            }
            _ => {}
        }

        self.ensure_agent_joined(&session).await?;

        let outcome = self
            .log
            .append(
                session_id,
                NewMessage::new(role, content).client_message_id(req.client_message_id),
            )
            .await?;
        let duplicate = outcome.is_duplicate();
        let message = WireMessage::from(outcome.into_message());
        if !duplicate {
            self.push.message_received(session_id, message.clone());
        }

        let messages: Vec<WireMessage> = self
            .log
            .fetch_since(session_id, req.last_message_timestamp)
            .await?
            .iter()
            .map(WireMessage::from)
            .collect();
        let last_message_timestamp = advance_cursor(req.last_message_timestamp, messages.iter());

        Ok(SendMessageResponse {
            success: true,
            message,
            duplicate,
            messages,
            last_message_timestamp,
            status: session.status,
        })
    }

    /// `fetchSince` plus session status, for polling clients.
    pub async fn pull_messages(&self, session_id: Uuid, cursor: Option<i64>) -> Result<PullResponse> {
        let session = self.get_session(session_id).await?;
        self.ensure_agent_joined(&session).await?;

        let messages: Vec<WireMessage> = self
            .log
            .fetch_since(session_id, cursor)
            .await?
            .iter()
            .map(WireMessage::from)
            .collect();
        let last_message_timestamp = advance_cursor(cursor, messages.iter());

        Ok(PullResponse {
            success: true,
            messages,
            status: session.status,
            agent_name: session.agent_name(),
            last_message_timestamp,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| HandoffError::session_not_found(session_id))
    }

    pub async fn list_sessions(&self, status: Option<&str>, limit: Option<u32>) -> Result<Vec<Session>> {
        let status = status
            .filter(|s| !s.is_empty())
            .map(str::parse::<SessionStatus>)
            .transpose()?;
        self.store
            .list_sessions(status, limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500))
            .await
    }

    /// End every `waiting` session with no activity since `before`. A
    /// session claimed in the meantime is skipped.
    pub async fn expire_waiting(&self, before: i64) -> Result<usize> {
        let stale = self.store.stale_waiting(before).await?;
        let mut ended = 0;
        for session in stale {
            match self
                .end_from(session.id, EndedBy::System, Some(SessionStatus::Waiting))
                .await
            {
                Ok(true) => ended += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(session_id = %session.id, error = %e, "Failed to expire waiting session"),
            }
        }
        Ok(ended)
    }

    /// Guarantee the single "has joined" message for an active session.
    /// Returns the message when this call created it.
    pub async fn ensure_agent_joined(&self, session: &Session) -> Result<Option<Message>> {
        if session.status != SessionStatus::Active {
            return Ok(None);
        }
        if self
            .store
            .find_marker(session.id, SyntheticMarker::AgentJoined)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        // Backdated so it lands inside the next poll window and ahead of the
        // agent's first reply. The store still stamps it after the newest
        // message.
        let floor = self.clock.now_millis() - self.config.join_backdate_ms;
        let name = session.agent_name().unwrap_or_else(|| "An agent".to_string());
        let content = format!("{} has joined the conversation", name);

        match self
            .log
            .ensure_marker(session.id, SyntheticMarker::AgentJoined, &content, floor)
            .await?
        {
            AppendOutcome::Created(m) => {
                self.push.message_received(session.id, WireMessage::from(&m));
                Ok(Some(m))
            }
            AppendOutcome::Duplicate(_) => {
                tracing::debug!(session_id = %session.id, "Join message already created by a concurrent request");
                Ok(None)
            }
        }
    }

    async fn reload(&self, session_id: Uuid) -> Result<Session> {
        self.get_session(session_id).await
    }
}

fn end_notice(ended_by: EndedBy) -> &'static str {
    match ended_by {
        EndedBy::Agent => "The agent has ended the chat.",
        EndedBy::Customer => "The customer has ended the chat.",
        EndedBy::System => "This chat was closed after a period of inactivity.",
    }
}

/// Map one bot-conversation entry onto the log. Unknown roles and blank
/// entries are skipped.
fn import_prior(idx: usize, prior: &PriorMessage) -> Option<NewMessage> {
    if prior.content.trim().is_empty() {
        return None;
    }
    let (role, cat) = match prior.role.to_ascii_lowercase().as_str() {
        "user" | "customer" => (Role::User, category::TEXT),
        "bot" | "assistant" => (Role::System, category::BOT),
        "agent" => (Role::Agent, category::TEXT),
        "system" => (Role::System, category::SYSTEM),
        other => {
            tracing::debug!(role = other, "Skipping prior message with unknown role");
            return None;
        }
    };
    Some(
        NewMessage::new(role, prior.content.clone())
            .category(cat)
            .client_message_id(Some(format!("prior-{}", idx)))
            .at(prior.timestamp),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::push::{RecordingPush, Topic};
    use handoff_core::store::MemoryStore;
    use handoff_core::wire::PushEvent;
    use handoff_core::ManualClock;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        manager: SessionManager,
        clock: Arc<ManualClock>,
        push: Arc<RecordingPush>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let push = Arc::new(RecordingPush::new());
        let manager = SessionManager::new(
            Arc::new(MemoryStore::new()),
            push.clone(),
            clock.clone(),
            SyncConfig::default(),
        );
        Fixture { manager, clock, push }
    }

    fn request(email: &str) -> RequestAgentRequest {
        RequestAgentRequest {
            customer_email: Some(email.to_string()),
            ..Default::default()
        }
    }

    fn send(role: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            content: Some(content.to_string()),
            role: Some(role.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_request_creates_waiting_session() {
        let f = fixture();
        let resp = f.manager.request_live_agent(request("ann@example.com")).await.unwrap();
        assert_eq!(resp.status, SessionStatus::Waiting);
        assert_eq!(resp.queue_position, 1);
        assert_eq!(resp.estimated_wait_time, 120);

        let session = f.manager.get_session(resp.session_id).await.unwrap();
        assert_eq!(session.customer_name, "ann");
        assert!(session.agent_id.is_none());

        let pulled = f.manager.pull_messages(resp.session_id, None).await.unwrap();
        assert_eq!(pulled.messages.len(), 1);
        assert_eq!(pulled.messages[0].content, AGENT_REQUESTED_TEXT);
        assert_eq!(f.push.events_for(Topic::Agents).len(), 1);

        f.clock.advance(1);
        let second = f.manager.request_live_agent(request("bob@example.com")).await.unwrap();
        assert_eq!(second.queue_position, 2);
        assert_eq!(second.estimated_wait_time, 240);
    }

    #[tokio::test]
    async fn test_request_validates_email() {
        let f = fixture();
        let err = f.manager.request_live_agent(request("not-an-email")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = f
            .manager
            .request_live_agent(RequestAgentRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_prior_messages_imported_in_order() {
        let f = fixture();
        let req = RequestAgentRequest {
            customer_email: Some("ann@example.com".into()),
            customer_name: Some("Ann".into()),
            prior_messages: vec![
                PriorMessage { role: "user".into(), content: "where is my order".into(), timestamp: Some(T0 - 3_000) },
                PriorMessage { role: "bot".into(), content: "Let me check".into(), timestamp: Some(T0 - 2_000) },
                PriorMessage { role: "user".into(), content: "where is my order".into(), timestamp: Some(T0 - 1_000) },
                PriorMessage { role: "wizard".into(), content: "skipped".into(), timestamp: None },
            ],
            metadata: Some(serde_json::json!({"page": "/orders"})),
        };
        let resp = f.manager.request_live_agent(req).await.unwrap();
        let pulled = f.manager.pull_messages(resp.session_id, None).await.unwrap();
        let contents: Vec<&str> = pulled.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["where is my order", "Let me check", "where is my order", AGENT_REQUESTED_TEXT]
        );
        assert_eq!(pulled.messages[1].category, category::BOT);
        assert_eq!(pulled.messages[1].role, Role::System);

        let session = f.manager.get_session(resp.session_id).await.unwrap();
        assert_eq!(session.metadata["page"], "/orders");
    }

    #[tokio::test]
    async fn test_claim_injects_single_join_message() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.clock.advance(5_000);
        let session = f.manager.claim_session(sid, "agent-7", Some("Priya")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.agent_id.as_deref(), Some("agent-7"));

        for _ in 0..3 {
            f.manager.pull_messages(sid, None).await.unwrap();
        }
        let pulled = f.manager.pull_messages(sid, None).await.unwrap();
        let joins: Vec<_> = pulled
            .messages
            .iter()
            .filter(|m| m.content == "Priya has joined the conversation")
            .collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].timestamp, T0 + 5_000 - 1_000);
        assert_eq!(pulled.agent_name.as_deref(), Some("Priya"));

        let pushed_joins = f
            .push
            .events_for(Topic::Session(sid))
            .into_iter()
            .filter(|e| matches!(e, PushEvent::MessageReceived { message, .. } if message.content.contains("has joined")))
            .count();
        assert_eq!(pushed_joins, 1);
    }

    #[tokio::test]
    async fn test_claim_twice_is_invalid_transition() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.manager.claim_session(sid, "a1", None).await.unwrap();
        let err = f.manager.claim_session(sid, "a2", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");

        let err = f.manager.claim_session(Uuid::new_v4(), "a1", None).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = f.manager.claim_session(sid, "  ", None).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_join_never_precedes_existing_messages() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.clock.advance(200);
        let hi = f.manager.send_message(sid, send("user", "Hi")).await.unwrap().message;
        f.clock.advance(100);
        f.manager.claim_session(sid, "a1", Some("Sam")).await.unwrap();

        let pulled = f.manager.pull_messages(sid, Some(hi.timestamp - 1)).await.unwrap();
        assert_eq!(pulled.messages.len(), 2);
        assert_eq!(pulled.messages[0].content, "Hi");
        assert_eq!(pulled.messages[1].timestamp, hi.timestamp + 1);
    }

    #[tokio::test]
    async fn test_send_rules_follow_status() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;

        let err = f.manager.send_message(sid, send("agent", "hello")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        f.manager.send_message(sid, send("user", "anyone?")).await.unwrap();

        let err = f.manager.send_message(sid, send("robot", "x")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = f.manager.send_message(sid, send("user", "  ")).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        f.manager.claim_session(sid, "a1", None).await.unwrap();
        f.clock.advance(1_000);
        f.manager.send_message(sid, send("agent", "hello")).await.unwrap();

        f.manager.end_session(sid, EndedBy::Customer).await.unwrap();
        let err = f.manager.send_message(sid, send("user", "wait")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn test_send_echoes_client_id_and_reports_cursor() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.clock.advance(1_000);
        let mut req = send("user", "Hi");
        req.client_message_id = Some("cm-1".into());
        req.last_message_timestamp = Some(T0);

        let first = f.manager.send_message(sid, req.clone()).await.unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.message.client_message_id.as_deref(), Some("cm-1"));
        assert_eq!(first.messages, vec![first.message.clone()]);
        assert_eq!(first.last_message_timestamp, Some(T0 + 1_000));

        f.clock.advance(1_500);
        let retry = f.manager.send_message(sid, req).await.unwrap();
        assert!(retry.duplicate);
        assert_eq!(retry.message.id, first.message.id);
        assert_eq!(retry.last_message_timestamp, Some(T0 + 1_000));
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.manager.claim_session(sid, "a1", None).await.unwrap();

        let first = f.manager.end_session(sid, EndedBy::Agent).await.unwrap();
        assert_eq!(first.status, "ended");
        let session = f.manager.get_session(sid).await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        let updated_at = session.updated_at;

        f.clock.advance(10_000);
        let again = f.manager.end_session(sid, EndedBy::Customer).await.unwrap();
        assert!(again.success);
        let session = f.manager.get_session(sid).await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.updated_at, updated_at);

        let notices = f
            .manager
            .pull_messages(sid, Some(0))
            .await
            .unwrap()
            .messages
            .into_iter()
            .filter(|m| m.content.ends_with("ended the chat."))
            .count();
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn test_customer_end_from_waiting() {
        let f = fixture();
        let sid = f.manager.request_live_agent(request("ann@example.com")).await.unwrap().session_id;
        f.manager.end_session(sid, EndedBy::Customer).await.unwrap();
        let session = f.manager.get_session(sid).await.unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(session.agent_id.is_none());

        // No join message for a session that was never active.
        let pulled = f.manager.pull_messages(sid, Some(0)).await.unwrap();
        assert!(pulled.messages.iter().all(|m| !m.content.contains("has joined")));
        assert_eq!(pulled.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn test_expire_waiting_ends_stale_sessions() {
        let f = fixture();
        let stale = f.manager.request_live_agent(request("old@example.com")).await.unwrap().session_id;
        f.clock.advance(40 * 60 * 1000);
        let fresh = f.manager.request_live_agent(request("new@example.com")).await.unwrap().session_id;

        let ended = f
            .manager
            .expire_waiting(f.clock.now_millis() - 30 * 60 * 1000)
            .await
            .unwrap();
        assert_eq!(ended, 1);
        assert_eq!(f.manager.get_session(stale).await.unwrap().status, SessionStatus::Ended);
        assert_eq!(f.manager.get_session(fresh).await.unwrap().status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_list_sessions_by_status() {
        let f = fixture();
        let a = f.manager.request_live_agent(request("a@example.com")).await.unwrap().session_id;
        f.clock.advance(10);
        f.manager.request_live_agent(request("b@example.com")).await.unwrap();
        f.manager.claim_session(a, "agent", None).await.unwrap();

        let waiting = f.manager.list_sessions(Some("waiting"), None).await.unwrap();
        assert_eq!(waiting.len(), 1);
        let active = f.manager.list_sessions(Some("active"), None).await.unwrap();
        assert_eq!(active[0].id, a);
        assert_eq!(f.manager.list_sessions(None, None).await.unwrap().len(), 2);
        assert!(f.manager.list_sessions(Some("bogus"), None).await.is_err());
    }
}
