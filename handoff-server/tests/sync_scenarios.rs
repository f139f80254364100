//! End-to-end synchronization scenarios against the lifecycle manager,
//! using the in-memory store and a manual clock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Barrier, Notify};

use handoff_core::config::SyncConfig;
use handoff_core::dedup::MessageLog;
use handoff_core::error::Result;
use handoff_core::store::{InsertResult, MemoryStore};
use handoff_core::wire::{PushEvent, RequestAgentRequest, SendMessageRequest, WireMessage};
use handoff_core::{
    ChatStore, Clock, EndedBy, ManualClock, Message, Role, Session, SessionStatus, SyntheticMarker,
};
use handoff_server::subsystems::lifecycle::SessionManager;
use handoff_server::subsystems::push::{RecordingPush, Topic};
use uuid::Uuid;

const T0: i64 = 1_700_000_000_000;

struct World {
    manager: Arc<SessionManager>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    push: Arc<RecordingPush>,
}

fn world() -> World {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let push = Arc::new(RecordingPush::new());
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        push.clone(),
        clock.clone(),
        SyncConfig::default(),
    ));
    World {
        manager,
        store,
        clock,
        push,
    }
}

/// Delegates to a [`MemoryStore`] but can hold chosen reads open so that two
/// callers interleave at a known point.
struct GatedStore {
    inner: MemoryStore,
    /// The next `n` session reads each return only once all `n` have read.
    session_reads: Mutex<Option<(Arc<Barrier>, usize)>>,
    /// Duplicate-window lookups for this content signal `reached`, then wait
    /// for `release`.
    held_content: Mutex<Option<String>>,
    reached: Notify,
    release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            session_reads: Mutex::new(None),
            held_content: Mutex::new(None),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }

    fn gate_session_reads(&self, n: usize) {
        *self.session_reads.lock().unwrap() = Some((Arc::new(Barrier::new(n)), n));
    }

    fn hold_content(&self, content: &str) {
        *self.held_content.lock().unwrap() = Some(content.to_string());
    }
}

#[async_trait]
impl ChatStore for GatedStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let barrier = {
            let mut gate = self.session_reads.lock().unwrap();
            match gate.as_mut() {
                Some((barrier, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(barrier.clone())
                }
                _ => None,
            }
        };
        let session = self.inner.get_session(id).await;
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        session
    }

    async fn list_sessions(&self, status: Option<SessionStatus>, limit: u32) -> Result<Vec<Session>> {
        self.inner.list_sessions(status, limit).await
    }

    async fn transition_session(&self, session: &Session, from: SessionStatus) -> Result<bool> {
        self.inner.transition_session(session, from).await
    }

    async fn touch_session(&self, id: Uuid, at: i64) -> Result<()> {
        self.inner.touch_session(id, at).await
    }

    async fn waiting_ahead(&self, created_at: i64) -> Result<u32> {
        self.inner.waiting_ahead(created_at).await
    }

    async fn stale_waiting(&self, before: i64) -> Result<Vec<Session>> {
        self.inner.stale_waiting(before).await
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        self.inner.insert_message(message).await
    }

    async fn find_by_client_message_id(
        &self,
        session_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<Message>> {
        self.inner.find_by_client_message_id(session_id, client_message_id).await
    }

    async fn find_recent_identical(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        since: i64,
    ) -> Result<Option<Message>> {
        let held = self.held_content.lock().unwrap().as_deref() == Some(content);
        if held {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.find_recent_identical(session_id, role, content, since).await
    }

    async fn find_marker(&self, session_id: Uuid, marker: SyntheticMarker) -> Result<Option<Message>> {
        self.inner.find_marker(session_id, marker).await
    }

    async fn messages_after(&self, session_id: Uuid, after: i64) -> Result<Vec<Message>> {
        self.inner.messages_after(session_id, after).await
    }

    async fn recent_messages(&self, session_id: Uuid, since: i64, limit: u32) -> Result<Vec<Message>> {
        self.inner.recent_messages(session_id, since, limit).await
    }

    async fn ping(&self) -> Result<String> {
        self.inner.ping().await
    }
}

struct GatedWorld {
    manager: Arc<SessionManager>,
    store: Arc<GatedStore>,
    clock: Arc<ManualClock>,
    push: Arc<RecordingPush>,
}

fn gated_world() -> GatedWorld {
    let store = Arc::new(GatedStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let push = Arc::new(RecordingPush::new());
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        push.clone(),
        clock.clone(),
        SyncConfig::default(),
    ));
    GatedWorld {
        manager,
        store,
        clock,
        push,
    }
}

async fn open_gated_session(w: &GatedWorld) -> Uuid {
    request_agent(&w.manager).await
}

fn agent_statuses(push: &RecordingPush) -> Vec<SessionStatus> {
    push.events_for(Topic::Agents)
        .into_iter()
        .filter_map(|e| match e {
            PushEvent::SessionUpdated { status, .. } => Some(status),
            _ => None,
        })
        .collect()
}

fn assert_forward_only(statuses: &[SessionStatus]) {
    assert!(
        statuses
            .windows(2)
            .all(|pair| pair[0] == pair[1] || pair[0].can_transition_to(pair[1])),
        "status went backwards: {:?}",
        statuses
    );
}

async fn open_session(w: &World) -> Uuid {
    request_agent(&w.manager).await
}

async fn request_agent(manager: &SessionManager) -> Uuid {
    manager
        .request_live_agent(RequestAgentRequest {
            customer_email: Some("ann@example.com".into()),
            customer_name: Some("Ann".into()),
            ..Default::default()
        })
        .await
        .unwrap()
        .session_id
}

fn user(content: &str, client_id: Option<&str>) -> SendMessageRequest {
    SendMessageRequest {
        content: Some(content.to_string()),
        role: Some("user".into()),
        client_message_id: client_id.map(str::to_string),
        last_message_timestamp: None,
    }
}

fn contents(messages: &[WireMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn hi_then_claim_then_poll_returns_hi_and_join_in_order() {
    let w = world();
    let sid = open_session(&w).await;
    // The widget's first poll after requesting an agent sets its cursor.
    let cursor = w.manager.pull_messages(sid, None).await.unwrap().last_message_timestamp;

    w.clock.advance(2_000); // t0
    w.manager.send_message(sid, user("Hi", None)).await.unwrap();
    w.clock.advance(5_000); // t1
    w.manager.claim_session(sid, "agent-1", Some("Priya")).await.unwrap();
    w.clock.advance(1_000); // t1 + 1s

    let poll = w.manager.pull_messages(sid, cursor).await.unwrap();
    assert_eq!(
        contents(&poll.messages),
        vec!["Hi", "Priya has joined the conversation"]
    );
    assert_eq!(poll.status, SessionStatus::Active);
}

#[tokio::test]
async fn poll_from_claim_cursor_returns_only_the_reply() {
    let w = world();
    let sid = open_session(&w).await;
    w.clock.advance(2_000);
    w.manager.send_message(sid, user("Hi", None)).await.unwrap();
    w.clock.advance(5_000);
    let t1 = w.clock.now_millis();
    w.manager.claim_session(sid, "agent-1", None).await.unwrap();

    w.clock.advance(3_000);
    let hello = SendMessageRequest {
        content: Some("Hello".into()),
        role: Some("agent".into()),
        ..Default::default()
    };
    w.manager.send_message(sid, hello).await.unwrap();

    let poll = w.manager.pull_messages(sid, Some(t1)).await.unwrap();
    assert_eq!(contents(&poll.messages), vec!["Hello"]);
}

#[tokio::test]
async fn duplicate_post_within_two_seconds_stores_one_row() {
    let w = world();
    let sid = open_session(&w).await;
    let before = w.store.message_count(sid).await;

    w.clock.advance(500);
    let first = w.manager.send_message(sid, user("Is this in stock?", None)).await.unwrap();
    w.clock.advance(2_000);
    let second = w.manager.send_message(sid, user("Is this in stock?", None)).await.unwrap();

    assert_eq!(first.message.id, second.message.id);
    assert!(second.duplicate);
    assert_eq!(w.store.message_count(sid).await, before + 1);

    // Only the first send is announced.
    let announced = w
        .push
        .events_for(Topic::Session(sid))
        .into_iter()
        .filter(|e| matches!(e, PushEvent::MessageReceived { message, .. } if message.content == "Is this in stock?"))
        .count();
    assert_eq!(announced, 1);
}

#[tokio::test]
async fn retried_send_with_client_id_stores_one_row_even_outside_window() {
    let w = world();
    let sid = open_session(&w).await;
    let before = w.store.message_count(sid).await;

    let first = w.manager.send_message(sid, user("ok", Some("c-42"))).await.unwrap();
    w.clock.advance(60_000);
    let retry = w.manager.send_message(sid, user("ok", Some("c-42"))).await.unwrap();
    assert_eq!(first.message.id, retry.message.id);
    assert_eq!(w.store.message_count(sid).await, before + 1);

    // A different id with the same text is a new message.
    let other = w.manager.send_message(sid, user("ok", Some("c-43"))).await.unwrap();
    assert_ne!(other.message.id, first.message.id);
}

#[tokio::test]
async fn fifty_concurrent_pollers_create_one_join_message() {
    let w = world();
    let sid = open_session(&w).await;
    w.manager.claim_session(sid, "agent-1", Some("Priya")).await.unwrap();

    // Made active directly, so the pollers are the only writers of its join message.
    let sid2 = open_session(&w).await;
    let mut session = w.manager.get_session(sid2).await.unwrap();
    session.status = SessionStatus::Active;
    session.agent_id = Some("agent-2".into());
    assert!(w.store.transition_session(&session, SessionStatus::Waiting).await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let manager = w.manager.clone();
        handles.push(tokio::spawn(async move {
            manager.pull_messages(sid2, None).await.unwrap()
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    for id in [sid, sid2] {
        let all = w.manager.pull_messages(id, Some(0)).await.unwrap().messages;
        let joins = all.iter().filter(|m| m.content.ends_with("has joined the conversation")).count();
        assert_eq!(joins, 1, "session {} should have exactly one join message", id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_pollers_on_threads_create_one_join_message() {
    let w = world();
    let sid = open_session(&w).await;
    let mut session = w.manager.get_session(sid).await.unwrap();
    session.status = SessionStatus::Active;
    session.agent_id = Some("agent-9".into());
    assert!(w.store.transition_session(&session, SessionStatus::Waiting).await.unwrap());

    let pollers: Vec<_> = (0..50)
        .map(|_| {
            let manager = w.manager.clone();
            tokio::spawn(async move { manager.pull_messages(sid, None).await })
        })
        .collect();
    for p in pollers {
        assert!(p.await.unwrap().is_ok());
    }

    let all = w.manager.pull_messages(sid, Some(0)).await.unwrap().messages;
    assert_eq!(
        all.iter().filter(|m| m.content == "agent-9 has joined the conversation").count(),
        1
    );
}

#[tokio::test]
async fn cursor_is_monotonic_across_pulls_and_sends() {
    let w = world();
    let sid = open_session(&w).await;
    let mut cursor: Option<i64> = None;
    let mut seen = Vec::new();

    for i in 0..6 {
        w.clock.advance(700);
        let mut req = user(&format!("message {}", i), Some(&format!("m-{}", i)));
        req.last_message_timestamp = cursor;
        let sent = w.manager.send_message(sid, req).await.unwrap();
        seen.push(sent.last_message_timestamp);
        cursor = sent.last_message_timestamp.or(cursor);

        let pulled = w.manager.pull_messages(sid, cursor).await.unwrap();
        assert!(pulled.messages.is_empty());
        seen.push(pulled.last_message_timestamp);
        cursor = pulled.last_message_timestamp.or(cursor);
    }

    let values: Vec<i64> = seen.into_iter().flatten().collect();
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "cursor went backwards: {:?}", values);
}

#[tokio::test]
async fn status_sequence_is_forward_only_and_end_is_idempotent() {
    let w = world();
    let sid = open_session(&w).await;
    w.manager.claim_session(sid, "agent-1", None).await.unwrap();
    w.manager.end_session(sid, EndedBy::Customer).await.unwrap();
    w.manager.end_session(sid, EndedBy::Customer).await.unwrap();
    w.manager.end_session(sid, EndedBy::Agent).await.unwrap();
    assert!(w.manager.claim_session(sid, "agent-2", None).await.is_err());

    let statuses: Vec<SessionStatus> = w
        .push
        .events_for(Topic::Agents)
        .into_iter()
        .filter_map(|e| match e {
            PushEvent::SessionUpdated { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![SessionStatus::Waiting, SessionStatus::Active, SessionStatus::Ended]
    );
    assert_eq!(w.manager.get_session(sid).await.unwrap().status, SessionStatus::Ended);
}

#[tokio::test]
async fn merged_view_is_identical_for_push_poll_or_both() {
    let w = world();
    let sid = open_session(&w).await;
    w.clock.advance(1_000);
    w.manager.send_message(sid, user("Hi", Some("u1"))).await.unwrap();
    w.clock.advance(1_000);
    w.manager.claim_session(sid, "agent-1", Some("Priya")).await.unwrap();
    w.clock.advance(1_000);
    let reply = SendMessageRequest {
        content: Some("Hello, how can I help?".into()),
        role: Some("agent".into()),
        client_message_id: Some("a1".into()),
        ..Default::default()
    };
    w.manager.send_message(sid, reply).await.unwrap();
    w.clock.advance(1_000);
    w.manager.send_message(sid, user("My order is late", Some("u2"))).await.unwrap();

    let authoritative = w.manager.pull_messages(sid, Some(0)).await.unwrap().messages;
    let pushed: Vec<WireMessage> = w
        .push
        .events_for(Topic::Session(sid))
        .into_iter()
        .filter_map(|e| match e {
            PushEvent::MessageReceived { message, .. } => Some(message),
            _ => None,
        })
        .collect();

    let mut poll_only = MessageLog::new();
    poll_only.merge_authoritative(authoritative.clone());

    let mut push_then_poll = MessageLog::new();
    push_then_poll.merge_push(pushed.iter().rev().cloned());
    push_then_poll.merge_authoritative(authoritative.clone());

    let mut poll_then_push = MessageLog::new();
    poll_then_push.merge_authoritative(authoritative.clone());
    poll_then_push.merge_push(pushed.clone());

    assert_eq!(poll_only.messages(), authoritative);
    assert_eq!(push_then_poll.messages(), authoritative);
    assert_eq!(poll_then_push.messages(), authoritative);
    assert!(authoritative.iter().any(|m| m.role == Role::System));
}

#[tokio::test]
async fn claim_racing_end_never_reopens_the_session() {
    let w = gated_world();
    let sid = open_gated_session(&w).await;

    // Both callers read `waiting` before either writes.
    w.store.gate_session_reads(2);
    let (claimed, ended) = tokio::join!(
        w.manager.claim_session(sid, "agent-1", Some("Priya")),
        w.manager.end_session(sid, EndedBy::Customer),
    );

    assert!(ended.unwrap().success);
    if let Err(e) = &claimed {
        assert_eq!(e.kind(), "invalid_transition");
    }
    assert!(w.manager.get_session(sid).await.unwrap().status.is_terminal());

    let statuses = agent_statuses(&w.push);
    assert_forward_only(&statuses);
    assert!(statuses.last().unwrap().is_terminal());
}

#[tokio::test]
async fn claim_racing_expiry_leaves_one_consistent_outcome() {
    let w = gated_world();
    let sid = open_gated_session(&w).await;
    w.clock.advance(31 * 60 * 1000);
    let before = w.clock.now_millis() - 30 * 60 * 1000;

    w.store.gate_session_reads(2);
    let (claimed, expired) = tokio::join!(
        w.manager.claim_session(sid, "agent-1", None),
        w.manager.expire_waiting(before),
    );

    let session = w.manager.get_session(sid).await.unwrap();
    match claimed {
        Ok(_) => {
            assert_eq!(expired.unwrap(), 0);
            assert_eq!(session.status, SessionStatus::Active);
        }
        Err(e) => {
            assert_eq!(e.kind(), "invalid_transition");
            assert_eq!(expired.unwrap(), 1);
            assert_eq!(session.status, SessionStatus::Ended);
        }
    }
    assert_forward_only(&agent_statuses(&w.push));
}

#[tokio::test]
async fn cursor_poller_sees_message_whose_append_was_delayed() {
    let w = gated_world();
    let sid = open_gated_session(&w).await;
    w.manager.claim_session(sid, "agent-1", None).await.unwrap();
    let mut cursor = w.manager.pull_messages(sid, None).await.unwrap().last_message_timestamp;

    // The customer's "Hi" stalls in its duplicate check after reading the clock.
    w.store.hold_content("Hi");
    let manager = w.manager.clone();
    let hi = tokio::spawn(async move { manager.send_message(sid, user("Hi", None)).await });
    w.store.reached.notified().await;

    w.clock.advance(10);
    let hello = SendMessageRequest {
        content: Some("Hello".into()),
        role: Some("agent".into()),
        ..Default::default()
    };
    w.manager.send_message(sid, hello).await.unwrap();
    let poll = w.manager.pull_messages(sid, cursor).await.unwrap();
    assert_eq!(contents(&poll.messages), vec!["Hello"]);
    cursor = poll.last_message_timestamp;

    w.store.release.notify_one();
    hi.await.unwrap().unwrap();

    let poll = w.manager.pull_messages(sid, cursor).await.unwrap();
    assert_eq!(contents(&poll.messages), vec!["Hi"]);
}
