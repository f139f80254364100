//! Sync cursor client
//!
//! Keeps a customer widget consistent with the server by polling
//! `fetchSince(cursor)` on a fixed interval, immediately after any
//! state-changing action, and whenever a push hint arrives.
//!
//! Loop rules:
//! - at most one poll in flight; an overlapping cycle is skipped;
//! - every poll carries a timeout;
//! - transient failures back off exponentially (bounded), then fall back to
//!   the normal interval with a fresh budget. The loop never gives up on a
//!   transient error;
//! - `NotFound` is terminal: the chat ends and the loop stops;
//! - results that land after `stop()` or after the session changed are
//!   discarded, never applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::{ChatMode, SyncState};
use super::transport::ChatTransport;
use crate::config::ClientConfig;
use crate::dedup::MergeReport;
use crate::error::{HandoffError, Result};
use crate::models::{category, EndedBy, Role};
use crate::wire::{PriorMessage, PushEvent, RequestAgentRequest, RequestAgentResponse, SendMessageRequest, WireMessage};

/// Notifications for whatever renders the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    /// The merged view changed; carries the full ordered list.
    Messages(Vec<WireMessage>),
    Mode(ChatMode),
    /// Retries exhausted; the loop keeps going at the normal interval.
    Degraded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Applied(MergeReport),
    /// A previous poll was still in flight.
    Skipped,
    /// The response arrived after cancellation or a session change.
    Discarded,
    /// No live session to poll.
    Idle,
}

/// Handle to a running poll loop. Dropping it cancels the loop.
pub struct PollHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Wait for the loop to exit on its own (chat ended).
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Clears the in-flight flag even if the poll future is dropped mid-await.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SyncClient {
    transport: Arc<dyn ChatTransport>,
    config: ClientConfig,
    state: Arc<Mutex<SyncState>>,
    poke: Arc<Notify>,
    in_flight: Arc<AtomicBool>,
    updates: broadcast::Sender<SyncUpdate>,
    /// Cancelled when this client is torn down; loops get child tokens.
    root: CancellationToken,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn ChatTransport>, config: ClientConfig) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(SyncState::new())),
            poke: Arc::new(Notify::new()),
            in_flight: Arc::new(AtomicBool::new(false)),
            updates,
            root: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncUpdate> {
        self.updates.subscribe()
    }

    pub async fn mode(&self) -> ChatMode {
        self.state.lock().await.mode()
    }

    pub async fn cursor(&self) -> Option<i64> {
        self.state.lock().await.cursor()
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        self.state.lock().await.session_id()
    }

    pub async fn messages(&self) -> Vec<WireMessage> {
        self.state.lock().await.messages()
    }

    pub async fn agent_name(&self) -> Option<String> {
        self.state.lock().await.agent_name().map(str::to_string)
    }

    /// Ask the loop to poll now instead of waiting for the next tick.
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    /// Attach to an existing session (e.g. after a page reload).
    pub async fn attach(&self, session_id: Uuid) {
        let mut state = self.state.lock().await;
        state.begin_session(session_id, crate::models::SessionStatus::Waiting);
        drop(state);
        self.emit(SyncUpdate::Mode(ChatMode::Waiting));
        self.poke();
    }

    /// `bot → waiting`: open a live-agent session and start tracking it.
    pub async fn request_live_agent(
        &self,
        customer_email: &str,
        customer_name: Option<&str>,
        prior_messages: Vec<PriorMessage>,
    ) -> Result<RequestAgentResponse> {
        let request = RequestAgentRequest {
            customer_email: Some(customer_email.to_string()),
            customer_name: customer_name.map(str::to_string),
            prior_messages,
            metadata: None,
        };
        let response = self
            .with_retry(|| self.transport.request_live_agent(&request))
            .await?;

        let mode = {
            let mut state = self.state.lock().await;
            state.begin_session(response.session_id, response.status);
            state.mode()
        };
        tracing::info!(
            session_id = %response.session_id,
            queue_position = response.queue_position,
            "Live agent requested"
        );
        self.emit(SyncUpdate::Mode(mode));
        self.poke();
        Ok(response)
    }

    /// Send a customer message. Shows an optimistic echo immediately; the
    /// echo is replaced by the server copy, or removed if the send fails.
    /// Retries reuse the same `clientMessageId`, so the server stores it once.
    pub async fn send(&self, content: &str) -> Result<WireMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(HandoffError::validation("message content is empty"));
        }

        let client_message_id = Uuid::new_v4().to_string();
        let (session_id, cursor) = {
            let mut state = self.state.lock().await;
            let session_id = match state.session_id() {
                Some(id) if state.mode().is_live() => id,
                _ => return Err(HandoffError::validation("no live session to send to")),
            };
            state.log_mut().push_optimistic(WireMessage {
                id: None,
                role: Role::User,
                content: content.to_string(),
                timestamp: crate::models::timestamp::now_millis(),
                category: category::TEXT.to_string(),
                client_message_id: Some(client_message_id.clone()),
            });
            (session_id, state.cursor())
        };
        self.emit_messages().await;

        let request = SendMessageRequest {
            content: Some(content.to_string()),
            role: Some(Role::User.as_str().to_string()),
            client_message_id: Some(client_message_id.clone()),
            last_message_timestamp: cursor,
        };

        match self
            .with_retry(|| self.transport.send_message(session_id, &request))
            .await
        {
            Ok(response) => {
                let message = response.message.clone();
                let mode_changed = {
                    let mut state = self.state.lock().await;
                    if state.session_id() != Some(session_id) {
                        return Ok(message);
                    }
                    state.apply_send(response).mode_changed
                };
                self.emit_messages().await;
                if mode_changed {
                    self.emit(SyncUpdate::Mode(self.mode().await));
                }
                self.poke();
                Ok(message)
            }
            Err(e) => {
                self.state
                    .lock()
                    .await
                    .log_mut()
                    .discard_optimistic(&client_message_id);
                self.emit_messages().await;
                Err(e)
            }
        }
    }

    /// End the live chat. Idempotent on the server; locally the loop stops.
    pub async fn end(&self, ended_by: EndedBy) -> Result<()> {
        let session_id = match self.session_id().await {
            Some(id) => id,
            None => return Ok(()),
        };
        let result = self
            .with_retry(|| self.transport.end_session(session_id, ended_by))
            .await;

        self.state.lock().await.end();
        self.emit(SyncUpdate::Mode(ChatMode::Ended));
        self.poke();
        result.map(|_| ())
    }

    /// Drop back to the bot after an ended chat.
    pub async fn reset_to_bot(&self) {
        self.state.lock().await.reset_to_bot();
        self.emit(SyncUpdate::Mode(ChatMode::Bot));
    }

    /// Render a push event and poll sooner.
    pub async fn handle_push(&self, event: PushEvent) {
        let report = self.state.lock().await.apply_push(&event);
        if report.added > 0 {
            self.emit_messages().await;
        }
        self.poke();
    }

    /// One guarded poll. Public so callers (and tests) can drive it directly.
    pub async fn poll_once(&self) -> Result<PollResult> {
        self.poll_guarded(&self.root).await
    }

    /// Spawn the poll loop. The first poll runs immediately.
    pub fn start(&self) -> PollHandle {
        let token = self.root.child_token();
        let client = self.clone();
        let loop_token = token.clone();
        let task = tokio::spawn(async move { client.run(loop_token).await });
        PollHandle {
            token,
            task: Some(task),
        }
    }

    /// Forward push events from `events` until `cancel` fires. Dropping the
    /// receiver side (or cancelling) is the unsubscribe.
    pub fn attach_push(&self, mut events: mpsc::Receiver<PushEvent>, cancel: CancellationToken) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => client.handle_push(event).await,
                        None => break,
                    },
                }
            }
        })
    }

    /// Tear the client down: cancels every loop started from it.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    async fn run(self, token: CancellationToken) {
        let interval = self.config.poll_interval();
        let mut backoff = self.backoff();
        let mut delay = Duration::ZERO;

        tracing::debug!(interval_secs = interval.as_secs(), "Sync poll loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.poke.notified() => {}
            }

            match self.poll_guarded(&token).await {
                Ok(PollResult::Applied(_)) | Ok(PollResult::Skipped) => {
                    backoff = self.backoff();
                    delay = interval;
                }
                Ok(PollResult::Discarded) | Ok(PollResult::Idle) => {
                    delay = interval;
                }
                Err(HandoffError::NotFound(msg)) => {
                    tracing::warn!(error = %msg, "Session no longer exists; ending chat");
                    self.state.lock().await.end();
                    self.emit(SyncUpdate::Mode(ChatMode::Ended));
                    break;
                }
                Err(e) if e.is_retryable() => match backoff.next() {
                    Some(d) => {
                        tracing::debug!(error = %e, retry_in_ms = d.as_millis() as u64, "Poll failed, backing off");
                        delay = d;
                    }
                    None => {
                        tracing::warn!(error = %e, "Poll retries exhausted, resuming normal interval");
                        self.emit(SyncUpdate::Degraded(e.to_string()));
                        backoff = self.backoff();
                        delay = interval;
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Poll returned an unusable response, skipping cycle");
                    delay = interval;
                }
            }

            if self.mode().await == ChatMode::Ended {
                break;
            }
        }

        tracing::debug!("Sync poll loop stopped");
    }

    async fn poll_guarded(&self, token: &CancellationToken) -> Result<PollResult> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Previous poll still in flight, skipping cycle");
            return Ok(PollResult::Skipped);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let (session_id, cursor, generation) = {
            let state = self.state.lock().await;
            match state.session_id() {
                Some(id) if state.mode().is_live() => (id, state.cursor(), state.generation()),
                _ => return Ok(PollResult::Idle),
            }
        };

        let response = tokio::time::timeout(
            self.config.request_timeout(),
            self.transport.pull_messages(session_id, cursor),
        )
        .await
        .map_err(|_| HandoffError::Transport("poll timed out".to_string()))??;

        if token.is_cancelled() {
            return Ok(PollResult::Discarded);
        }

        let (outcome, mode) = {
            let mut state = self.state.lock().await;
            if state.generation() != generation || state.session_id() != Some(session_id) {
                return Ok(PollResult::Discarded);
            }
            (state.apply_pull(response), state.mode())
        };

        if outcome.merge.added > 0 || outcome.merge.replaced > 0 {
            self.emit_messages().await;
        }
        if outcome.mode_changed {
            tracing::info!(session_id = %session_id, mode = ?mode, "Chat mode changed");
            self.emit(SyncUpdate::Mode(mode));
        }
        Ok(PollResult::Applied(outcome.merge))
    }

    fn backoff(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let factor = (self.config.backoff_base_ms / 2).max(1);
        Box::new(
            ExponentialBackoff::from_millis(2)
                .factor(factor)
                .max_delay(Duration::from_secs(self.config.backoff_max_secs))
                .map(jitter)
                .take(self.config.max_retries),
        )
    }

    async fn with_retry<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        RetryIf::spawn(self.backoff(), action, |e: &HandoffError| e.is_retryable()).await
    }

    async fn emit_messages(&self) {
        let messages = self.messages().await;
        self.emit(SyncUpdate::Messages(messages));
    }

    fn emit(&self, update: SyncUpdate) {
        // No listeners is fine.
        let _ = self.updates.send(update);
    }
}
