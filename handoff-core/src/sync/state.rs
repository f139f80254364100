//! Client-side conversation state: cursor, merged message view, and chat mode.

use uuid::Uuid;

use crate::dedup::{advance_cursor, MergeReport, MessageLog};
use crate::models::SessionStatus;
use crate::wire::{PullResponse, PushEvent, SendMessageResponse, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Talking to the canned-response bot; no live session.
    Bot,
    Waiting,
    Connected,
    Ended,
}

impl ChatMode {
    pub fn is_live(&self) -> bool {
        matches!(self, ChatMode::Waiting | ChatMode::Connected)
    }

    fn from_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Waiting => ChatMode::Waiting,
            SessionStatus::Active => ChatMode::Connected,
            SessionStatus::Ended | SessionStatus::Closed => ChatMode::Ended,
        }
    }
}

/// Result of applying one authoritative response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub merge: MergeReport,
    pub mode_changed: bool,
}

#[derive(Debug, Clone)]
pub struct SyncState {
    session_id: Option<Uuid>,
    mode: ChatMode,
    cursor: Option<i64>,
    log: MessageLog,
    agent_name: Option<String>,
    /// Bumped whenever the session is replaced or ended; responses tagged with
    /// an older generation are stale.
    generation: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            session_id: None,
            mode: ChatMode::Bot,
            cursor: None,
            log: MessageLog::new(),
            agent_name: None,
            generation: 0,
        }
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    pub fn messages(&self) -> Vec<WireMessage> {
        self.log.messages()
    }

    /// `bot → waiting` after a successful live-agent request.
    pub fn begin_session(&mut self, session_id: Uuid, status: SessionStatus) -> u64 {
        self.generation += 1;
        self.session_id = Some(session_id);
        self.mode = ChatMode::from_status(status);
        self.cursor = None;
        self.agent_name = None;
        self.log.clear();
        self.generation
    }

    pub fn apply_pull(&mut self, response: PullResponse) -> ApplyOutcome {
        if response.agent_name.is_some() {
            self.agent_name = response.agent_name.clone();
        }
        self.apply_authoritative(response.messages, response.last_message_timestamp, response.status)
    }

    pub fn apply_send(&mut self, response: SendMessageResponse) -> ApplyOutcome {
        let mut messages = response.messages;
        if !messages.iter().any(|m| m.id == response.message.id) {
            messages.push(response.message);
        }
        self.apply_authoritative(messages, response.last_message_timestamp, response.status)
    }

    /// Render a push hint. Push never advances the cursor: an out-of-order
    /// push must not let the next poll skip an earlier message.
    pub fn apply_push(&mut self, event: &PushEvent) -> MergeReport {
        match event {
            PushEvent::MessageReceived { session_id, message } if Some(*session_id) == self.session_id => {
                self.log.merge_push(std::iter::once(message.clone()))
            }
            _ => MergeReport::default(),
        }
    }

    /// Local end (the user closed the chat, or the session vanished).
    pub fn end(&mut self) {
        self.generation += 1;
        self.mode = ChatMode::Ended;
    }

    /// After an ended chat the widget drops back to the bot.
    pub fn reset_to_bot(&mut self) {
        self.generation += 1;
        self.session_id = None;
        self.mode = ChatMode::Bot;
        self.cursor = None;
        self.agent_name = None;
        self.log.clear();
    }

    fn apply_authoritative(
        &mut self,
        messages: Vec<WireMessage>,
        server_cursor: Option<i64>,
        status: SessionStatus,
    ) -> ApplyOutcome {
        let cursor = advance_cursor(self.cursor, messages.iter());
        self.cursor = match (cursor, server_cursor) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let merge = self.log.merge_authoritative(messages);
        let mode_changed = self.transition(status);
        ApplyOutcome { merge, mode_changed }
    }

    fn transition(&mut self, status: SessionStatus) -> bool {
        let next = match (self.mode, status) {
            (ChatMode::Waiting, SessionStatus::Active) => ChatMode::Connected,
            (ChatMode::Waiting | ChatMode::Connected, s) if s.is_terminal() => ChatMode::Ended,
            (mode, _) => mode,
        };
        let changed = next != self.mode;
        self.mode = next;
        changed
    }
}
