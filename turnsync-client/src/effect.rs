//! Instructions the sans-IO core hands to its driver, and the notifications
//! it raises for subscribers.

use std::time::Duration;

use shared::models::{
    ConversationStatus, SendCommandRequest, SendSelectionRequest, SessionListResponse,
    StreamFilter, TurnId,
};

use crate::{connection::ConnectionState, error::SendFailure, store::LocalId};

/// Identifies one "latest" or "older" fetch. Results whose ticket is not the
/// current one are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub seq: u64,
    pub generation: u64,
}

/// Timers the core relies on. The driver keeps at most one pending timer per
/// id, so scheduling an id again replaces the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    Reconnect,
    FallbackPoll,
    LossGrace,
    PendingDeadline(LocalId),
    FetchDebounce,
    SafetyNet,
    ReconnectFollowUp,
}

impl TimerId {
    /// Timers that belong to the active conversation and die with it.
    #[must_use]
    pub const fn is_conversation_scoped(&self) -> bool {
        matches!(
            self,
            Self::PendingDeadline(_) | Self::FetchDebounce | Self::SafetyNet | Self::ReconnectFollowUp
        )
    }
}

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPayload {
    Command(SendCommandRequest),
    Selection(SendSelectionRequest),
}

impl SendPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Command(SendCommandRequest {
            text: text.into(),
            attachments: Vec::new(),
        })
    }

    #[must_use]
    pub fn selection(question_id: TurnId, selected: Vec<String>) -> Self {
        Self::Selection(SendSelectionRequest {
            question_id,
            selected,
        })
    }

    /// Text of the user turn the server will create for this payload.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Command(request) => request.text.clone(),
            Self::Selection(request) => request.display_text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenChannel {
        seq: u64,
        filter: StreamFilter,
    },
    CloseChannel {
        seq: u64,
    },
    FetchLatest {
        ticket: FetchTicket,
        conversation_id: String,
    },
    FetchOlder {
        ticket: FetchTicket,
        conversation_id: String,
        before: TurnId,
        limit: u32,
    },
    Send {
        local_id: LocalId,
        conversation_id: String,
        payload: SendPayload,
    },
    PollSummary,
    Schedule {
        timer: TimerId,
        after: Duration,
    },
    Cancel {
        timer: TimerId,
    },
}

/// Events for subscribers of the sync handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ConnectionState(ConnectionState),
    /// The push channel has been down longer than the grace period.
    ConnectionLost,
    /// The channel is back after a loss that was announced.
    Reconnected,
    StatusChanged(ConversationStatus),
    SessionsChanged(SessionListResponse),
    SendExpired { local_id: LocalId },
    SendFailed(SendFailure),
}

/// Collects effects and notifications produced during one engine step.
#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
    notifications: Vec<Notification>,
}

impl Outbox {
    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn schedule(&mut self, timer: TimerId, after: Duration) {
        self.effects.push(Effect::Schedule { timer, after });
    }

    pub fn cancel(&mut self, timer: TimerId) {
        self.effects.push(Effect::Cancel { timer });
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}
