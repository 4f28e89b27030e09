//! # Push Stream Connection Manager
//!
//! Owns the lifecycle of the push channel: a four-state machine with an
//! explicit transition table, exponential reconnect backoff, a fallback
//! summary poll while the channel is down, and the loss / recovery notices.
//! It survives conversation switches; a new filter reconfigures it.

mod backoff;

use std::{fmt, time::Duration};

use serde::Serialize;
use shared::{
    config::SyncSettings,
    models::{ConversationStatus, PushEvent, StreamFilter, Turn, TurnUpdateKind},
};
use tracing::{debug, info, warn};

pub use backoff::Backoff;

use crate::effect::{Effect, Notification, Outbox, TimerId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Inputs of the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    Connect,
    Opened,
    Failed,
    RetryDue,
    Exhausted,
    Disconnect,
}

/// The transition table. `None` means the input is ignored in that state.
#[must_use]
pub const fn transition(state: ConnectionState, input: ConnectionInput) -> Option<ConnectionState> {
    use ConnectionInput as I;
    use ConnectionState as S;

    match (state, input) {
        (S::Disconnected | S::Connecting | S::Connected, I::Connect)
        | (S::Reconnecting, I::RetryDue) => Some(S::Connecting),
        (S::Reconnecting, I::Connect) | (S::Connecting | S::Connected, I::Failed) => {
            Some(S::Reconnecting)
        }
        (S::Connecting, I::Opened) => Some(S::Connected),
        (S::Reconnecting, I::Exhausted) | (_, I::Disconnect) => Some(S::Disconnected),
        _ => None,
    }
}

/// Where a push event goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Turn(Turn),
    TurnUpdate(Turn, TurnUpdateKind),
    Status(ConversationStatus),
    /// The server dropped events for us: refresh everything.
    Resync,
    /// Coarse "something changed" signal; `fetch` when it concerns the active
    /// conversation.
    Refresh { fetch: bool },
    Ignore,
}

/// Decides what an event means for the active conversation.
#[must_use]
pub fn classify(event: PushEvent, active: Option<&str>) -> Route {
    let concerns_active =
        |conversation_id: &str| active.is_some_and(|active| active == conversation_id);

    match event {
        PushEvent::TurnCreated { payload } if concerns_active(&payload.conversation_id) => {
            Route::Turn(payload.turn)
        }
        PushEvent::TurnUpdated { payload } if concerns_active(&payload.conversation_id) => {
            Route::TurnUpdate(payload.turn, payload.update)
        }
        PushEvent::StateChanged { payload } if concerns_active(&payload.conversation_id) => {
            Route::Status(ConversationStatus {
                agent_state: payload.agent_state,
                ended: payload.ended,
            })
        }
        PushEvent::Gap { .. } => Route::Resync,
        PushEvent::CardRefresh { payload }
        | PushEvent::SessionCreated { payload }
        | PushEvent::SessionEnded { payload } => Route::Refresh {
            fetch: concerns_active(&payload.conversation_id),
        },
        PushEvent::TurnCreated { .. }
        | PushEvent::TurnUpdated { .. }
        | PushEvent::StateChanged { .. } => Route::Ignore,
    }
}

/// What an accepted `Opened` means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedOutcome {
    /// The channel came back after a failure; catch up on what was missed.
    pub recovered: bool,
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    filter: Option<StreamFilter>,
    channel_seq: u64,
    open_channel: Option<u64>,
    attempt: u32,
    max_attempts: Option<u32>,
    backoff: Backoff,
    fallback_poll_interval: Duration,
    loss_grace: Duration,
    polling: bool,
    recovering: bool,
    loss_pending: bool,
    loss_reported: bool,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            filter: None,
            channel_seq: 0,
            open_channel: None,
            attempt: 0,
            max_attempts: settings.max_reconnect_attempts,
            backoff: Backoff::from_settings(settings),
            fallback_poll_interval: settings.fallback_poll_interval(),
            loss_grace: settings.loss_grace(),
            polling: false,
            recovering: false,
            loss_pending: false,
            loss_reported: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn filter(&self) -> Option<&StreamFilter> {
        self.filter.as_ref()
    }

    /// Whether events tagged with channel `seq` come from the live channel.
    #[must_use]
    pub fn accepts(&self, seq: u64) -> bool {
        self.open_channel == Some(seq)
    }

    /// Opens a channel for `filter`, or reconfigures the current one.
    pub fn connect(&mut self, filter: StreamFilter, outbox: &mut Outbox) {
        self.filter = Some(filter);
        match self.state {
            ConnectionState::Disconnected => {
                self.attempt = 0;
                self.open(outbox);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.close(outbox);
                self.open(outbox);
            }
            ConnectionState::Reconnecting => {
                debug!("filter updated while reconnecting; next attempt uses it");
            }
        }
    }

    /// Closes the channel and stops every connection timer.
    pub fn disconnect(&mut self, outbox: &mut Outbox) {
        self.close(outbox);
        for timer in [TimerId::Reconnect, TimerId::FallbackPoll, TimerId::LossGrace] {
            outbox.cancel(timer);
        }
        self.attempt = 0;
        self.polling = false;
        self.recovering = false;
        self.loss_pending = false;
        self.loss_reported = false;
        self.apply(ConnectionInput::Disconnect, outbox);
    }

    /// The channel with sequence number `seq` is open.
    pub fn opened(&mut self, seq: u64, outbox: &mut Outbox) -> Option<OpenedOutcome> {
        if !self.accepts(seq) || self.state != ConnectionState::Connecting {
            debug!(seq, "ignoring open of superseded channel");
            return None;
        }
        self.apply(ConnectionInput::Opened, outbox);
        self.attempt = 0;
        if std::mem::take(&mut self.polling) {
            outbox.cancel(TimerId::FallbackPoll);
        }
        if std::mem::take(&mut self.loss_pending) {
            outbox.cancel(TimerId::LossGrace);
        }
        if std::mem::take(&mut self.loss_reported) {
            outbox.notify(Notification::Reconnected);
        }
        let recovered = std::mem::take(&mut self.recovering);
        info!(seq, recovered, "push channel connected");
        Some(OpenedOutcome { recovered })
    }

    /// The channel with sequence number `seq` errored or closed.
    pub fn failed(&mut self, seq: u64, reason: &str, outbox: &mut Outbox) {
        if !self.accepts(seq)
            || !matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            debug!(seq, reason, "ignoring failure of superseded channel");
            return;
        }
        self.close(outbox);
        self.apply(ConnectionInput::Failed, outbox);
        self.recovering = true;

        if !self.polling {
            self.polling = true;
            outbox.push(Effect::PollSummary);
            outbox.schedule(TimerId::FallbackPoll, self.fallback_poll_interval);
        }
        if !self.loss_reported && !self.loss_pending {
            self.loss_pending = true;
            outbox.schedule(TimerId::LossGrace, self.loss_grace);
        }

        self.attempt = self.attempt.saturating_add(1);
        metrics::counter!("turnsync_reconnect_attempts_total").increment(1);

        if self.max_attempts.is_some_and(|max| self.attempt > max) {
            warn!(attempt = self.attempt, reason, "giving up on the push channel");
            self.apply(ConnectionInput::Exhausted, outbox);
            return;
        }

        let delay = self.backoff.delay(self.attempt);
        warn!(
            attempt = self.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason,
            "push channel lost, reconnect scheduled"
        );
        outbox.schedule(TimerId::Reconnect, delay);
    }

    /// The reconnect timer fired.
    pub fn retry_due(&mut self, outbox: &mut Outbox) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        self.open(outbox);
    }

    /// The fallback poll timer fired.
    pub fn fallback_poll_due(&mut self, outbox: &mut Outbox) {
        if !self.polling {
            return;
        }
        outbox.push(Effect::PollSummary);
        outbox.schedule(TimerId::FallbackPoll, self.fallback_poll_interval);
    }

    /// The loss grace period ended; announce the loss if still down.
    pub fn loss_grace_elapsed(&mut self, outbox: &mut Outbox) {
        if !std::mem::take(&mut self.loss_pending) || self.state == ConnectionState::Connected {
            return;
        }
        self.loss_reported = true;
        outbox.notify(Notification::ConnectionLost);
    }

    fn open(&mut self, outbox: &mut Outbox) {
        let Some(filter) = self.filter.clone() else {
            return;
        };
        self.channel_seq += 1;
        self.open_channel = Some(self.channel_seq);
        outbox.push(Effect::OpenChannel {
            seq: self.channel_seq,
            filter,
        });
        self.apply(ConnectionInput::Connect, outbox);
    }

    fn close(&mut self, outbox: &mut Outbox) {
        if let Some(seq) = self.open_channel.take() {
            outbox.push(Effect::CloseChannel { seq });
        }
    }

    fn apply(&mut self, input: ConnectionInput, outbox: &mut Outbox) {
        let Some(next) = transition(self.state, input) else {
            debug!(state = %self.state, ?input, "input ignored");
            return;
        };
        if next != self.state {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
            outbox.notify(Notification::ConnectionState(next));
        }
    }
}
