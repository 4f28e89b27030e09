//! # Optimistic Send Reconciler
//!
//! Shows the user's message immediately as a placeholder and later swaps it
//! for the confirmed server turn, flags it when confirmation never comes, or
//! rolls it back when the send is rejected.

use std::time::Duration;

use shared::models::{Actor, Timestamp, Turn};
use tracing::{debug, warn};

use crate::{
    effect::{Effect, Outbox, SendPayload, TimerId},
    error::{SendFailure, SyncError},
    store::{LocalId, TurnStore},
};

/// A send awaiting its confirmed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub local_id: LocalId,
    pub display_text: String,
    pub sent_at: Timestamp,
}

impl PendingSend {
    fn matches(&self, turn: &Turn) -> bool {
        self.display_text.trim() == turn.display_text().trim()
    }
}

#[derive(Debug)]
pub struct Reconciler {
    deadline: Duration,
    /// Oldest first.
    pending: Vec<PendingSend>,
    /// Sends whose deadline passed. Their placeholders stay on screen flagged
    /// as failed, so a late confirmation can still claim them.
    expired: Vec<PendingSend>,
}

impl Reconciler {
    #[must_use]
    pub const fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            pending: Vec::new(),
            expired: Vec::new(),
        }
    }

    #[must_use]
    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    /// Inserts the placeholder, arms its deadline and emits the network send.
    /// The placeholder is in the store before this returns.
    pub fn send(
        &mut self,
        store: &mut TurnStore,
        outbox: &mut Outbox,
        payload: SendPayload,
        now: Timestamp,
    ) -> LocalId {
        let local_id = LocalId::new();
        let display_text = payload.display_text();

        store.insert_placeholder(local_id, display_text.clone(), now);
        self.pending.push(PendingSend {
            local_id,
            display_text,
            sent_at: now,
        });
        outbox.schedule(TimerId::PendingDeadline(local_id), self.deadline);
        outbox.push(Effect::Send {
            local_id,
            conversation_id: store.conversation_id().to_string(),
            payload,
        });
        debug!(%local_id, conversation_id = store.conversation_id(), "optimistic send queued");
        local_id
    }

    /// Tries to claim a confirmed user turn for the oldest matching send.
    ///
    /// The caller must have checked that the store does not hold the id yet.
    pub fn try_promote(&mut self, store: &mut TurnStore, outbox: &mut Outbox, turn: &Turn) -> bool {
        if turn.actor != Actor::User {
            return false;
        }

        if let Some(position) = self.pending.iter().position(|send| send.matches(turn)) {
            let send = self.pending.remove(position);
            if !store.promote_placeholder(send.local_id, turn.clone()) {
                return false;
            }
            outbox.cancel(TimerId::PendingDeadline(send.local_id));
            metrics::counter!("turnsync_sends_promoted_total").increment(1);
            debug!(local_id = %send.local_id, turn_id = %turn.id, "placeholder promoted");
            return true;
        }

        if let Some(position) = self.expired.iter().position(|send| send.matches(turn)) {
            let send = self.expired.remove(position);
            if store.promote_placeholder(send.local_id, turn.clone()) {
                metrics::counter!("turnsync_sends_promoted_total").increment(1);
                debug!(local_id = %send.local_id, turn_id = %turn.id, "expired placeholder confirmed late");
                return true;
            }
        }
        false
    }

    /// Deadline elapsed without confirmation: flag the placeholder, keep it.
    pub fn expire(&mut self, store: &mut TurnStore, local_id: LocalId) -> bool {
        let Some(position) = self.pending.iter().position(|send| send.local_id == local_id) else {
            return false;
        };
        let send = self.pending.remove(position);
        store.mark_placeholder_failed(local_id);
        warn!(%local_id, "send was not confirmed in time");
        self.expired.push(send);
        true
    }

    /// The server rejected the send: remove the placeholder, leave an inline
    /// notice, and hand the text back.
    pub fn fail(
        &mut self,
        store: &mut TurnStore,
        outbox: &mut Outbox,
        local_id: LocalId,
        error: SyncError,
        now: Timestamp,
    ) -> Option<SendFailure> {
        if let Some(position) = self.pending.iter().position(|send| send.local_id == local_id) {
            self.pending.remove(position);
            outbox.cancel(TimerId::PendingDeadline(local_id));
        } else if let Some(position) = self.expired.iter().position(|send| send.local_id == local_id) {
            self.expired.remove(position);
        }

        let placeholder = store.remove_placeholder(local_id)?;
        warn!(%local_id, %error, "send failed");
        store.insert_notice(format!("Message not sent: {error}"), now);
        Some(SendFailure {
            local_id,
            text: placeholder.text,
            error,
        })
    }

    /// Deadline timers still armed, for cancellation on context switch.
    pub fn deadline_timers(&self) -> impl Iterator<Item = TimerId> + '_ {
        self.pending
            .iter()
            .map(|send| TimerId::PendingDeadline(send.local_id))
    }
}
