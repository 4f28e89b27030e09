//! The context object tying the four components together.
//!
//! [`SyncEngine`] is sans-IO: every entry point mutates state and leaves
//! effects, notifications and view changes behind for the driver to drain.
//! One engine step never observes another half-done.

use std::collections::HashMap;

use serde::Serialize;
use shared::{
    config::SyncSettings,
    models::{
        Actor, ConversationStatus, PushEvent, SessionListResponse, StreamFilter, Timestamp,
        TranscriptSlice, Turn, TurnId,
    },
};
use tracing::{debug, info, trace, warn};

use crate::{
    connection::{ConnectionManager, ConnectionState, Route, classify},
    cursor::SyncCursor,
    effect::{Effect, FetchTicket, Notification, Outbox, SendPayload, TimerId},
    error::{SendFailure, SyncError},
    fetcher::{FetchReason, Fetcher},
    reconciler::Reconciler,
    store::{Entry, LocalId, MergeDecision, MergeSource, TurnStore, ViewChange},
};

/// Everything scoped to the open conversation. Replaced wholesale on switch.
#[derive(Debug)]
struct Context {
    conversation_id: String,
    store: TurnStore,
    cursor: SyncCursor,
    reconciler: Reconciler,
    fetcher: Fetcher,
    status: ConversationStatus,
}

/// Whole-transcript view for renderers that redraw from scratch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSnapshot {
    pub conversation_id: Option<String>,
    pub entries: Vec<Entry>,
    pub status: ConversationStatus,
    pub connection: ConnectionState,
    pub has_more: bool,
    pub pending_sends: usize,
}

#[derive(Debug)]
pub struct SyncEngine {
    settings: SyncSettings,
    connection: ConnectionManager,
    context: Option<Context>,
    generation: u64,
    saved_markers: HashMap<String, TurnId>,
    /// Text of every send the transport has not answered yet. Outlives the
    /// conversation context so a late rejection can still return it.
    in_flight: HashMap<LocalId, String>,
    sessions: Option<SessionListResponse>,
    visible: bool,
    outbox: Outbox,
    view_changes: Vec<ViewChange>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            connection: ConnectionManager::new(&settings),
            settings,
            context: None,
            generation: 0,
            saved_markers: HashMap::new(),
            in_flight: HashMap::new(),
            sessions: None,
            visible: true,
            outbox: Outbox::default(),
            view_changes: Vec::new(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.context.as_ref().map(|ctx| ctx.conversation_id.as_str())
    }

    #[must_use]
    pub fn store(&self) -> Option<&TurnStore> {
        self.context.as_ref().map(|ctx| &ctx.store)
    }

    #[must_use]
    pub fn cursor(&self) -> Option<&SyncCursor> {
        self.context.as_ref().map(|ctx| &ctx.cursor)
    }

    #[must_use]
    pub fn status(&self) -> Option<&ConversationStatus> {
        self.context.as_ref().map(|ctx| &ctx.status)
    }

    #[must_use]
    pub const fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn sessions(&self) -> Option<&SessionListResponse> {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> TranscriptSnapshot {
        let connection = self.connection.state();
        match &self.context {
            Some(ctx) => TranscriptSnapshot {
                conversation_id: Some(ctx.conversation_id.clone()),
                entries: ctx.store.entries().to_vec(),
                status: ctx.status.clone(),
                connection,
                has_more: ctx.cursor.has_more,
                pending_sends: ctx.reconciler.pending().len(),
            },
            None => TranscriptSnapshot {
                conversation_id: None,
                entries: Vec::new(),
                status: ConversationStatus::default(),
                connection,
                has_more: false,
                pending_sends: 0,
            },
        }
    }

    // ── Draining ────────────────────────────────────────────────────────

    pub fn take_effects(&mut self) -> Vec<Effect> {
        self.outbox.take_effects()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.outbox.take_notifications()
    }

    pub fn take_view_changes(&mut self) -> Vec<ViewChange> {
        if let Some(ctx) = self.context.as_mut() {
            self.view_changes.extend(ctx.store.drain_changes());
        }
        std::mem::take(&mut self.view_changes)
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Switches the active conversation. Everything tied to the previous one
    /// is dropped; its late results are recognised by the bumped generation.
    pub fn open_conversation(&mut self, conversation_id: &str, filter: Option<StreamFilter>) {
        if let Some(previous) = self.context.take() {
            self.retire(previous);
        }
        self.generation += 1;
        info!(conversation_id, generation = self.generation, "opening conversation");

        let marker = self.saved_markers.get(conversation_id).copied();
        let mut ctx = Context {
            conversation_id: conversation_id.to_string(),
            store: TurnStore::new(conversation_id, self.settings.group_window()),
            cursor: SyncCursor::with_marker(marker),
            reconciler: Reconciler::new(self.settings.pending_deadline()),
            fetcher: Fetcher::new(conversation_id, self.generation, self.settings.fetch_debounce()),
            status: ConversationStatus::default(),
        };
        ctx.fetcher
            .request_latest(FetchReason::Initial, None, &mut self.outbox);
        self.context = Some(ctx);
        self.outbox
            .schedule(TimerId::SafetyNet, self.settings.safety_net_interval());

        let filter = filter.unwrap_or_else(|| StreamFilter::for_conversation(conversation_id));
        self.connection.connect(filter, &mut self.outbox);
    }

    pub fn connect(&mut self, filter: StreamFilter) {
        self.connection.connect(filter, &mut self.outbox);
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect(&mut self.outbox);
    }

    /// Sends a message optimistically.
    ///
    /// # Errors
    /// [`SyncError::NoConversation`] when nothing is open, and
    /// [`SyncError::InvalidRequest`] for an empty message.
    pub fn send(&mut self, payload: SendPayload, now: Timestamp) -> Result<LocalId, SyncError> {
        if payload.display_text().trim().is_empty() {
            return Err(SyncError::InvalidRequest("message is empty".to_string()));
        }
        let ctx = self.context.as_mut().ok_or(SyncError::NoConversation)?;
        let text = payload.display_text();
        let local_id = ctx
            .reconciler
            .send(&mut ctx.store, &mut self.outbox, payload, now);
        self.in_flight.insert(local_id, text);
        Ok(local_id)
    }

    pub fn send_accepted(&mut self, local_id: LocalId) {
        self.in_flight.remove(&local_id);
        debug!(%local_id, "send accepted, awaiting turn");
    }

    /// The transport reported the send as failed. The text comes back even
    /// when the conversation it was sent to is no longer open.
    pub fn send_failed(
        &mut self,
        local_id: LocalId,
        error: SyncError,
        now: Timestamp,
    ) -> Option<SendFailure> {
        let text = self.in_flight.remove(&local_id);
        let failure = match self.context.as_mut() {
            Some(ctx) => ctx.reconciler.fail(
                &mut ctx.store,
                &mut self.outbox,
                local_id,
                error.clone(),
                now,
            ),
            None => None,
        };
        let failure = match (failure, text) {
            (Some(failure), _) => failure,
            (None, Some(text)) => {
                warn!(%local_id, %error, "send failed after its conversation was closed");
                SendFailure {
                    local_id,
                    text,
                    error,
                }
            }
            (None, None) => return None,
        };
        self.outbox.notify(Notification::SendFailed(failure.clone()));
        Some(failure)
    }

    /// Requests the page before the oldest fetched turn. Returns `false` when
    /// there is nothing more to load or a page is already on its way.
    pub fn load_older(&mut self) -> bool {
        let limit = self.settings.page_size;
        let Some(ctx) = self.context.as_mut() else {
            return false;
        };
        let Some(before) = ctx.cursor.oldest_fetched else {
            return false;
        };
        if !ctx.cursor.has_more {
            return false;
        }
        ctx.fetcher.request_older(before, limit, &mut self.outbox)
    }

    /// Foreground/background change. Regaining visibility triggers a catch-up.
    pub fn set_visible(&mut self, visible: bool) {
        let regained = visible && !self.visible;
        self.visible = visible;
        if regained {
            self.request_latest(FetchReason::Visibility);
        }
    }

    /// Remembers the last-read turn of the open conversation for this session.
    pub fn save_marker(&mut self, turn_id: TurnId) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.cursor.saved_marker = Some(turn_id);
            self.saved_markers
                .insert(ctx.conversation_id.clone(), turn_id);
        }
    }

    #[must_use]
    pub fn saved_marker(&self) -> Option<TurnId> {
        self.context.as_ref().and_then(|ctx| ctx.cursor.saved_marker)
    }

    // ── Push channel ────────────────────────────────────────────────────

    pub fn channel_opened(&mut self, seq: u64) {
        let Some(outcome) = self.connection.opened(seq, &mut self.outbox) else {
            return;
        };
        if outcome.recovered && self.context.is_some() {
            self.request_latest(FetchReason::Reconnect);
            self.outbox
                .schedule(TimerId::ReconnectFollowUp, self.settings.reconnect_follow_up());
        }
    }

    pub fn channel_failed(&mut self, seq: u64, reason: &str) {
        self.connection.failed(seq, reason, &mut self.outbox);
    }

    pub fn push_event(&mut self, seq: u64, event: PushEvent) {
        if !self.connection.accepts(seq) {
            trace!(seq, event = event.type_name(), "event from closed channel dropped");
            return;
        }
        let event_type = event.type_name();
        match classify(event, self.conversation_id()) {
            Route::Turn(turn) => {
                self.ingest(turn, MergeSource::Push);
            }
            Route::TurnUpdate(turn, kind) => {
                let known = self.store().is_some_and(|store| store.contains(turn.id));
                if !known && turn.actor == Actor::User {
                    self.ingest(turn, MergeSource::Update);
                } else if let Some(ctx) = self.context.as_mut() {
                    ctx.cursor.observe(turn.id);
                    ctx.store.apply_update(turn, kind);
                }
            }
            Route::Status(status) => self.set_status(status),
            Route::Resync => {
                info!("server reported dropped events, resyncing");
                metrics::counter!("turnsync_gap_resyncs_total").increment(1);
                self.outbox.push(Effect::PollSummary);
                self.request_latest(FetchReason::Gap);
            }
            Route::Refresh { fetch } => {
                self.outbox.push(Effect::PollSummary);
                if fetch {
                    self.request_latest(FetchReason::Signal);
                }
            }
            Route::Ignore => trace!(event = event_type, "event ignored"),
        }
    }

    // ── Transport completions ───────────────────────────────────────────

    /// A latest fetch settled.
    pub fn fetch_completed(&mut self, ticket: FetchTicket, result: Result<TranscriptSlice, SyncError>) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let Some(accepted) = ctx.fetcher.complete_latest(ticket, &mut self.outbox) else {
            return;
        };
        let slice = match result {
            Ok(slice) => slice,
            Err(error) => {
                debug!(conversation_id = %ctx.conversation_id, %error, "catch-up fetch failed");
                return;
            }
        };

        // Pushes that landed while the request was in flight may be newer
        // than the response; its status is then out of date.
        let status_current = ctx.cursor.last_seen
            <= accepted.high_water_at_start.max(slice.newest_turn_id());
        let first_page = ctx.cursor.oldest_fetched.is_none();
        if first_page {
            ctx.cursor.has_more = slice.has_more;
        }
        if let Some(oldest) = slice.oldest_turn_id.or_else(|| slice.turns.iter().map(|t| t.id).min()) {
            ctx.cursor.observe_oldest(oldest);
        }
        let status = slice.status();
        self.merge_slice(slice, MergeSource::Fetch);

        if status_current {
            self.set_status(status);
        } else {
            debug!("fetched status is behind pushed turns, keeping current status");
        }
    }

    /// A page of older turns settled.
    pub fn older_completed(&mut self, ticket: FetchTicket, result: Result<TranscriptSlice, SyncError>) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if !ctx.fetcher.complete_older(ticket) {
            return;
        }
        let slice = match result {
            Ok(slice) => slice,
            Err(error) => {
                debug!(conversation_id = %ctx.conversation_id, %error, "loading older turns failed");
                return;
            }
        };
        ctx.cursor.has_more = slice.has_more;
        if let Some(oldest) = slice.oldest_turn_id.or_else(|| slice.turns.iter().map(|t| t.id).min()) {
            ctx.cursor.observe_oldest(oldest);
        }
        self.merge_slice(slice, MergeSource::Older);
    }

    /// The session summary poll settled.
    pub fn summary_polled(&mut self, result: Result<SessionListResponse, SyncError>) {
        let sessions = match result {
            Ok(sessions) => sessions,
            Err(error) => {
                debug!(%error, "session summary poll failed");
                return;
            }
        };

        if let Some(ctx) = self.context.as_ref()
            && let Some(summary) = sessions.find(&ctx.conversation_id)
        {
            let behind = summary
                .last_turn_id
                .is_some_and(|last| ctx.cursor.last_seen.is_none_or(|seen| seen < last));
            let status = ConversationStatus {
                agent_state: summary.agent_state.clone(),
                ended: summary.ended,
            };
            self.set_status(status);
            if behind {
                self.request_latest(FetchReason::Poll);
            }
        }

        if self.sessions.as_ref() != Some(&sessions) {
            self.outbox
                .notify(Notification::SessionsChanged(sessions.clone()));
            self.sessions = Some(sessions);
        }
    }

    // ── Timers ──────────────────────────────────────────────────────────

    pub fn timer_fired(&mut self, timer: TimerId) {
        trace!(?timer, "timer fired");
        match timer {
            TimerId::Reconnect => self.connection.retry_due(&mut self.outbox),
            TimerId::FallbackPoll => self.connection.fallback_poll_due(&mut self.outbox),
            TimerId::LossGrace => self.connection.loss_grace_elapsed(&mut self.outbox),
            TimerId::PendingDeadline(local_id) => {
                if let Some(ctx) = self.context.as_mut()
                    && ctx.reconciler.expire(&mut ctx.store, local_id)
                {
                    self.outbox.notify(Notification::SendExpired { local_id });
                }
            }
            TimerId::FetchDebounce => {
                if let Some(ctx) = self.context.as_mut() {
                    let high_water = ctx.cursor.last_seen;
                    ctx.fetcher.debounce_elapsed(high_water, &mut self.outbox);
                }
            }
            TimerId::SafetyNet => {
                let ended = self.status().is_none_or(|status| status.ended);
                if !ended {
                    self.request_latest(FetchReason::SafetyNet);
                    self.outbox
                        .schedule(TimerId::SafetyNet, self.settings.safety_net_interval());
                }
            }
            TimerId::ReconnectFollowUp => self.request_latest(FetchReason::ReconnectFollowUp),
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn retire(&mut self, mut previous: Context) {
        self.view_changes.extend(previous.store.drain_changes());
        self.view_changes.push(ViewChange::Cleared);
        if let Some(marker) = previous.cursor.saved_marker {
            self.saved_markers
                .insert(previous.conversation_id.clone(), marker);
        }
        let timers = previous
            .reconciler
            .deadline_timers()
            .chain([TimerId::FetchDebounce, TimerId::SafetyNet, TimerId::ReconnectFollowUp]);
        for timer in timers {
            debug_assert!(timer.is_conversation_scoped());
            self.outbox.cancel(timer);
        }
        debug!(conversation_id = %previous.conversation_id, "conversation context retired");
    }

    fn request_latest(&mut self, reason: FetchReason) {
        if let Some(ctx) = self.context.as_mut() {
            let high_water = ctx.cursor.last_seen;
            ctx.fetcher.request_latest(reason, high_water, &mut self.outbox);
        }
    }

    fn set_status(&mut self, status: ConversationStatus) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if ctx.status == status {
            return;
        }
        let ended_now = status.ended && !ctx.status.ended;
        ctx.status = status.clone();
        if ended_now {
            self.outbox.cancel(TimerId::SafetyNet);
        }
        self.outbox.notify(Notification::StatusChanged(status));
    }

    /// Routes one confirmed turn: dedup and terminal handling first, then
    /// optimistic promotion for user turns, then a normal merge.
    fn ingest(&mut self, turn: Turn, source: MergeSource) -> MergeDecision {
        let Some(ctx) = self.context.as_mut() else {
            return MergeDecision::Skipped;
        };
        ctx.cursor.observe(turn.id);

        if !ctx.store.contains(turn.id)
            && turn.actor == Actor::User
            && ctx.reconciler.try_promote(&mut ctx.store, &mut self.outbox, &turn)
        {
            return MergeDecision::Replaced;
        }
        ctx.store.merge_turn(turn, source)
    }

    fn merge_slice(&mut self, slice: TranscriptSlice, source: MergeSource) {
        let mut turns = slice.turns;
        turns.sort_by_key(|turn| (turn.timestamp, turn.id));
        for turn in turns {
            self.ingest(turn, source);
        }
        if let Some(ctx) = self.context.as_mut() {
            for boundary in slice.boundaries {
                ctx.store.insert_boundary(boundary);
            }
        }
    }
}
