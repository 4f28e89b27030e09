//! Async driver for [`SyncEngine`].
//!
//! One tokio task owns the engine and serializes caller commands, transport
//! completions and timer expirations through a single `select!` loop. After
//! every step it executes the engine's effects, replays view changes into the
//! [`TranscriptView`] and broadcasts notifications.
//!
//! ```text
//!   SyncHandle (Clone)        mpsc        driver task
//!   ┌──────────────────┐  ────────▶  ┌──────────────────────────┐
//!   │ .send_text()     │             │ SyncEngine               │
//!   │ .load_older()    │  ◀────────  │ DelayQueue<TimerId>      │
//!   │ .subscribe()     │   oneshot   │ transport tasks ─┐       │
//!   └──────────────────┘             └──────────────────┼───────┘
//!                                       completions ◀───┘
//! ```

use std::{collections::HashMap, sync::Arc};

use futures_util::StreamExt;
use shared::{
    config::SyncSettings,
    models::{
        PushEvent, SendAccepted, SessionListResponse, StreamFilter, Timestamp, TranscriptSlice,
        TurnId,
    },
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::{
    sync::CancellationToken,
    time::{DelayQueue, delay_queue},
};
use tracing::{debug, info};

use crate::{
    effect::{Effect, FetchTicket, Notification, SendPayload, TimerId},
    engine::{SyncEngine, TranscriptSnapshot},
    error::SyncError,
    store::{LocalId, TranscriptView},
    transport::Transport,
};

const NOTIFICATION_CAPACITY: usize = 256;

// ── Commands (internal) ─────────────────────────────────────────────────

enum Command {
    OpenConversation {
        conversation_id: String,
        filter: Option<StreamFilter>,
        reply: oneshot::Sender<()>,
    },
    Send {
        payload: SendPayload,
        reply: oneshot::Sender<Result<LocalId, SyncError>>,
    },
    LoadOlder {
        reply: oneshot::Sender<bool>,
    },
    SetVisible {
        visible: bool,
    },
    Connect {
        filter: StreamFilter,
    },
    Disconnect,
    SaveMarker {
        turn_id: TurnId,
    },
    Snapshot {
        reply: oneshot::Sender<TranscriptSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results reported back by spawned transport tasks.
enum Completion {
    Opened {
        seq: u64,
    },
    Event {
        seq: u64,
        event: PushEvent,
    },
    Failed {
        seq: u64,
        reason: String,
    },
    Latest {
        ticket: FetchTicket,
        result: Result<TranscriptSlice, SyncError>,
    },
    Older {
        ticket: FetchTicket,
        result: Result<TranscriptSlice, SyncError>,
    },
    Sent {
        local_id: LocalId,
        result: Result<SendAccepted, SyncError>,
    },
    Summary(Result<SessionListResponse, SyncError>),
}

// ── Public API ──────────────────────────────────────────────────────────

/// Starts sync drivers.
#[derive(Debug, Clone, Copy)]
pub struct SyncClient;

impl SyncClient {
    /// Spawns the driver on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        settings: SyncSettings,
        transport: Arc<dyn Transport>,
        view: Box<dyn TranscriptView>,
    ) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let driver = Driver {
            engine: SyncEngine::new(settings),
            transport,
            view,
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
            channels: HashMap::new(),
            completions: completions_tx,
            notifications: notifications.clone(),
        };
        tokio::spawn(driver.run(commands_rx, completions_rx));

        SyncHandle {
            commands: commands_tx,
            notifications,
        }
    }
}

/// Cloneable handle to a running driver. Every method fails with
/// [`SyncError::Shutdown`] once the driver has stopped.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
}

impl SyncHandle {
    fn command(&self, command: Command) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| SyncError::Shutdown)
    }

    /// Switches to `conversation_id` and connects its push channel. Resolves
    /// once the previous context has been torn down.
    pub async fn open_conversation(
        &self,
        conversation_id: &str,
        filter: Option<StreamFilter>,
    ) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::OpenConversation {
            conversation_id: conversation_id.to_string(),
            filter,
            reply,
        })?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// Sends a text message. Resolves as soon as the placeholder is shown.
    pub async fn send_text(&self, text: &str) -> Result<LocalId, SyncError> {
        self.send(SendPayload::text(text)).await
    }

    /// Answers a question turn with the selected option labels.
    pub async fn send_selection(
        &self,
        question_id: TurnId,
        selected: Vec<String>,
    ) -> Result<LocalId, SyncError> {
        self.send(SendPayload::selection(question_id, selected)).await
    }

    async fn send(&self, payload: SendPayload) -> Result<LocalId, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { payload, reply })?;
        rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Requests the page before the oldest loaded turn. `false` when there is
    /// nothing more or a page is already loading.
    pub async fn load_older(&self) -> Result<bool, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::LoadOlder { reply })?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        self.command(Command::SetVisible { visible })
    }

    pub fn connect(&self, filter: StreamFilter) -> Result<(), SyncError> {
        self.command(Command::Connect { filter })
    }

    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.command(Command::Disconnect)
    }

    pub fn save_marker(&self, turn_id: TurnId) -> Result<(), SyncError> {
        self.command(Command::SaveMarker { turn_id })
    }

    pub async fn snapshot(&self) -> Result<TranscriptSnapshot, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Stops the driver and every push channel task.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Shutdown { reply })?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }
}

// ── Driver task ─────────────────────────────────────────────────────────

struct Driver {
    engine: SyncEngine,
    transport: Arc<dyn Transport>,
    view: Box<dyn TranscriptView>,
    timers: DelayQueue<TimerId>,
    timer_keys: HashMap<TimerId, delay_queue::Key>,
    /// Reader tasks of push channels, by channel sequence number.
    channels: HashMap<u64, CancellationToken>,
    completions: mpsc::UnboundedSender<Completion>,
    notifications: broadcast::Sender<Notification>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let shutdown_reply = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    None => break None,
                    Some(command) => self.handle_command(command),
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
                Some(expired) = std::future::poll_fn(|cx| self.timers.poll_expired(cx)),
                    if !self.timers.is_empty() =>
                {
                    let timer = expired.into_inner();
                    self.timer_keys.remove(&timer);
                    self.engine.timer_fired(timer);
                }
            }
            self.flush();
        };

        for (_, token) in self.channels.drain() {
            token.cancel();
        }
        info!("sync driver stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::OpenConversation {
                conversation_id,
                filter,
                reply,
            } => {
                self.engine.open_conversation(&conversation_id, filter);
                self.flush();
                let _ = reply.send(());
            }
            Command::Send { payload, reply } => {
                let result = self.engine.send(payload, Timestamp::now());
                self.flush();
                let _ = reply.send(result);
            }
            Command::LoadOlder { reply } => {
                let _ = reply.send(self.engine.load_older());
            }
            Command::SetVisible { visible } => self.engine.set_visible(visible),
            Command::Connect { filter } => self.engine.connect(filter),
            Command::Disconnect => self.engine.disconnect(),
            Command::SaveMarker { turn_id } => self.engine.save_marker(turn_id),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Opened { seq } => self.engine.channel_opened(seq),
            Completion::Event { seq, event } => self.engine.push_event(seq, event),
            Completion::Failed { seq, reason } => self.engine.channel_failed(seq, &reason),
            Completion::Latest { ticket, result } => self.engine.fetch_completed(ticket, result),
            Completion::Older { ticket, result } => self.engine.older_completed(ticket, result),
            Completion::Sent { local_id, result } => match result {
                Ok(_) => self.engine.send_accepted(local_id),
                Err(error) => {
                    self.engine.send_failed(local_id, error, Timestamp::now());
                }
            },
            Completion::Summary(result) => self.engine.summary_polled(result),
        }
    }

    /// Executes pending effects, then publishes view changes and
    /// notifications.
    fn flush(&mut self) {
        for effect in self.engine.take_effects() {
            self.execute(effect);
        }
        for change in self.engine.take_view_changes() {
            change.apply(self.view.as_mut());
        }
        for notification in self.engine.take_notifications() {
            // No subscribers is fine.
            let _ = self.notifications.send(notification);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenChannel { seq, filter } => self.open_channel(seq, filter),
            Effect::CloseChannel { seq } => {
                if let Some(token) = self.channels.remove(&seq) {
                    token.cancel();
                }
            }
            Effect::FetchLatest {
                ticket,
                conversation_id,
            } => {
                self.spawn_call(move |transport| async move {
                    let result = transport
                        .fetch_transcript(&conversation_id, None, None)
                        .await;
                    Completion::Latest { ticket, result }
                });
            }
            Effect::FetchOlder {
                ticket,
                conversation_id,
                before,
                limit,
            } => {
                self.spawn_call(move |transport| async move {
                    let result = transport
                        .fetch_transcript(&conversation_id, Some(before), Some(limit))
                        .await;
                    Completion::Older { ticket, result }
                });
            }
            Effect::Send {
                local_id,
                conversation_id,
                payload,
            } => {
                self.spawn_call(move |transport| async move {
                    let result = match &payload {
                        SendPayload::Command(request) => {
                            transport.send_command(&conversation_id, request).await
                        }
                        SendPayload::Selection(request) => {
                            transport.send_selection(&conversation_id, request).await
                        }
                    };
                    Completion::Sent { local_id, result }
                });
            }
            Effect::PollSummary => {
                self.spawn_call(|transport| async move {
                    Completion::Summary(transport.list_sessions(true).await)
                });
            }
            Effect::Schedule { timer, after } => {
                if let Some(key) = self.timer_keys.remove(&timer) {
                    self.timers.try_remove(&key);
                }
                let key = self.timers.insert(timer, after);
                self.timer_keys.insert(timer, key);
            }
            Effect::Cancel { timer } => {
                if let Some(key) = self.timer_keys.remove(&timer) {
                    self.timers.try_remove(&key);
                }
            }
        }
    }

    /// Runs one transport call on its own task and reports the result.
    fn spawn_call<F, Fut>(&self, call: F)
    where
        F: FnOnce(Arc<dyn Transport>) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        let task = call(Arc::clone(&self.transport));
        tokio::spawn(async move {
            let _ = completions.send(task.await);
        });
    }

    fn open_channel(&mut self, seq: u64, filter: StreamFilter) {
        let token = CancellationToken::new();
        self.channels.insert(seq, token.clone());
        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => debug!(seq, "push channel reader stopped"),
                () = read_channel(transport, filter, seq, &completions) => {}
            }
        });
    }
}

async fn read_channel(
    transport: Arc<dyn Transport>,
    filter: StreamFilter,
    seq: u64,
    completions: &mpsc::UnboundedSender<Completion>,
) {
    let mut stream = match transport.open_stream(&filter).await {
        Ok(stream) => stream,
        Err(error) => {
            let _ = completions.send(Completion::Failed {
                seq,
                reason: error.to_string(),
            });
            return;
        }
    };
    let _ = completions.send(Completion::Opened { seq });

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                let _ = completions.send(Completion::Event { seq, event });
            }
            Err(error) => {
                let _ = completions.send(Completion::Failed {
                    seq,
                    reason: error.to_string(),
                });
                return;
            }
        }
    }
    let _ = completions.send(Completion::Failed {
        seq,
        reason: SyncError::ChannelClosed.to_string(),
    });
}
