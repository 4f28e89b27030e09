use std::{io, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use client::{HttpTransport, Notification, SyncClient, SyncHandle, Transport};
use shared::{config::ClientConfig, models::StreamFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::debug;

use super::render::TerminalView;

#[derive(Args, Debug)]
pub struct FollowArgs {
    /// Conversation to follow
    #[arg(long, alias = "conv")]
    pub conversation: String,

    /// Restrict the push channel to one agent
    #[arg(long)]
    pub agent: Option<String>,

    /// Restrict the push channel to these event types (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,
}

fn report(notification: &Notification) {
    match notification {
        Notification::ConnectionLost => eprintln!("[connection lost, reconnecting]"),
        Notification::Reconnected => eprintln!("[reconnected]"),
        Notification::StatusChanged(status) if status.ended => {
            eprintln!("[conversation ended]");
        }
        Notification::StatusChanged(status) => eprintln!("[agent {}]", status.agent_state),
        Notification::SendExpired { .. } => eprintln!("[message not confirmed by the server]"),
        Notification::SendFailed(failure) => {
            eprintln!("[not sent: {}] {}", failure.error, failure.text);
        }
        Notification::ConnectionState(state) => debug!(%state, "connection state changed"),
        Notification::SessionsChanged(_) => debug!("session summaries refreshed"),
    }
}

async fn follow(handle: &SyncHandle) -> Result<()> {
    let mut notifications = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            result = &mut interrupted => {
                result.context("failed to listen for Ctrl+C")?;
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    handle.send_text(line.trim()).await?;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
            notification = notifications.recv() => match notification {
                Ok(notification) => report(&notification),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "notifications dropped"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

pub async fn run(config: &ClientConfig, args: FollowArgs) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::from_config(config));
    let view = Box::new(TerminalView::new(io::stdout()));
    let handle = SyncClient::spawn(config.sync.clone(), transport, view);

    let filter = StreamFilter {
        conversation_id: Some(args.conversation.clone()),
        agent_id: args.agent,
        types: args.types,
    };
    handle
        .open_conversation(&args.conversation, Some(filter))
        .await
        .context("failed to open conversation")?;
    eprintln!(
        "Following conversation {} on {}... (press Ctrl+C to stop)",
        args.conversation, config.server_url
    );

    let outcome = follow(&handle).await;
    handle.shutdown().await?;
    outcome
}
