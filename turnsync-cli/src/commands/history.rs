use anyhow::{Context, Result};
use clap::Args;
use client::{HttpTransport, Transport, TurnStore, store::MergeSource};
use shared::{config::ClientConfig, models::TurnId};

use super::render::entry_lines;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Conversation to print
    #[arg(long, alias = "conv")]
    pub conversation: String,

    /// Only turns older than this id
    #[arg(long)]
    pub before: Option<i64>,

    /// Maximum number of turns (default: configured page size)
    #[arg(long)]
    pub limit: Option<u32>,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config: &ClientConfig, args: HistoryArgs) -> Result<()> {
    let transport = HttpTransport::from_config(config);
    let limit = args.limit.unwrap_or(config.sync.page_size);
    let slice = transport
        .fetch_transcript(&args.conversation, args.before.map(TurnId), Some(limit))
        .await
        .context("failed to fetch transcript")?;

    let mut store = TurnStore::new(&args.conversation, config.sync.group_window());
    let status = slice.status();
    let has_more = slice.has_more;
    store.merge(slice.turns, MergeSource::Fetch);
    for boundary in slice.boundaries {
        store.insert_boundary(boundary);
    }

    if args.json {
        let output = serde_json::json!({
            "conversation_id": args.conversation,
            "entries": store.entries(),
            "status": status,
            "has_more": has_more,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if store.is_empty() {
        println!("No turns yet.");
    }
    for entry in store.entries() {
        println!("{}", entry_lines(entry));
    }
    let state = if status.ended {
        "ended".to_string()
    } else {
        status.agent_state.to_string()
    };
    println!("[agent {state}]");
    if has_more && let Some(oldest) = store.min_turn_id() {
        println!("(Older turns available; use --before {oldest})");
    }
    Ok(())
}
