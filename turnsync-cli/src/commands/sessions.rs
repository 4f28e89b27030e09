use anyhow::{Context, Result};
use clap::Args;
use client::{HttpTransport, Transport};
use shared::{config::ClientConfig, models::SessionSummary};

#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// Include ended sessions
    #[arg(long)]
    pub all: bool,

    /// Print the raw response as JSON
    #[arg(long)]
    pub json: bool,
}

fn render_session(session: &SessionSummary) -> String {
    let title = if session.title.is_empty() {
        "(untitled)"
    } else {
        session.title.as_str()
    };
    let mut line = format!(
        "- {} {title} [{}]",
        session.conversation_id, session.agent_state
    );
    if let Some(agent) = &session.agent_id {
        line.push_str(&format!(" agent={agent}"));
    }
    if let Some(updated) = session.updated_at {
        line.push_str(&format!(" updated={}", updated.0.format("%Y-%m-%d %H:%M:%S")));
    }
    line
}

pub async fn run(config: &ClientConfig, args: &SessionsArgs) -> Result<()> {
    let transport = HttpTransport::from_config(config);
    let sessions = transport
        .list_sessions(args.all)
        .await
        .context("failed to list sessions")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.active.is_empty() {
        println!("No active sessions.");
    }
    for session in &sessions.active {
        println!("{}", render_session(session));
    }
    if args.all && !sessions.ended.is_empty() {
        println!();
        println!("Ended:");
        for session in &sessions.ended {
            println!("{}", render_session(session));
        }
    }
    Ok(())
}
