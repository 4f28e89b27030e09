use anyhow::{Context, Result, bail};
use clap::Args;
use client::{HttpTransport, Transport};
use shared::{
    config::ClientConfig,
    models::{SendCommandRequest, SendSelectionRequest, TurnId},
};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Conversation to send to
    #[arg(long, alias = "conv")]
    pub conversation: String,

    /// Message text
    #[arg(required_unless_present = "answer")]
    pub text: Option<String>,

    /// Answer the question turn with this id instead of sending text
    #[arg(long, requires = "option", conflicts_with = "text")]
    pub answer: Option<i64>,

    /// Option label to select; repeat for multiple selections
    #[arg(long = "option")]
    pub option: Vec<String>,
}

pub async fn run(config: &ClientConfig, args: SendArgs) -> Result<()> {
    let transport = HttpTransport::from_config(config);

    let accepted = match (args.answer, args.text) {
        (Some(question_id), _) => {
            let request = SendSelectionRequest {
                question_id: TurnId(question_id),
                selected: args.option,
            };
            transport
                .send_selection(&args.conversation, &request)
                .await
                .context("failed to send selection")?
        }
        (None, Some(text)) => {
            if text.trim().is_empty() {
                bail!("message is empty");
            }
            let request = SendCommandRequest {
                text,
                attachments: Vec::new(),
            };
            transport
                .send_command(&args.conversation, &request)
                .await
                .context("failed to send message")?
        }
        (None, None) => bail!("nothing to send"),
    };

    match accepted.request_id {
        Some(id) => println!("Accepted (request {id})"),
        None => println!("Accepted"),
    }
    Ok(())
}
