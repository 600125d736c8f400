//! One-shot `say` command: stream a single answer to stdout.

use std::error::Error;
use std::io::{self, Write};

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamParams};
use crate::core::context::ContextWindow;
use crate::core::message::Message;
use crate::core::providers::ProviderSession;

pub async fn run_say(
    prompt: Vec<String>,
    session: ProviderSession,
    context: ContextWindow,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: mosp say <prompt>");
        std::process::exit(1);
    }

    let params = StreamParams {
        client: reqwest::Client::new(),
        provider: session,
        api_messages: context.build(&[Message::user(prompt)]),
        cancel_token: tokio_util::sync::CancellationToken::new(),
        stream_id: 0,
    };

    let (stream_service, mut rx) = ChatStreamService::new();
    stream_service.spawn_stream(params);
    drop(stream_service);

    let mut thinking = false;
    while let Some((message, _)) = rx.recv().await {
        match message {
            StreamMessage::Thinking(text) => {
                thinking = true;
                eprint!("{text}");
                io::stderr().flush()?;
            }
            StreamMessage::Chunk(content) => {
                if thinking {
                    eprintln!();
                    thinking = false;
                }
                print!("{content}");
                io::stdout().flush()?;
            }
            StreamMessage::Error(err) => {
                eprintln!("\n\n❌ Error: {err}");
                std::process::exit(1);
            }
            StreamMessage::End => {
                println!();
                break;
            }
        }
    }

    Ok(())
}
