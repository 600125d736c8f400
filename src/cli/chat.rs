//! Line-based interactive chat bound to the primary pane.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::core::chat::Chat;
use crate::core::chat_stream::{ChatStreamService, StreamMessage};
use crate::core::session::{ChatPane, SessionSettings};
use crate::core::store::{ConversationStore, PaneId, StatePersistence, StoreError};

const HELP: &str = "\
Commands:
  /new              Start a new chat
  /chats            List saved chats
  /open <id>        Switch to a saved chat
  /delete <id>      Delete a chat
  /edit <n> <text>  Replace message n and ask again
  /help             Show this help
  /quit             Exit (Ctrl+D also works)
Ctrl+C cancels an answer while it is streaming.";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    New,
    Chats,
    Open(String),
    Delete(String),
    Edit { index: usize, text: String },
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));
    match (name, rest) {
        ("new", _) => Input::New,
        ("chats", _) => Input::Chats,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        ("open", id) if !id.is_empty() => Input::Open(id.to_string()),
        ("delete", id) if !id.is_empty() => Input::Delete(id.to_string()),
        ("edit", args) => {
            let parsed = args.split_once(char::is_whitespace).and_then(|(n, text)| {
                let index = n.parse::<usize>().ok()?.checked_sub(1)?;
                let text = text.trim();
                (!text.is_empty()).then(|| (index, text.to_string()))
            });
            match parsed {
                Some((index, text)) => Input::Edit { index, text },
                None => Input::Invalid("Usage: /edit <n> <text>".to_string()),
            }
        }
        ("open" | "delete", _) => Input::Invalid(format!("Usage: /{name} <id>")),
        _ => Input::Invalid(format!("Unknown command: /{name} (try /help)")),
    }
}

/// Store failures are reported in the transcript; the session carries on.
fn report<T>(result: Result<T, StoreError>) -> Option<T> {
    result.inspect_err(|err| eprintln!("❌ {err}")).ok()
}

fn print_transcript(chat: &Chat) {
    println!("💬 {} ({})", chat.title, chat.id);
    for (i, message) in chat.messages.iter().enumerate() {
        let who = if message.is_user() { "you" } else { "assistant" };
        println!("[{}] {who}: {}", i + 1, message.content);
    }
}

fn print_chats<P: StatePersistence>(store: &ConversationStore<P>, current: Option<&str>) {
    if store.chats().is_empty() {
        println!("No saved chats.");
        return;
    }
    for chat in store.chats() {
        let marker = if current == Some(chat.id.as_str()) { "*" } else { " " };
        println!(
            "{marker} {}  {}  ({} messages)",
            chat.id,
            chat.title,
            chat.messages.len()
        );
    }
}

pub async fn run_chat<P: StatePersistence>(
    mut store: ConversationStore<P>,
    settings: SessionSettings,
) -> Result<(), Box<dyn Error>> {
    let (service, mut rx) = ChatStreamService::new();
    let mut pane = ChatPane::open(PaneId::Primary, &store);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "🚀 mosp: {} via {} ({})",
        settings.provider.model, settings.provider.provider_display_name, settings.provider.base_url
    );
    eprintln!("💡 Type /help for commands, Ctrl+D to quit");
    if let Some(chat) = pane.chat_id().and_then(|id| store.chat(id)) {
        print_transcript(chat);
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let params = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => {
                println!("{HELP}");
                continue;
            }
            Input::Invalid(reason) => {
                eprintln!("⚠️  {reason}");
                continue;
            }
            Input::New => {
                if report(pane.bind(&mut store, None)).is_some() {
                    println!("🆕 New chat");
                }
                continue;
            }
            Input::Chats => {
                print_chats(&store, pane.chat_id());
                continue;
            }
            Input::Open(id) => {
                if report(pane.bind(&mut store, Some(id.as_str()))).is_some() {
                    if let Some(chat) = store.chat(&id) {
                        print_transcript(chat);
                    }
                }
                continue;
            }
            Input::Delete(id) => {
                let result = store.delete_chat(&id);
                // A failed write still removed the chat in memory.
                let deleted = !matches!(result, Err(StoreError::ChatNotFound(_)));
                report(result);
                if deleted {
                    if pane.chat_id() == Some(id.as_str()) {
                        report(pane.bind(&mut store, None));
                    }
                    println!("🗑️  Deleted {id}");
                }
                continue;
            }
            Input::Edit { index, text } => {
                let len = pane
                    .chat_id()
                    .and_then(|id| store.chat(id))
                    .map_or(0, |chat| chat.messages.len());
                if index >= len {
                    eprintln!("⚠️  No message {} in this chat", index + 1);
                    continue;
                }
                report(pane.edit_and_resubmit(&mut store, &settings, index, &text)).flatten()
            }
            Input::Message(text) => report(pane.submit(&mut store, &settings, &text)).flatten(),
        };

        if let Some(params) = params {
            service.spawn_stream(params);
            stream_answer(&mut pane, &mut store, &mut rx).await?;
        }
    }

    Ok(())
}

async fn stream_answer<P: StatePersistence>(
    pane: &mut ChatPane,
    store: &mut ConversationStore<P>,
    rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>,
) -> Result<(), Box<dyn Error>> {
    let mut in_thinking = false;
    while pane.is_streaming() {
        tokio::select! {
            event = rx.recv() => {
                let Some((message, stream_id)) = event else {
                    break;
                };
                if pane.stream_id() != Some(stream_id) {
                    continue;
                }
                match &message {
                    StreamMessage::Thinking(text) => {
                        in_thinking = true;
                        eprint!("{text}");
                        io::stderr().flush()?;
                    }
                    StreamMessage::Chunk(text) => {
                        if in_thinking {
                            eprintln!();
                            in_thinking = false;
                        }
                        print!("{text}");
                        io::stdout().flush()?;
                    }
                    StreamMessage::Error(err) => eprintln!("\n❌ Error: {err}"),
                    StreamMessage::End => println!(),
                }
                report(pane.apply(store, message, stream_id));
            }
            _ = tokio::signal::ctrl_c() => {
                pane.cancel();
                println!("\n⏹️  Cancelled");
            }
        }
    }
    Ok(())
}
