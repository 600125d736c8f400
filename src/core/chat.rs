use serde::{Deserialize, Serialize};

use crate::core::message::Message;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 40;

/// Provider and model a chat was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ChatConfig>,
}

impl Chat {
    /// A fresh, untitled chat whose id is the current time in milliseconds.
    pub fn new() -> Self {
        Self::with_id(chrono::Utc::now().timestamp_millis().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            config: None,
        }
    }

    pub fn is_untitled(&self) -> bool {
        self.title.is_empty() || self.title == DEFAULT_CHAT_TITLE
    }

    /// Append a message. The first user message names an untitled chat.
    pub fn push(&mut self, message: Message) {
        if message.is_user() && self.is_untitled() && !self.messages.iter().any(Message::is_user)
        {
            if let Some(title) = title_from(&message.content) {
                self.title = title;
            }
        }
        self.messages.push(message);
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

fn title_from(content: &str) -> Option<String> {
    let line = content.lines().map(str::trim).find(|line| !line.is_empty())?;
    if line.chars().count() <= TITLE_MAX_CHARS {
        return Some(line.to_string());
    }
    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
    Some(format!("{}…", cut.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_user_message_names_the_chat() {
        let mut chat = Chat::with_id("1");
        chat.push(Message::user("\n  Why is the sky blue?\nExplain briefly."));
        chat.push(Message::assistant("Rayleigh scattering."));
        chat.push(Message::user("And sunsets?"));

        assert_eq!(chat.title, "Why is the sky blue?");
        assert_eq!(chat.messages.len(), 3);
    }

    #[test]
    fn long_titles_are_cut_on_character_boundaries() {
        let mut chat = Chat::with_id("1");
        chat.push(Message::user("é".repeat(60)));
        assert_eq!(chat.title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(chat.title.ends_with('…'));
    }

    #[test]
    fn renamed_chats_keep_their_title() {
        let mut chat = Chat::with_id("1");
        chat.title = "Physics".into();
        chat.push(Message::user("Why is the sky blue?"));
        assert_eq!(chat.title, "Physics");
    }

    #[test]
    fn ids_are_millisecond_timestamps() {
        let chat = Chat::new();
        let millis: i64 = chat.id.parse().expect("numeric id");
        assert!(millis > 1_600_000_000_000);
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
    }
}
