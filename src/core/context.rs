//! Selection of the prior messages that accompany a request.
//!
//! The window is bounded by message count only; there is no token accounting
//! and nothing is summarized.

use crate::api::ChatMessage;
use crate::core::config::Config;
use crate::core::message::Message;

pub const DEFAULT_CONTEXT_LIMIT: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    limit: usize,
    system_prompt: Option<String>,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LIMIT)
    }
}

impl ContextWindow {
    /// A limit of zero would send the new message without itself; it is
    /// raised to one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            system_prompt: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let window = Self::new(config.context_limit());
        match config.system_prompt() {
            Some(prompt) => window.with_system_prompt(prompt),
            None => window,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The last `limit` messages in their original order, preceded by the
    /// system instruction when one is set. The system message does not count
    /// toward the limit.
    pub fn build(&self, messages: &[Message]) -> Vec<ChatMessage> {
        let start = messages.len().saturating_sub(self.limit);
        let mut api_messages = Vec::with_capacity(messages.len() - start + 1);

        if let Some(prompt) = &self.system_prompt {
            api_messages.push(ChatMessage::new("system", prompt.clone()));
        }

        api_messages.extend(
            messages[start..]
                .iter()
                .map(|msg| ChatMessage::new(msg.role.as_str(), msg.content.clone())),
        );
        api_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(len: usize) -> Vec<Message> {
        (0..len)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn long_conversations_keep_the_last_twenty_in_order() {
        let messages = conversation(35);
        let context = ContextWindow::default().build(&messages);

        assert_eq!(context.len(), 20);
        for (api_message, original) in context.iter().zip(&messages[15..]) {
            assert_eq!(api_message.role, original.role.as_str());
            assert_eq!(api_message.content, original.content);
        }
        assert_eq!(context.last().unwrap().content, "question 34");
    }

    #[test]
    fn short_conversations_are_sent_whole() {
        let messages = conversation(3);
        let context = ContextWindow::default().build(&messages);
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].content, "question 0");
    }

    #[test]
    fn system_prompt_is_prepended_outside_the_limit() {
        let messages = conversation(25);
        let context = ContextWindow::new(20)
            .with_system_prompt("You are terse.")
            .build(&messages);

        assert_eq!(context.len(), 21);
        assert_eq!(context[0], ChatMessage::new("system", "You are terse."));
        assert_eq!(context[1].content, "answer 5");
    }

    #[test]
    fn limit_is_configurable_and_never_zero() {
        assert_eq!(ContextWindow::new(0).limit(), 1);

        let config = Config {
            context_window: Some(4),
            system_prompt: Some("   ".into()),
            ..Config::default()
        };
        let context = ContextWindow::from_config(&config).build(&conversation(10));
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].content, "question 6");
    }
}
