use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Ollama `api/chat` request body.
#[derive(Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
}

/// OpenAI-compatible `chat/completions` request body (OpenAI, OpenRouter).
#[derive(Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Anthropic `messages` request body. System prompts travel outside the
/// message list.
#[derive(Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    pub stream: bool,
}

/// One decoded streaming record.
///
/// Every provider's record shape deserializes into this type; absent fields
/// default so that a record only has to carry the fields its provider uses.
#[derive(Deserialize, Default)]
pub struct StreamRecord {
    /// Ollama chat: `{"message":{"content":..,"thinking":..}}`
    #[serde(default)]
    pub message: Option<RecordMessage>,
    /// Ollama generate: `{"response":..}`
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    /// OpenAI / OpenRouter deltas
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
    /// Anthropic content block deltas
    #[serde(default)]
    pub delta: Option<AnthropicDelta>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum RecordMessage {
    Delta(MessageDelta),
    // Anthropic `message_start` carries a full message object whose content
    // is an array; it has nothing to contribute to the text.
    Other(Value),
}

#[derive(Deserialize, Default)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: Option<ChatResponseDelta>,
}

#[derive(Deserialize, Default)]
pub struct AnthropicDelta {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

#[derive(Deserialize)]
pub struct ModelInfo {
    pub id: String,
}

#[derive(Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Deserialize)]
pub struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

pub mod models;
