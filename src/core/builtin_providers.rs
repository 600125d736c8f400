//! Built-in provider configuration
//!
//! Providers shipped with the binary are described in `builtin_providers.toml`
//! and embedded at build time. The `mode` of a provider decides how requests
//! are authenticated, which endpoint receives them, and how the streamed
//! response is framed.

use serde::{Deserialize, Serialize};

use crate::core::chat_stream::StreamFraming;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Ollama,
    #[default]
    OpenAi,
    Anthropic,
}

impl ProviderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderMode::Ollama => "ollama",
            ProviderMode::OpenAi => "openai",
            ProviderMode::Anthropic => "anthropic",
        }
    }

    pub fn framing(self) -> StreamFraming {
        match self {
            ProviderMode::Ollama => StreamFraming::NewlineJson,
            ProviderMode::OpenAi | ProviderMode::Anthropic => StreamFraming::Sse,
        }
    }

    /// Path of the streaming chat endpoint, relative to the provider base URL.
    pub fn chat_endpoint(self) -> &'static str {
        match self {
            ProviderMode::Ollama => "api/chat",
            ProviderMode::OpenAi => "chat/completions",
            ProviderMode::Anthropic => "messages",
        }
    }

    pub fn models_endpoint(self) -> &'static str {
        match self {
            ProviderMode::Ollama => "api/tags",
            ProviderMode::OpenAi | ProviderMode::Anthropic => "models",
        }
    }

    /// Local Ollama servers accept unauthenticated requests.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, ProviderMode::Ollama)
    }
}

impl std::str::FromStr for ProviderMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderMode::Ollama),
            "openai" => Ok(ProviderMode::OpenAi),
            "anthropic" => Ok(ProviderMode::Anthropic),
            other => Err(format!("unknown provider mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub mode: ProviderMode,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

/// Load built-in providers from the embedded configuration
pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    const CONFIG_CONTENT: &str = include_str!("builtin_providers.toml");

    let config: BuiltinProvidersConfig =
        toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_providers.toml");

    config.providers
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<BuiltinProvider> {
    load_builtin_providers()
        .into_iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}
