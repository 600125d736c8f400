//! Authentication headers for chat requests
//!
//! Each provider mode authenticates differently:
//! - Ollama: no authentication, unless a key is configured for a proxied server
//! - Anthropic: `x-api-key` header with `anthropic-version`
//! - OpenAI-compatible: standard `Authorization: Bearer` header
//!
//! OpenRouter additionally asks clients to identify themselves through the
//! `HTTP-Referer` and `X-Title` headers.

use crate::core::builtin_providers::ProviderMode;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const APP_REFERER: &str = "https://mosp-chat.app";
const APP_TITLE: &str = "MOSP Chat";

/// Add provider-specific authentication headers to an HTTP request
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    mode: ProviderMode,
    provider_id: &str,
    api_key: &str,
) -> reqwest::RequestBuilder {
    let request = match mode {
        ProviderMode::Anthropic => request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
        ProviderMode::Ollama if api_key.is_empty() => request,
        ProviderMode::Ollama | ProviderMode::OpenAi => {
            request.header("Authorization", format!("Bearer {api_key}"))
        }
    };

    if provider_id.eq_ignore_ascii_case("openrouter") {
        request
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
    } else {
        request
    }
}
