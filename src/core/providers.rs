use std::error::Error;
use std::fmt;

use crate::api::{AnthropicRequest, ChatMessage, ChatRequest, OllamaChatRequest};
use crate::core::builtin_providers::{find_builtin_provider, ProviderMode};
use crate::core::config::Config;
use crate::core::store::AppState;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

const ANTHROPIC_MAX_TOKENS: u32 = 4096;
const QUICK_FIXES: &[&str] = &[
    "mosp set provider ollama        # Use the local Ollama server",
    "mosp set api-key <key>          # Store a key for the active provider",
    "export OPENROUTER_API_KEY=...   # Use an environment variable instead",
];
const MODEL_QUICK_FIXES: &[&str] = &[
    "mosp models                     # List models for the active provider",
    "mosp set model <name>           # Pick one",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub mode: ProviderMode,
}

/// Everything needed to open a chat stream against one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSession {
    pub provider_id: String,
    pub provider_display_name: String,
    pub mode: ProviderMode,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl ProviderSession {
    /// Build the streaming chat request for this provider's dialect.
    pub fn chat_request(
        &self,
        client: &reqwest::Client,
        messages: Vec<ChatMessage>,
    ) -> reqwest::RequestBuilder {
        let chat_url = construct_api_url(&self.base_url, self.mode.chat_endpoint());
        let request = client
            .post(chat_url)
            .header("Content-Type", "application/json");
        let request = add_auth_headers(request, self.mode, &self.provider_id, &self.api_key);

        match self.mode {
            ProviderMode::Ollama => request.json(&OllamaChatRequest {
                model: self.model.clone(),
                messages,
                stream: true,
                think: is_thinking_model(&self.model).then_some(true),
            }),
            ProviderMode::OpenAi => request.json(&ChatRequest {
                model: self.model.clone(),
                messages,
                stream: true,
            }),
            ProviderMode::Anthropic => {
                let (system, messages) = split_system_messages(messages);
                request.json(&AnthropicRequest {
                    model: self.model.clone(),
                    messages,
                    system,
                    max_tokens: ANTHROPIC_MAX_TOKENS,
                    stream: true,
                })
            }
        }
    }
}

/// Reasoning models served by Ollama only emit thinking tokens when asked.
pub fn is_thinking_model(model: &str) -> bool {
    let model = model.to_lowercase();
    model.contains("r1") || model.contains("deepseek")
}

fn split_system_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let (system, rest): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|msg| msg.role == "system");
    let system = system
        .into_iter()
        .map(|msg| msg.content)
        .collect::<Vec<_>>()
        .join("\n\n");
    ((!system.is_empty()).then_some(system), rest)
}

#[derive(Debug)]
pub struct ProviderResolutionError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ProviderResolutionError {
    pub fn unknown_provider(provider: &str) -> Self {
        Self::new(
            format!(
                "❌ Unknown provider '{provider}'. Built-in providers are ollama, openrouter, openai and anthropic; others can be added under custom_providers in config.toml."
            ),
            QUICK_FIXES,
            2,
        )
    }

    pub fn missing_api_key(provider: &str) -> Self {
        Self::new(
            format!(
                "❌ No API key stored for provider '{provider}' and {} is not set.",
                env_key_name(provider)
            ),
            QUICK_FIXES,
            2,
        )
    }

    pub fn missing_model(provider: &str) -> Self {
        Self::new(
            format!("❌ No model selected for provider '{provider}'."),
            MODEL_QUICK_FIXES,
            2,
        )
    }

    fn new(
        message: impl Into<String>,
        quick_fixes: &'static [&'static str],
        exit_code: i32,
    ) -> Self {
        Self {
            message: message.into(),
            quick_fixes,
            exit_code,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ProviderResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProviderResolutionError {}

/// Environment variable consulted when no key is stored, e.g.
/// `OPENROUTER_API_KEY`.
pub fn env_key_name(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
}

/// Look a provider up among the custom providers first, then the built-ins.
pub fn find_provider_metadata(config: &Config, provider: &str) -> Option<ProviderMetadata> {
    if let Some(custom) = config.get_custom_provider(provider) {
        return Some(ProviderMetadata {
            id: custom.id.to_lowercase(),
            display_name: custom.display_name.clone(),
            base_url: custom.base_url.clone(),
            mode: custom.mode,
        });
    }

    find_builtin_provider(provider).map(|builtin| {
        let base_url = if builtin.mode == ProviderMode::Ollama {
            std::env::var("OLLAMA_BASE_URL").unwrap_or(builtin.base_url)
        } else {
            builtin.base_url
        };
        ProviderMetadata {
            id: builtin.id,
            display_name: builtin.display_name,
            base_url,
            mode: builtin.mode,
        }
    })
}

/// Resolve the provider, model, endpoint and credentials for the next
/// request.
///
/// Command-line overrides win over the saved session; the saved model is only
/// reused when it was chosen for the same provider, otherwise the configured
/// default model for that provider applies.
pub fn resolve_session(
    state: &AppState,
    config: &Config,
    provider_override: Option<&str>,
    model_override: Option<&str>,
) -> Result<ProviderSession, ProviderResolutionError> {
    let provider_override = provider_override.filter(|value| !value.is_empty());
    let provider_id = provider_override
        .unwrap_or(state.provider.as_str())
        .to_lowercase();

    let metadata = find_provider_metadata(config, &provider_id)
        .ok_or_else(|| ProviderResolutionError::unknown_provider(&provider_id))?;

    let base_url = config
        .base_url_override(&metadata.id)
        .cloned()
        .unwrap_or_else(|| metadata.base_url.clone());

    let api_key = Some(state.api_key(&metadata.id))
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .or_else(|| std::env::var(env_key_name(&metadata.id)).ok())
        .unwrap_or_default();
    if api_key.is_empty() && metadata.mode.requires_api_key() {
        return Err(ProviderResolutionError::missing_api_key(&metadata.id));
    }

    let same_provider = state.provider.eq_ignore_ascii_case(&metadata.id);
    let model = model_override
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            (same_provider && !state.model.is_empty()).then(|| state.model.clone())
        })
        .or_else(|| config.get_default_model(&metadata.id).cloned())
        .ok_or_else(|| ProviderResolutionError::missing_model(&metadata.id))?;

    Ok(ProviderSession {
        provider_id: metadata.id,
        provider_display_name: metadata.display_name,
        mode: metadata.mode,
        base_url,
        api_key,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CustomProvider;

    fn state_with(provider: &str, model: &str) -> AppState {
        AppState {
            provider: provider.to_string(),
            model: model.to_string(),
            ..AppState::default()
        }
    }

    #[test]
    fn resolves_local_ollama_without_api_key() {
        let session = resolve_session(&state_with("ollama", "llama3.2"), &Config::default(), None, None)
            .expect("ollama needs no key");

        assert_eq!(session.provider_id, "ollama");
        assert_eq!(session.mode, ProviderMode::Ollama);
        assert_eq!(session.model, "llama3.2");
        assert!(session.api_key.is_empty());
    }

    #[test]
    fn stored_key_is_used_for_remote_providers() {
        let mut state = state_with("openrouter", "deepseek/deepseek-r1");
        state
            .api_keys
            .insert("openrouter".to_string(), "sk-or-stored".to_string());

        let session = resolve_session(&state, &Config::default(), None, None).unwrap();
        assert_eq!(session.api_key, "sk-or-stored");
        assert_eq!(session.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn missing_key_for_remote_provider_is_reported() {
        let state = state_with("anthropic-proxy", "claude");
        let config = Config {
            custom_providers: vec![CustomProvider::new(
                "anthropic-proxy".into(),
                "Proxy".into(),
                "https://proxy.example/v1".into(),
                ProviderMode::Anthropic,
            )],
            ..Config::default()
        };

        let err = resolve_session(&state, &config, None, None).expect_err("key required");
        assert!(err.to_string().contains("ANTHROPIC_PROXY_API_KEY"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn saved_model_only_applies_to_its_provider() {
        let state = state_with("ollama", "llama3.2");
        let mut config = Config::default();
        config.set_default_model("workstation".into(), "qwen2.5".into());
        config.add_custom_provider(CustomProvider::new(
            "workstation".into(),
            "Workstation Ollama".into(),
            "http://workstation:11434".into(),
            ProviderMode::Ollama,
        ));

        let session = resolve_session(&state, &config, Some("workstation"), None).unwrap();
        assert_eq!(session.model, "qwen2.5");
        assert_eq!(session.base_url, "http://workstation:11434");

        let err = resolve_session(&state_with("ollama", ""), &Config::default(), None, None)
            .expect_err("no model anywhere");
        assert!(!err.quick_fixes().is_empty());
    }

    #[test]
    fn overrides_and_base_url_config_take_precedence() {
        let mut config = Config::default();
        config
            .base_urls
            .insert("ollama".into(), "http://gpu-box:11434".into());

        let session = resolve_session(
            &state_with("ollama", "llama3.2"),
            &config,
            None,
            Some("deepseek-r1:1.5b"),
        )
        .unwrap();
        assert_eq!(session.base_url, "http://gpu-box:11434");
        assert_eq!(session.model, "deepseek-r1:1.5b");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = resolve_session(&state_with("gemini", "x"), &Config::default(), None, None)
            .expect_err("unknown");
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn thinking_models_are_detected_by_name() {
        assert!(is_thinking_model("deepseek-r1:1.5b"));
        assert!(is_thinking_model("DeepSeek-Coder"));
        assert!(!is_thinking_model("llama3.2"));
    }

    #[test]
    fn anthropic_requests_lift_system_messages() {
        let (system, rest) = split_system_messages(vec![
            ChatMessage::new("system", "Be brief."),
            ChatMessage::new("user", "hi"),
        ]);
        assert_eq!(system.as_deref(), Some("Be brief."));
        assert_eq!(rest, vec![ChatMessage::new("user", "hi")]);

        let (system, rest) = split_system_messages(vec![ChatMessage::new("user", "hi")]);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }
}
