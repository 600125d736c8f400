//! `mosp set <key> <value>`
//!
//! Session keys (`provider`, `model`, `api-key`) live in the chat state;
//! the rest are written to config.toml.

use std::error::Error;
use std::fmt;

use crate::core::config::Config;
use crate::core::store::{ConversationStore, StatePersistence, StoreError};

pub const KEYS: &[(&str, &str)] = &[
    ("provider", "<id>"),
    ("model", "<name>"),
    ("api-key", "[provider] <key>"),
    ("default-provider", "<id>"),
    ("default-model", "<provider> <model>"),
    ("base-url", "<provider> <url>"),
    ("context-window", "<messages>"),
    ("system-prompt", "<text>"),
];

#[derive(Debug)]
pub enum SetError {
    UnknownKey(String),
    Usage {
        key: &'static str,
        usage: &'static str,
    },
    InvalidValue {
        key: &'static str,
        value: String,
    },
    Store(StoreError),
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::UnknownKey(key) => write!(f, "Unknown key: {key}"),
            SetError::Usage { key, usage } => write!(f, "Usage: mosp set {key} {usage}"),
            SetError::InvalidValue { key, value } => {
                write!(f, "Invalid value for {key}: {value}")
            }
            SetError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SetError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SetError {
    fn from(err: StoreError) -> Self {
        SetError::Store(err)
    }
}

/// Result of a successful `set`: what to tell the user, and whether the
/// config must be saved.
#[derive(Debug, PartialEq, Eq)]
pub struct SetOutcome {
    pub message: String,
    pub config_changed: bool,
}

impl SetOutcome {
    fn state(message: String) -> Self {
        Self {
            message,
            config_changed: false,
        }
    }

    fn config(message: String) -> Self {
        Self {
            message,
            config_changed: true,
        }
    }
}

fn usage(key: &'static str) -> SetError {
    let usage = KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, usage)| *usage)
        .unwrap_or("<value>");
    SetError::Usage { key, usage }
}

fn joined(key: &'static str, values: &[String]) -> Result<String, SetError> {
    let value = values.join(" ");
    if value.trim().is_empty() {
        return Err(usage(key));
    }
    Ok(value)
}

fn pair<'a>(key: &'static str, values: &'a [String]) -> Result<(&'a str, String), SetError> {
    match values {
        [first, rest @ ..] if !rest.is_empty() => Ok((first.as_str(), rest.join(" "))),
        _ => Err(usage(key)),
    }
}

pub fn apply_setting<P: StatePersistence>(
    store: &mut ConversationStore<P>,
    config: &mut Config,
    key: &str,
    values: &[String],
) -> Result<SetOutcome, SetError> {
    match key {
        "provider" => {
            let provider = joined("provider", values)?.to_lowercase();
            store.set_provider(provider.clone())?;
            if let Some(model) = config.get_default_model(&provider).cloned() {
                store.set_model(model.clone())?;
                return Ok(SetOutcome::state(format!(
                    "✅ Set provider to: {provider} (model: {model})"
                )));
            }
            Ok(SetOutcome::state(format!("✅ Set provider to: {provider}")))
        }
        "model" => {
            let model = joined("model", values)?;
            store.set_model(model.clone())?;
            Ok(SetOutcome::state(format!("✅ Set model to: {model}")))
        }
        "api-key" => {
            let (provider, api_key) = match values {
                [api_key] => (store.state().provider.clone(), api_key.clone()),
                [provider, api_key] => (provider.to_lowercase(), api_key.clone()),
                _ => return Err(usage("api-key")),
            };
            store.set_api_key(&provider, api_key)?;
            Ok(SetOutcome::state(format!("✅ Stored API key for: {provider}")))
        }
        "default-provider" => {
            let provider = joined("default-provider", values)?.to_lowercase();
            config.default_provider = Some(provider.clone());
            Ok(SetOutcome::config(format!(
                "✅ Set default-provider to: {provider}"
            )))
        }
        "default-model" => {
            let (provider, model) = pair("default-model", values)?;
            config.set_default_model(provider.to_string(), model.clone());
            Ok(SetOutcome::config(format!(
                "✅ Set default-model for provider '{provider}' to: {model}"
            )))
        }
        "base-url" => {
            let (provider, url) = pair("base-url", values)?;
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SetError::InvalidValue {
                    key: "base-url",
                    value: url,
                });
            }
            config.base_urls.insert(provider.to_lowercase(), url.clone());
            Ok(SetOutcome::config(format!(
                "✅ Set base-url for provider '{provider}' to: {url}"
            )))
        }
        "context-window" => {
            let raw = joined("context-window", values)?;
            let limit = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or(SetError::InvalidValue {
                    key: "context-window",
                    value: raw,
                })?;
            config.context_window = Some(limit);
            Ok(SetOutcome::config(format!(
                "✅ Set context-window to: {limit} messages"
            )))
        }
        "system-prompt" => {
            let prompt = joined("system-prompt", values)?;
            config.system_prompt = Some(prompt);
            Ok(SetOutcome::config("✅ Set system-prompt".to_string()))
        }
        other => Err(SetError::UnknownKey(other.to_string())),
    }
}
