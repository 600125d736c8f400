use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::builtin_providers::ProviderMode;

/// A user-defined endpoint speaking one of the built-in dialects, e.g. an
/// LM Studio server (`openai`) or an Ollama instance on another host.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CustomProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    #[serde(default)]
    pub mode: ProviderMode,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Provider used when neither the command line nor the saved session names one
    pub default_provider: Option<String>,
    /// Model per provider, used when the saved session has no model for it
    #[serde(default)]
    pub default_models: HashMap<String, String>,
    #[serde(default)]
    pub custom_providers: Vec<CustomProvider>,
    /// Base URL overrides keyed by provider id
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
    /// Number of prior messages sent with each request
    pub context_window: Option<usize>,
    /// System instruction prepended to every request
    pub system_prompt: Option<String>,
    /// Location of the persisted chat state; defaults to the platform data dir
    pub state_file: Option<PathBuf>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.local/share/mosp/chat-app-storage.json` → `~/.local/share/mosp/chat-app-storage.json`
/// - Windows: paths are displayed unchanged
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn add_custom_provider(&mut self, provider: CustomProvider) {
        self.remove_custom_provider(&provider.id);
        self.custom_providers.push(provider);
    }

    pub fn remove_custom_provider(&mut self, id: &str) {
        self.custom_providers
            .retain(|p| !p.id.eq_ignore_ascii_case(id));
    }

    pub fn get_custom_provider(&self, id: &str) -> Option<&CustomProvider> {
        self.custom_providers
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(id))
    }

    pub fn base_url_override(&self, provider: &str) -> Option<&String> {
        self.base_urls.get(&provider.to_lowercase())
    }
}

impl CustomProvider {
    pub fn new(id: String, display_name: String, base_url: String, mode: ProviderMode) -> Self {
        Self {
            id,
            display_name,
            base_url,
            mode,
        }
    }
}
