use crate::core::builtin_providers::load_builtin_providers;
use crate::core::config::Config;
use crate::core::providers::env_key_name;
use crate::core::store::AppState;

pub struct ProviderRow {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub mode: &'static str,
    pub has_key: bool,
}

/// Built-in providers followed by custom ones; a custom provider with a
/// built-in id replaces it.
pub fn provider_rows(config: &Config, state: &AppState) -> Vec<ProviderRow> {
    let builtin = load_builtin_providers()
        .into_iter()
        .filter(|provider| config.get_custom_provider(&provider.id).is_none())
        .map(|provider| (provider.id, provider.display_name, provider.base_url, provider.mode));
    let custom = config.custom_providers.iter().map(|provider| {
        (
            provider.id.to_lowercase(),
            provider.display_name.clone(),
            provider.base_url.clone(),
            provider.mode,
        )
    });

    builtin
        .chain(custom)
        .map(|(id, display_name, base_url, mode)| {
            let base_url = config.base_url_override(&id).cloned().unwrap_or(base_url);
            let has_key = !mode.requires_api_key()
                || !state.api_key(&id).is_empty()
                || std::env::var(env_key_name(&id)).is_ok();
            ProviderRow {
                id,
                display_name,
                base_url,
                mode: mode.as_str(),
                has_key,
            }
        })
        .collect()
}

pub fn list_providers(config: &Config, state: &AppState) {
    println!("Providers:");
    println!();
    for row in provider_rows(config, state) {
        let active = if row.id == state.provider { "*" } else { " " };
        let auth = if row.has_key { "✅" } else { "❌" };
        println!(
            "{active} {:<12} {:<22} {:<9} {auth}  {}",
            row.id, row.display_name, row.mode, row.base_url
        );
    }
    println!();
    println!("* = active provider");
}
