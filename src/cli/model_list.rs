//! Model listing functionality

use std::error::Error;

use crate::api::models::{check_ollama_running, fetch_models, list_local_ollama_models};
use crate::core::builtin_providers::ProviderMode;
use crate::core::config::Config;
use crate::core::providers::ProviderSession;

pub async fn list_models(session: &ProviderSession, config: &Config) -> Result<(), Box<dyn Error>> {
    println!("🤖 Available Models for {}", session.provider_display_name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    if let Some(default_model) = config.get_default_model(&session.provider_id) {
        println!("🎯 Default model for this provider: {default_model} (from config)");
        println!();
    }

    let client = reqwest::Client::new();
    let models = if session.mode == ProviderMode::Ollama
        && !check_ollama_running(&client, &session.base_url).await
    {
        println!(
            "⚠️  No Ollama server answered at {}; showing locally pulled models.",
            session.base_url
        );
        println!();
        list_local_ollama_models()
            .await
            .map_err(|err| format!("Could not run `ollama list`: {err}"))?
    } else {
        fetch_models(&client, session)
            .await
            .map_err(|err| err.to_string())?
    };

    if models.is_empty() {
        println!("No models found for this provider.");
        return Ok(());
    }

    println!("Found {} models:", models.len());
    println!();
    for model in models {
        let marker = if model == session.model { " *" } else { "" };
        println!("  • {model}{marker}");
    }

    Ok(())
}
