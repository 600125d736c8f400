use std::error::Error;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::api::{ModelsResponse, OllamaTagsResponse};
use crate::core::builtin_providers::ProviderMode;
use crate::core::providers::ProviderSession;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

const OLLAMA_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// List the model names a provider serves, sorted by name.
pub async fn fetch_models(
    client: &reqwest::Client,
    provider: &ProviderSession,
) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
    let models_url = construct_api_url(&provider.base_url, provider.mode.models_endpoint());
    let request = client
        .get(models_url)
        .header("Content-Type", "application/json");
    let request = add_auth_headers(
        request,
        provider.mode,
        &provider.provider_id,
        &provider.api_key,
    );

    let response = request.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("API request failed with status {status}: {error_text}").into());
    }

    let mut names: Vec<String> = match provider.mode {
        ProviderMode::Ollama => response
            .json::<OllamaTagsResponse>()
            .await?
            .models
            .into_iter()
            .map(|model| model.name)
            .collect(),
        ProviderMode::OpenAi | ProviderMode::Anthropic => response
            .json::<ModelsResponse>()
            .await?
            .data
            .into_iter()
            .map(|model| model.id)
            .collect(),
    };
    names.sort();
    names.dedup();
    debug!(provider = %provider.provider_id, count = names.len(), "models listed");
    Ok(names)
}

/// Model names from `ollama list` output: the first column of every row
/// after the header.
pub fn parse_ollama_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

/// Ask the locally installed `ollama` binary which models are pulled.
pub async fn list_local_ollama_models() -> std::io::Result<Vec<String>> {
    let output = Command::new("ollama").arg("list").output().await?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "ollama list exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_ollama_list(&String::from_utf8_lossy(&output.stdout)))
}

pub const OLLAMA_DOWNLOAD_URL: &str = "https://ollama.com/download";

async fn program_available(program: &str) -> bool {
    match Command::new(program).arg("--version").output().await {
        Ok(_) => true,
        Err(err) => {
            debug!(%err, program, "program not runnable");
            false
        }
    }
}

/// Whether an `ollama` binary can be launched from `PATH`. Says nothing
/// about whether its server is up.
pub async fn check_ollama_installed() -> bool {
    program_available("ollama").await
}

/// Whether an Ollama server answers at `base_url` within a second.
pub async fn check_ollama_running(client: &reqwest::Client, base_url: &str) -> bool {
    let url = construct_api_url(base_url, ProviderMode::Ollama.models_endpoint());
    match client.get(url).timeout(OLLAMA_PROBE_TIMEOUT).send().await {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            debug!(%err, base_url, "ollama probe failed");
            false
        }
    }
}
