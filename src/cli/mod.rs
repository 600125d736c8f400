//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod model_list;
pub mod provider_list;
pub mod say;
pub mod settings;

use std::error::Error;

use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;

use crate::api::models::{check_ollama_installed, check_ollama_running, OLLAMA_DOWNLOAD_URL};
use crate::cli::chat::run_chat;
use crate::cli::model_list::list_models;
use crate::cli::provider_list::list_providers;
use crate::cli::say::run_say;
use crate::cli::settings::{apply_setting, KEYS};
use crate::core::builtin_providers::ProviderMode;
use crate::core::config::{path_display, Config};
use crate::core::context::ContextWindow;
use crate::core::providers::{
    find_provider_metadata, resolve_session, ProviderResolutionError, ProviderSession,
};
use crate::core::session::SessionSettings;
use crate::core::store::{ConversationStore, JsonFileStore, StatePersistence};
use crate::utils::logging::init_tracing;

const UNSELECTED_MODEL: &str = "(none)";

#[derive(Parser)]
#[command(name = "mosp")]
#[command(version)]
#[command(about = "Chat with local and hosted language models from the terminal")]
#[command(
    long_about = "mosp streams answers from Ollama, OpenRouter, OpenAI and Anthropic \
into a line-based chat that remembers every conversation.\n\n\
Environment Variables:\n\
  OLLAMA_BASE_URL       Where the local Ollama server listens (default http://localhost:11434)\n\
  OPENROUTER_API_KEY    Used when no key is stored with `mosp set api-key`\n\
  OPENAI_API_KEY        Same, for OpenAI\n\
  ANTHROPIC_API_KEY     Same, for Anthropic\n\
  MOSP_LOG              Log filter, e.g. `debug` (logs go to stderr)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Provider to use for this run
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Model to use for this run
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Increase log output (-v, -vv)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send a single prompt and print the answer
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List models offered by the active provider
    Models,
    /// List known providers
    Providers,
    /// Set a session or configuration value
    Set {
        /// Key to set (provider, model, api-key, default-provider, default-model, base-url, context-window, system-prompt)
        key: String,
        /// Value(s) for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Show the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn open_store(config: &Config) -> Result<ConversationStore<JsonFileStore>, Box<dyn Error>> {
    let path = config.state_path()?;
    debug!(path = %path.display(), "opening chat state");
    Ok(ConversationStore::open(JsonFileStore::new(path))?)
}

/// Seed a fresh state from the configured defaults the first time the app
/// runs.
async fn complete_first_run<P: StatePersistence>(
    store: &mut ConversationStore<P>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    if store.state().has_completed_setup {
        return Ok(());
    }

    seed_from_config(store, config)?;

    if let Some(metadata) = find_provider_metadata(config, &store.state().provider) {
        if metadata.mode == ProviderMode::Ollama {
            let base_url = config
                .base_url_override(&metadata.id)
                .cloned()
                .unwrap_or(metadata.base_url);
            if !check_ollama_running(&reqwest::Client::new(), &base_url).await {
                let installed = check_ollama_installed().await;
                for line in ollama_hint(installed, &base_url) {
                    eprintln!("{line}");
                }
            }
        }
    }

    store.complete_setup()?;
    Ok(())
}

/// First-run advice when no Ollama server answers.
fn ollama_hint(installed: bool, base_url: &str) -> Vec<String> {
    let mut lines = if installed {
        vec![
            format!("⚠️  No Ollama server is answering at {base_url}."),
            "   Start it with `ollama serve`, or pick a hosted provider:".to_string(),
        ]
    } else {
        vec![
            "⚠️  Ollama does not appear to be installed.".to_string(),
            format!("   Download it from {OLLAMA_DOWNLOAD_URL}, or pick a hosted provider:"),
        ]
    };
    lines.push("   mosp set provider openrouter && mosp set api-key <key>".to_string());
    lines
}

fn seed_from_config<P: StatePersistence>(
    store: &mut ConversationStore<P>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    if let Some(provider) = &config.default_provider {
        store.set_provider(provider.clone())?;
    }
    if store.state().model.is_empty() {
        let provider = store.state().provider.clone();
        if let Some(model) = config.get_default_model(&provider) {
            store.set_model(model.clone())?;
        }
    }
    Ok(())
}

fn report_and_exit(err: ProviderResolutionError) -> ! {
    eprintln!("{err}");
    let fixes = err.quick_fixes();
    if !fixes.is_empty() {
        eprintln!();
        eprintln!("💡 Quick fixes:");
        for fix in fixes {
            eprintln!("  • {fix}");
        }
    }
    std::process::exit(err.exit_code());
}

fn resolve_or_exit<P: StatePersistence>(
    store: &ConversationStore<P>,
    config: &Config,
    args: &Args,
) -> ProviderSession {
    resolve_session(
        store.state(),
        config,
        args.provider.as_deref(),
        args.model.as_deref(),
    )
    .unwrap_or_else(|err| report_and_exit(err))
}

async fn async_main(mut args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    let mut store = open_store(&config)?;
    complete_first_run(&mut store, &config).await?;

    match args.command.take().unwrap_or(Commands::Chat) {
        Commands::Set { key, value } => {
            match apply_setting(&mut store, &mut config, &key, &value) {
                Ok(outcome) => {
                    if outcome.config_changed {
                        config.save()?;
                    }
                    println!("{}", outcome.message);
                }
                Err(err) => {
                    eprintln!("❌ {err}");
                    eprintln!();
                    eprintln!("Keys:");
                    for (name, usage) in KEYS {
                        eprintln!("  mosp set {name} {usage}");
                    }
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        Commands::Config => {
            config.print_all();
            println!("  state-file: {}", path_display(config.state_path()?));
            Ok(())
        }
        Commands::Providers => {
            list_providers(&config, store.state());
            Ok(())
        }
        Commands::Models => {
            // Listing works before any model has been chosen.
            let session = resolve_session(
                store.state(),
                &config,
                args.provider.as_deref(),
                args.model.as_deref(),
            )
            .or_else(|_| {
                resolve_session(
                    store.state(),
                    &config,
                    args.provider.as_deref(),
                    Some(UNSELECTED_MODEL),
                )
            })
            .unwrap_or_else(|err| report_and_exit(err));
            list_models(&session, &config).await
        }
        Commands::Say { prompt } => {
            let session = resolve_or_exit(&store, &config, &args);
            run_say(prompt, session, ContextWindow::from_config(&config)).await
        }
        Commands::Chat => {
            let session = resolve_or_exit(&store, &config, &args);
            let settings = SessionSettings::new(session, ContextWindow::from_config(&config));
            run_chat(store, settings).await
        }
    }
}
