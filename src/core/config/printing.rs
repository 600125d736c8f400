use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.default_provider {
            Some(provider) => println!("  default-provider: {provider}"),
            None => println!("  default-provider: (unset)"),
        }
        println!("  context-window: {}", self.context_limit());
        match self.system_prompt() {
            Some(prompt) => println!("  system-prompt: {prompt}"),
            None => println!("  system-prompt: (unset)"),
        }
        if self.default_models.is_empty() {
            println!("  default-models: (none set)");
        } else {
            println!("  default-models:");
            let mut entries: Vec<_> = self.default_models.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (provider, model) in entries {
                println!("    {provider}: {model}");
            }
        }
        if !self.base_urls.is_empty() {
            println!("  base-urls:");
            let mut entries: Vec<_> = self.base_urls.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (provider, url) in entries {
                println!("    {provider}: {url}");
            }
        }
        for provider in &self.custom_providers {
            println!(
                "  custom-provider: {} ({}, {}) {}",
                provider.id,
                provider.display_name,
                provider.mode.as_str(),
                provider.base_url
            );
        }
    }
}
