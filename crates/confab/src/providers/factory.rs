use anyhow::Result;

use super::base::Provider;
use super::configs::ProviderConfig;
use super::openai::OpenAiProvider;

/// Build a provider for the given configuration.
pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider + Send + Sync>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
    }
}
