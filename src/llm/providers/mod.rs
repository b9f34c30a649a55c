//! LLM provider implementations.
//!
//! `build(config, api_key)` is the factory, called at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::credentials::LlmApiKey;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` from config and an optional API key.
///
/// `api_key` is sourced from the environment (never the config file).
/// OpenAI proper refuses to start without one; `openai-compatible` allows
/// keyless local servers.
pub fn build(config: &LlmConfig, api_key: Option<LlmApiKey>) -> Result<LlmProvider, ProviderError> {
    let key = api_key.map(|k| k.expose().to_string());
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "openai" | "deepseek" | "openai-compatible" => {
            if key.is_none() && config.provider != "openai-compatible" {
                return Err(ProviderError::MissingApiKey(config.provider.clone()));
            }
            let ep = config.active_endpoint();
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                ep.api_base_url.clone(),
                ep.model.clone(),
                ep.temperature,
                ep.timeout_seconds,
                ep.max_tokens,
                key,
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
