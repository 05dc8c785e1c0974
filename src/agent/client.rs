//! Provider selection.
//!
//! Every backend speaks the `OpenAI` chat-completions protocol; the provider
//! name only decides the endpoint and credential defaults.

use std::sync::Arc;

use tracing::debug;

use crate::agent::config::ResearchConfig;
use crate::agent::provider::LlmProvider;
use crate::agent::providers::OpenAiProvider;
use crate::error::AgentError;

/// API root of a local Ollama server.
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Creates the configured [`LlmProvider`].
///
/// | Name | Endpoint |
/// |------|----------|
/// | `openai` | `base_url`, else the `OpenAI` API |
/// | `ollama` | `base_url`, else [`OLLAMA_DEFAULT_URL`] |
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for any other name.
pub fn create_provider(config: &ResearchConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    let base_url = match config.provider.as_str() {
        "openai" => config.base_url.as_deref(),
        "ollama" => Some(config.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL)),
        other => {
            return Err(AgentError::UnsupportedProvider {
                name: other.to_string(),
            });
        }
    };
    debug!(
        provider = %config.provider,
        base_url = base_url.unwrap_or("default"),
        model = %config.model,
        "creating provider"
    );
    Ok(Arc::new(OpenAiProvider::with_base_url(config, base_url)))
}
