//! Research configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use super::adapter::{DEFAULT_FLUSH_THRESHOLD, RetryPolicy};
use super::message::GenerationParams;
use crate::error::AgentError;
use crate::tools::ToolsConfig;

/// Default model identifier.
const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default model when talking to a local Ollama server.
const DEFAULT_OLLAMA_MODEL: &str = "qwen3:4b";
/// Default maximum model calls per session.
const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 0.85;
/// Default nucleus sampling probability.
const DEFAULT_TOP_P: f32 = 0.95;
/// Default completion token cap.
const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Default provider request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default attempts for rate-limited requests.
const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default backoff base delay in seconds.
const DEFAULT_RETRY_BASE_SECS: u64 = 2;
/// Default backoff jitter ceiling in seconds.
const DEFAULT_RETRY_JITTER_SECS: u64 = 1;
/// Default per-tool-call deadline in seconds.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;
/// Default pause after each emitted event, in milliseconds.
const DEFAULT_EVENT_PACING_MS: u64 = 100;
/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Configuration for research sessions.
///
/// Shared read-only across sessions; the iteration ceiling is the only
/// cross-session policy.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// LLM provider name (`openai` or `ollama`).
    pub provider: String,
    /// API key for the provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Maximum model calls per session.
    pub max_iterations: u32,
    /// Append the reasoning scratch instruction before each model call.
    pub reasoning: bool,
    /// Use the streaming completion path.
    pub streaming: bool,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling probability.
    pub top_p: Option<f32>,
    /// Completion token cap.
    pub max_tokens: Option<u32>,
    /// Presence penalty.
    pub presence_penalty: Option<f32>,
    /// Provider request timeout.
    pub timeout: Duration,
    /// Attempts for rate-limited requests, including the first.
    pub max_retries: u32,
    /// Backoff base delay.
    pub retry_base_delay: Duration,
    /// Backoff jitter ceiling.
    pub retry_max_jitter: Duration,
    /// Buffered characters that force a streamed chunk flush.
    pub stream_flush_threshold: usize,
    /// Deadline for a single tool call.
    pub tool_timeout: Duration,
    /// Pause after each emitted stream event.
    pub event_pacing: Duration,
    /// Capacity of the bounded event channel.
    pub event_buffer: usize,
    /// Directory containing prompt template files.
    ///
    /// Missing files fall back to compiled-in defaults.
    pub prompt_dir: Option<PathBuf>,
    /// Built-in tool settings.
    pub tools: ToolsConfig,
}

impl ResearchConfig {
    /// Creates a new builder for `ResearchConfig`.
    #[must_use]
    pub fn builder() -> ResearchConfigBuilder {
        ResearchConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Generation parameters passed to the provider.
    #[must_use]
    pub const fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
        }
    }

    /// Retry policy for rate-limited provider calls.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: self.retry_base_delay,
            max_jitter: self.retry_max_jitter,
        }
    }
}

/// Builder for [`ResearchConfig`].
#[derive(Debug, Clone, Default)]
pub struct ResearchConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_iterations: Option<u32>,
    reasoning: Option<bool>,
    streaming: Option<bool>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    presence_penalty: Option<f32>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_jitter: Option<Duration>,
    stream_flush_threshold: Option<usize>,
    tool_timeout: Option<Duration>,
    event_pacing: Option<Duration>,
    event_buffer: Option<usize>,
    prompt_dir: Option<PathBuf>,
    tools: Option<ToolsConfig>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

impl ResearchConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("DR_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("DR_API_KEY"))
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("DR_BASE_URL"))
                .ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("DR_MODEL").ok();
        }
        if self.max_iterations.is_none() {
            self.max_iterations = env_parse("DR_MAX_ITERATIONS");
        }
        if self.reasoning.is_none() {
            self.reasoning = env_flag("DR_REASONING");
        }
        if self.streaming.is_none() {
            self.streaming = env_flag("DR_STREAMING");
        }
        if self.temperature.is_none() {
            self.temperature = env_parse("DR_TEMPERATURE");
        }
        if self.max_tokens.is_none() {
            self.max_tokens = env_parse("DR_MAX_TOKENS");
        }
        if self.tool_timeout.is_none() {
            self.tool_timeout = env_parse("DR_TOOL_TIMEOUT_SECS").map(Duration::from_secs);
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("DR_PROMPT_DIR").ok().map(PathBuf::from);
        }
        if self.tools.is_none() {
            self.tools = Some(ToolsConfig::from_env());
        }
        self
    }

    /// Sets the LLM provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the per-session iteration ceiling.
    #[must_use]
    pub const fn max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Enables or disables the reasoning scratch instruction.
    #[must_use]
    pub const fn reasoning(mut self, enabled: bool) -> Self {
        self.reasoning = Some(enabled);
        self
    }

    /// Selects the streaming or one-shot completion path.
    #[must_use]
    pub const fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = Some(enabled);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the nucleus sampling probability.
    #[must_use]
    pub const fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    /// Sets the completion token cap.
    #[must_use]
    pub const fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Sets the presence penalty.
    #[must_use]
    pub const fn presence_penalty(mut self, p: f32) -> Self {
        self.presence_penalty = Some(p);
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the attempt ceiling for rate-limited requests.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the backoff base delay.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Sets the backoff jitter ceiling.
    #[must_use]
    pub const fn retry_max_jitter(mut self, jitter: Duration) -> Self {
        self.retry_max_jitter = Some(jitter);
        self
    }

    /// Sets the stream flush threshold in characters.
    #[must_use]
    pub const fn stream_flush_threshold(mut self, n: usize) -> Self {
        self.stream_flush_threshold = Some(n);
        self
    }

    /// Sets the per-tool-call deadline.
    #[must_use]
    pub const fn tool_timeout(mut self, duration: Duration) -> Self {
        self.tool_timeout = Some(duration);
        self
    }

    /// Sets the pause after each emitted event.
    #[must_use]
    pub const fn event_pacing(mut self, pacing: Duration) -> Self {
        self.event_pacing = Some(pacing);
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = Some(n);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Sets the built-in tool settings.
    #[must_use]
    pub fn tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Builds the [`ResearchConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was set for a
    /// hosted provider, and [`AgentError::Config`] for a zero iteration
    /// ceiling.
    pub fn build(self) -> Result<ResearchConfig, AgentError> {
        let provider = self.provider.unwrap_or_else(|| "openai".to_string());
        let local = provider == "ollama";
        let api_key = match self.api_key {
            Some(key) => key,
            None if local => "ollama".to_string(),
            None => return Err(AgentError::ApiKeyMissing),
        };
        let default_model = if local {
            DEFAULT_OLLAMA_MODEL
        } else {
            DEFAULT_MODEL
        };

        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(AgentError::Config {
                message: "max_iterations must be at least 1".to_string(),
            });
        }

        Ok(ResearchConfig {
            provider,
            api_key,
            base_url: self.base_url,
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            max_iterations,
            reasoning: self.reasoning.unwrap_or(true),
            streaming: self.streaming.unwrap_or(true),
            temperature: self.temperature.or(Some(DEFAULT_TEMPERATURE)),
            top_p: self.top_p.or(Some(DEFAULT_TOP_P)),
            max_tokens: self.max_tokens.or(Some(DEFAULT_MAX_TOKENS)),
            presence_penalty: self.presence_penalty,
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            retry_base_delay: self
                .retry_base_delay
                .unwrap_or(Duration::from_secs(DEFAULT_RETRY_BASE_SECS)),
            retry_max_jitter: self
                .retry_max_jitter
                .unwrap_or(Duration::from_secs(DEFAULT_RETRY_JITTER_SECS)),
            stream_flush_threshold: self
                .stream_flush_threshold
                .unwrap_or(DEFAULT_FLUSH_THRESHOLD),
            tool_timeout: self
                .tool_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS)),
            event_pacing: self
                .event_pacing
                .unwrap_or(Duration::from_millis(DEFAULT_EVENT_PACING_MS)),
            event_buffer: self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER).max(1),
            prompt_dir: self.prompt_dir,
            tools: self.tools.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ResearchConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider, "openai");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.reasoning);
        assert_eq!(config.stream_flush_threshold, 50);
        assert_eq!(config.tool_timeout, Duration::from_secs(120));
        assert_eq!(config.event_pacing, Duration::from_millis(100));
    }

    #[test]
    fn test_builder_missing_api_key() {
        let result = ResearchConfig::builder().build();
        assert!(matches!(result, Err(AgentError::ApiKeyMissing)));
    }

    #[test]
    fn test_ollama_needs_no_api_key() {
        let config = ResearchConfig::builder()
            .provider("ollama")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.model, DEFAULT_OLLAMA_MODEL);
        assert!(!config.api_key.is_empty());
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_builder_rejects_zero_iterations() {
        let result = ResearchConfig::builder()
            .api_key("k")
            .max_iterations(0)
            .build();
        assert!(matches!(result, Err(AgentError::Config { .. })));
    }

    #[test]
    fn test_builder_custom_values() {
        let config = ResearchConfig::builder()
            .api_key("key")
            .provider("custom")
            .model("local-model")
            .max_iterations(3)
            .reasoning(false)
            .temperature(0.2)
            .tool_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider, "custom");
        assert_eq!(config.model, "local-model");
        assert_eq!(config.max_iterations, 3);
        assert!(!config.reasoning);
        assert_eq!(config.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.generation_params().temperature, Some(0.2));
    }

    #[test]
    fn test_generation_params_defaults_pass_through() {
        let config = ResearchConfig::builder()
            .api_key("key")
            .build()
            .unwrap_or_else(|_| unreachable!());
        let params = config.generation_params();
        assert_eq!(params.top_p, Some(DEFAULT_TOP_P));
        assert_eq!(params.max_tokens, Some(DEFAULT_MAX_TOKENS));
        assert!(params.presence_penalty.is_none());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ResearchConfig::builder()
            .api_key("key")
            .max_retries(0)
            .retry_base_delay(Duration::from_millis(10))
            .build()
            .unwrap_or_else(|_| unreachable!());
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }
}
