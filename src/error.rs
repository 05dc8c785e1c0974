//! Error types for the research agent.
//!
//! [`AgentError`] covers the orchestration core (model adapter, tool
//! dispatch, configuration). [`CommandError`] is the CLI-facing wrapper.

use thiserror::Error;

/// Result alias used by the CLI layer.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors raised by the agent system.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider failure after retries were exhausted, or a non-retryable
    /// provider error. Terminates the session.
    #[error("model service error after {attempts} attempt(s): {message}")]
    ModelService {
        /// Provider error text.
        message: String,
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The provider signalled rate limiting. Retried by the model adapter.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider error text.
        message: String,
    },

    /// HTTP/API request failure reported by the provider SDK.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error text.
        message: String,
        /// HTTP status code, when known.
        status: Option<u16>,
    },

    /// Failure while reading a streamed response.
    #[error("stream error: {message}")]
    Stream {
        /// Error text.
        message: String,
    },

    /// The model requested a tool that is not registered.
    #[error("Tool '{name}' not found")]
    ToolNotFound {
        /// Requested tool name.
        name: String,
    },

    /// A tool failed while executing.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A tool exceeded its execution deadline.
    #[error("tool '{name}' timed out after {seconds}s")]
    ToolTimeout {
        /// Tool name.
        name: String,
        /// Timeout that was exceeded, in seconds.
        seconds: u64,
    },

    /// The caller cancelled the session.
    #[error("research session cancelled")]
    Cancelled,

    /// No API key was configured.
    #[error("API key missing: set OPENAI_API_KEY or DR_API_KEY")]
    ApiKeyMissing,

    /// Unknown provider name in configuration.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Configured provider name.
        name: String,
    },

    /// Invalid configuration value.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the invalid value.
        message: String,
    },
}

impl AgentError {
    /// Returns `true` if this error is a provider rate-limit signal.
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ApiRequest {
                    status: Some(429),
                    ..
                }
        )
    }
}

/// Errors surfaced by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Agent-level failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Command could not be carried out.
    #[error("command failed: {0}")]
    ExecutionFailed(String),

    /// Output could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
