//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific SDK calls. Retries and chunk aggregation live in
//! [`ModelAdapter`](super::adapter::ModelAdapter), not here.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use super::message::{ChatRequest, ChatResponse};
use crate::error::AgentError;

/// A fragment of a streamed tool call.
///
/// Providers stream tool calls piecewise: the first fragment for an
/// `index` carries the id and name, later ones append to `arguments`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Position of the call within the response.
    pub index: u32,
    /// Call identifier (first fragment only).
    pub id: Option<String>,
    /// Tool name (first fragment only).
    pub name: Option<String>,
    /// Argument text to append.
    pub arguments: Option<String>,
}

/// One raw increment from a streaming provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    /// Content text increment.
    pub content: Option<String>,
    /// Reasoning text increment.
    pub reasoning: Option<String>,
    /// Tool-call fragments.
    pub tool_calls: Vec<ToolCallDelta>,
}

impl StreamDelta {
    /// Delta carrying only content text.
    #[must_use]
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            ..Self::default()
        }
    }
}

/// Boxed stream of provider deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, AgentError>> + Send>>;

/// Trait for LLM provider backends.
///
/// Implementations report rate limiting as [`AgentError::RateLimited`] (or
/// an [`AgentError::ApiRequest`] with status 429) so the adapter can retry.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or parse errors.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;

    /// Executes a streaming chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on connection or streaming failures.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, AgentError>;
}
