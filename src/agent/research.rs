//! Entry points for running research.
//!
//! A [`Researcher`] holds the dependencies shared by all sessions and builds
//! a fresh [`ResearchSession`] for every request.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use super::adapter::ModelAdapter;
use super::client::create_provider;
use super::config::ResearchConfig;
use super::prompt::{PromptSet, build_user_query};
use super::provider::LlmProvider;
use super::session::{NoopObserver, ResearchResult, ResearchSession, new_session_id};
use super::stream::{EventEmitter, ResearchStream};
use super::tool::ToolRegistry;
use crate::error::AgentError;

/// One research request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResearchRequest {
    /// The research task.
    pub query: String,
    /// Extra caller instructions appended to the query.
    pub instructions: Option<String>,
    /// Trace token; generated when absent.
    pub session_id: Option<String>,
}

impl ResearchRequest {
    /// Request for `query` with no extra instructions.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Adds caller instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Uses the given session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Shared, immutable research dependencies.
#[derive(Debug, Clone)]
pub struct Researcher {
    adapter: Arc<ModelAdapter>,
    registry: Arc<ToolRegistry>,
    config: Arc<ResearchConfig>,
    prompts: Arc<PromptSet>,
}

impl Researcher {
    /// Creates a researcher over an explicit provider and tool set.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: ToolRegistry,
        config: ResearchConfig,
    ) -> Self {
        let adapter = ModelAdapter::new(provider)
            .with_retry(config.retry_policy())
            .with_flush_threshold(config.stream_flush_threshold);
        Self {
            adapter: Arc::new(adapter),
            registry: Arc::new(registry),
            prompts: Arc::new(PromptSet::load(config.prompt_dir.as_deref())),
            config: Arc::new(config),
        }
    }

    /// Creates a researcher with the configured provider and built-in tools.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] for unknown providers.
    pub fn from_config(config: ResearchConfig) -> Result<Self, AgentError> {
        let provider = create_provider(&config)?;
        let registry = ToolRegistry::with_defaults(&config.tools);
        Ok(Self::new(provider, registry, config))
    }

    /// Replaces the prompt set.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    /// Configuration shared by all sessions.
    #[must_use]
    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Tools available to sessions.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Builds a new session for one request.
    #[must_use]
    pub fn session(&self, session_id: Option<String>) -> ResearchSession {
        ResearchSession::new(
            Arc::clone(&self.adapter),
            Arc::clone(&self.registry),
            &self.config,
        )
        .with_prompts(&self.prompts)
        .with_session_id(session_id.unwrap_or_else(new_session_id))
    }

    /// Runs research to completion.
    pub async fn start_research(&self, request: ResearchRequest) -> ResearchResult {
        let query = build_user_query(&request.query, request.instructions.as_deref());
        let session = self.session(request.session_id);
        info!(session_id = %session.session_id(), "starting research");
        session.run(&query, &mut NoopObserver).await
    }

    /// Runs research on a background task, streaming its events.
    ///
    /// Must be called within a Tokio runtime. Dropping the returned stream
    /// cancels the session.
    #[must_use]
    pub fn stream_research(&self, request: ResearchRequest) -> ResearchStream {
        let query = build_user_query(&request.query, request.instructions.as_deref());
        let cancel = CancellationToken::new();
        let session = self
            .session(request.session_id)
            .with_cancellation(cancel.clone());
        let session_id = session.session_id().to_string();

        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let mut emitter = EventEmitter::new(tx, self.config.event_pacing, cancel.clone());

        let span = info_span!("research_stream", session_id = %session_id);
        tokio::spawn(
            async move {
                let result = session.run(&query, &mut emitter).await;
                emitter.finish(&result).await;
            }
            .instrument(span),
        );

        ResearchStream::new(session_id, rx, cancel)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::stream::StreamEvent;
    use crate::agent::testing::{EchoTool, ScriptedProvider, answer, plain, tool_call};

    use std::time::Duration;

    use futures_util::StreamExt;

    fn researcher(provider: Arc<ScriptedProvider>) -> Researcher {
        let config = ResearchConfig::builder()
            .api_key("test")
            .streaming(false)
            .reasoning(false)
            .event_pacing(Duration::ZERO)
            .build()
            .unwrap_or_else(|e| panic!("config: {e}"));
        Researcher::new(
            provider,
            ToolRegistry::new().with_tool(Arc::new(EchoTool)),
            config,
        )
        .with_prompts(PromptSet::defaults())
    }

    #[tokio::test]
    async fn test_start_research_appends_instructions() {
        let provider = Arc::new(ScriptedProvider::repeating(answer("ok")));
        let r = researcher(provider);
        let result = r
            .start_research(
                ResearchRequest::new("What is Rust?")
                    .with_instructions("Cite sources.")
                    .with_session_id("fixed"),
            )
            .await;
        assert_eq!(result.session_id, "fixed");
        assert!(
            result
                .messages
                .iter()
                .any(|m| m.content == "What is Rust?\n\nCite sources.")
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let provider = Arc::new(ScriptedProvider::repeating(answer("ok")));
        let r = researcher(provider);
        let (a, b) = tokio::join!(
            r.start_research(ResearchRequest::new("a")),
            r.start_research(ResearchRequest::new("b")),
        );
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.messages.len(), b.messages.len());
    }

    #[tokio::test]
    async fn test_stream_research_emits_messages_then_complete() {
        let mut first = plain("");
        first.tool_calls = vec![tool_call("c1", "echo", r#"{"text":"hi"}"#)];
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(first), Ok(answer("done"))]));
        let r = researcher(provider);

        let events: Vec<StreamEvent> = r
            .stream_research(ResearchRequest::new("q").with_session_id("s-stream"))
            .collect()
            .await;

        // user, assistant(tool call), tool, assistant(answer), complete
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.session_id() == "s-stream"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let StreamEvent::Complete(done) = &events[4] else {
            panic!("expected complete, got {:?}", events[4]);
        };
        assert_eq!(done.final_answer.as_deref(), Some("done"));
        assert_eq!(done.tools_used, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_session() {
        let provider = Arc::new(
            ScriptedProvider::repeating(plain("thinking")).with_delay(Duration::from_millis(10)),
        );
        let r = researcher(Arc::clone(&provider));
        let mut stream = r.stream_research(ResearchRequest::new("q"));
        let first = stream.next().await;
        assert!(matches!(first, Some(StreamEvent::Message(_))));
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let calls_after_drop = provider.calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls(), calls_after_drop);
        assert!(calls_after_drop < 50);
    }
}
