//! The research session state machine.
//!
//! ```text
//! INIT → REASONING ⇄ TOOL_DISPATCH → COMPLETE
//!            └──────────┴──────────→ CANCELLED
//! ```
//!
//! A [`ResearchSession`] is built per request from shared, immutable
//! dependencies and consumed by [`ResearchSession::run`]. The
//! [`ResearchState`] it drives is owned by that one task for its lifetime.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::adapter::ModelAdapter;
use super::config::ResearchConfig;
use super::executor::ToolDispatcher;
use super::message::{
    ChatRequest, ChatResponse, ConversationMessage, GenerationParams, Role, TokenUsage,
    assistant_message, system_message, tool_message, user_message,
};
use super::parse::{extract_final_answer, parse_tool_calls};
use super::prompt::PromptSet;
use super::tool::{ToolCall, ToolRegistry};
use crate::error::AgentError;

/// Final answer recorded when the iteration ceiling is reached.
pub const BUDGET_EXHAUSTED_ANSWER: &str =
    "Research completed due to iteration limit. Please review the gathered information.";

/// Generates a fresh session trace token.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Position of a session in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not yet initialized.
    Init,
    /// About to ask the model for the next step.
    Reasoning,
    /// About to execute the latest assistant message's tool calls.
    ToolDispatch,
    /// Finished with an answer, a budget notice, or a failure.
    Complete,
    /// Stopped by the caller before completion.
    Cancelled,
}

/// Mutable state of one research session.
///
/// Once terminal (complete or cancelled) every mutator is a no-op.
#[derive(Debug, Clone)]
pub struct ResearchState {
    session_id: String,
    messages: Vec<ConversationMessage>,
    iteration_count: u32,
    max_iterations: u32,
    tools_used: BTreeSet<String>,
    final_answer: Option<String>,
    is_complete: bool,
    phase: Phase,
    error: Option<String>,
    usage: TokenUsage,
}

impl ResearchState {
    /// Creates an empty state in [`Phase::Init`].
    #[must_use]
    pub fn new(session_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            iteration_count: 0,
            max_iterations,
            tools_used: BTreeSet::new(),
            final_answer: None,
            is_complete: false,
            phase: Phase::Init,
            error: None,
            usage: TokenUsage::default(),
        }
    }

    /// Session trace token.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Conversation log in append order.
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Model calls that returned a response.
    #[must_use]
    pub const fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Iteration ceiling fixed at session start.
    #[must_use]
    pub const fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Distinct names of tools that were found and executed.
    #[must_use]
    pub const fn tools_used(&self) -> &BTreeSet<String> {
        &self.tools_used
    }

    /// Final answer, set only on completion.
    #[must_use]
    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    /// Whether the session reached [`Phase::Complete`].
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Failure description, if the session failed or was cancelled.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Token usage summed over all model calls.
    #[must_use]
    pub const fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    /// Whether no further transitions will be applied.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Complete | Phase::Cancelled)
    }

    /// Total tool calls issued so far; used to number textual calls.
    fn issued_tool_calls(&self) -> usize {
        self.messages.iter().map(|m| m.tool_calls.len()).sum()
    }

    /// Tool calls of the latest message, if it is an assistant message.
    fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default()
    }

    fn set_phase(&mut self, phase: Phase) {
        if !self.is_terminal() {
            self.phase = phase;
        }
    }

    fn push(&mut self, message: ConversationMessage) {
        if !self.is_terminal() {
            self.messages.push(message);
        }
    }

    /// Counts one model call. Refuses once the ceiling is reached.
    fn begin_iteration(&mut self) -> bool {
        if self.is_terminal() || self.iteration_count >= self.max_iterations {
            return false;
        }
        self.iteration_count += 1;
        true
    }

    const fn record_usage(&mut self, usage: &TokenUsage) {
        self.usage.accumulate(usage);
    }

    fn record_tool(&mut self, name: &str) {
        if !self.is_terminal() {
            self.tools_used.insert(name.to_string());
        }
    }

    /// Moves to [`Phase::Complete`]. Returns `false` if already terminal.
    fn complete(&mut self, final_answer: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.final_answer = final_answer;
        self.is_complete = true;
        self.phase = Phase::Complete;
        true
    }

    fn fail(&mut self, err: &AgentError) {
        let message = err.to_string();
        if self.complete(Some(format!("Research failed due to error: {message}"))) {
            self.error = Some(message);
        }
    }

    fn cancel(&mut self) {
        if !self.is_terminal() {
            self.phase = Phase::Cancelled;
            self.error = Some(AgentError::Cancelled.to_string());
        }
    }
}

/// Outcome of a research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    /// Completed without a model failure or cancellation.
    pub success: bool,
    /// Final answer, budget notice, or failure description.
    pub final_answer: Option<String>,
    /// Full conversation log.
    pub messages: Vec<ConversationMessage>,
    /// Distinct tool names used, sorted.
    pub tools_used: Vec<String>,
    /// Model calls that returned a response.
    pub iterations: u32,
    /// Whether the session reached completion.
    pub is_complete: bool,
    /// Failure description.
    pub error: Option<String>,
    /// Session trace token.
    pub session_id: String,
}

impl From<ResearchState> for ResearchResult {
    fn from(state: ResearchState) -> Self {
        Self {
            success: state.is_complete && state.error.is_none(),
            final_answer: state.final_answer,
            messages: state.messages,
            tools_used: state.tools_used.into_iter().collect(),
            iterations: state.iteration_count,
            is_complete: state.is_complete,
            error: state.error,
            session_id: state.session_id,
        }
    }
}

/// Passive tap on session transitions.
///
/// Called once per message appended to the log after initialization, in log
/// order. Observers cannot influence control flow.
#[async_trait]
pub trait SessionObserver: Send {
    /// A message was appended to the log.
    async fn on_message(&mut self, session_id: &str, message: &ConversationMessage);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl SessionObserver for NoopObserver {
    async fn on_message(&mut self, _session_id: &str, _message: &ConversationMessage) {}
}

/// One research request, ready to run.
pub struct ResearchSession {
    session_id: String,
    adapter: Arc<ModelAdapter>,
    dispatcher: ToolDispatcher,
    model: String,
    params: GenerationParams,
    max_iterations: u32,
    streaming: bool,
    system_prompt: String,
    reasoning_prompt: Option<String>,
    history: Vec<ConversationMessage>,
    cancel: CancellationToken,
}

impl ResearchSession {
    /// Creates a session with default prompts and a fresh session id.
    #[must_use]
    pub fn new(
        adapter: Arc<ModelAdapter>,
        registry: Arc<ToolRegistry>,
        config: &ResearchConfig,
    ) -> Self {
        let prompts = PromptSet::defaults();
        let system_prompt =
            prompts.render_system_prompt(&registry.definitions(), chrono::Local::now().date_naive());
        Self {
            session_id: new_session_id(),
            adapter,
            dispatcher: ToolDispatcher::new(registry, config.tool_timeout),
            model: config.model.clone(),
            params: config.generation_params(),
            max_iterations: config.max_iterations,
            streaming: config.streaming,
            system_prompt,
            reasoning_prompt: config.reasoning.then_some(prompts.reasoning),
            history: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses the given session id instead of a generated one.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Uses the given prompt set.
    #[must_use]
    pub fn with_prompts(mut self, prompts: &PromptSet) -> Self {
        self.system_prompt = prompts.render_system_prompt(
            &self.dispatcher.registry().definitions(),
            chrono::Local::now().date_naive(),
        );
        if self.reasoning_prompt.is_some() {
            self.reasoning_prompt = Some(prompts.reasoning.clone());
        }
        self
    }

    /// Seeds the log with earlier messages (placed before the query).
    ///
    /// If the history contains a system message, no system prompt is injected.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Session trace token.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token that cancels this session.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the session to a terminal state.
    ///
    /// Never fails: model errors and cancellation are reported in the
    /// returned [`ResearchResult`].
    pub async fn run(mut self, query: &str, observer: &mut dyn SessionObserver) -> ResearchResult {
        let span = info_span!("research", session_id = %self.session_id);
        let history = std::mem::take(&mut self.history);

        async move {
            let mut state = ResearchState::new(self.session_id.clone(), self.max_iterations);
            self.initialize(&mut state, history, query, observer).await;

            loop {
                match state.phase() {
                    Phase::Init | Phase::Reasoning => self.reason(&mut state, observer).await,
                    Phase::ToolDispatch => self.dispatch_tools(&mut state, observer).await,
                    Phase::Complete | Phase::Cancelled => break,
                }
            }

            info!(
                iterations = state.iteration_count(),
                tools_used = state.tools_used().len(),
                total_tokens = state.usage().total_tokens,
                phase = ?state.phase(),
                "research session finished"
            );
            ResearchResult::from(state)
        }
        .instrument(span)
        .await
    }

    async fn initialize(
        &self,
        state: &mut ResearchState,
        history: Vec<ConversationMessage>,
        query: &str,
        observer: &mut dyn SessionObserver,
    ) {
        info!(max_iterations = self.max_iterations, "initializing research session");

        if !history.iter().any(|m| m.role == Role::System) {
            state.push(system_message(&self.system_prompt));
        }
        for message in history {
            state.push(message);
        }

        let query_message = user_message(query);
        state.push(query_message.clone());
        observer.on_message(state.session_id(), &query_message).await;

        state.set_phase(Phase::Reasoning);
    }

    async fn reason(&self, state: &mut ResearchState, observer: &mut dyn SessionObserver) {
        if self.cancel.is_cancelled() {
            info!("cancelled before reasoning");
            state.cancel();
            return;
        }

        if state.iteration_count() >= state.max_iterations() {
            warn!(
                max_iterations = state.max_iterations(),
                "iteration limit reached"
            );
            state.complete(Some(BUDGET_EXHAUSTED_ANSWER.to_string()));
            return;
        }

        let request = self.build_request(state);
        debug!(
            iteration = state.iteration_count() + 1,
            messages = request.messages.len(),
            "reasoning step"
        );

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            response = self.call_model(&request) => Some(response),
        };

        let response = match outcome {
            None => {
                info!("cancelled during model call");
                state.cancel();
                return;
            }
            Some(Err(e)) => {
                error!(error = %e, "model call failed");
                state.fail(&e);
                return;
            }
            Some(Ok(response)) => response,
        };

        state.begin_iteration();
        let iteration = state.iteration_count();

        let ChatResponse {
            content,
            reasoning,
            tool_calls,
            usage,
            finish_reason,
        } = response;
        state.record_usage(&usage);
        debug!(
            iteration,
            provider = self.adapter.provider_name(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            finish_reason = finish_reason.as_deref().unwrap_or("unknown"),
            "model responded"
        );

        let final_answer = extract_final_answer(&content);
        let tool_calls = if final_answer.is_some() {
            if !tool_calls.is_empty() {
                debug!(
                    iteration,
                    ignored = tool_calls.len(),
                    "final answer takes precedence over tool calls"
                );
            }
            Vec::new()
        } else if tool_calls.is_empty() {
            parse_tool_calls(&content, state.issued_tool_calls())
        } else {
            tool_calls
        };

        if content.trim().is_empty() && tool_calls.is_empty() {
            warn!(iteration, "empty model response");
            return;
        }

        let message = assistant_message(&content, tool_calls, reasoning);
        let has_tool_calls = message.has_tool_calls();
        state.push(message.clone());
        observer.on_message(state.session_id(), &message).await;

        if let Some(answer) = final_answer {
            info!(iteration, "final answer detected");
            state.complete(Some(answer));
        } else if has_tool_calls {
            state.set_phase(Phase::ToolDispatch);
        } else {
            debug!(iteration, "no answer and no tool calls, continuing");
        }
    }

    async fn dispatch_tools(&self, state: &mut ResearchState, observer: &mut dyn SessionObserver) {
        if self.cancel.is_cancelled() {
            info!("cancelled before tool dispatch");
            state.cancel();
            return;
        }

        let calls = state.pending_tool_calls();
        info!(count = calls.len(), "dispatching tool calls");

        // Dispatched calls always run to completion so their results are recorded.
        let outcomes = self.dispatcher.dispatch_all(&calls).await;

        for outcome in outcomes {
            if outcome.tool_found {
                state.record_tool(&outcome.call.name);
            }
            let message = tool_message(
                &outcome.call.id,
                &outcome.call.name,
                &outcome.message_content(),
            );
            state.push(message.clone());
            observer.on_message(state.session_id(), &message).await;
        }

        state.set_phase(Phase::Reasoning);
    }

    fn build_request(&self, state: &ResearchState) -> ChatRequest {
        let mut messages = state.messages().to_vec();
        if let Some(prompt) = &self.reasoning_prompt {
            messages.push(user_message(prompt));
        }
        ChatRequest {
            model: self.model.clone(),
            messages,
            params: self.params,
            stream: self.streaming,
            tools: self.dispatcher.registry().definitions(),
        }
    }

    async fn call_model(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        if self.streaming {
            self.adapter.complete_collected(request).await
        } else {
            self.adapter.complete(request).await
        }
    }
}

impl std::fmt::Debug for ResearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchSession")
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("max_iterations", &self.max_iterations)
            .field("streaming", &self.streaming)
            .field("tools", &self.dispatcher.registry().names())
            .finish_non_exhaustive()
    }
}
