//! Research orchestration core.
//!
//! A [`ResearchSession`] drives a bounded model/tool loop: each iteration
//! asks the model for the next step, dispatches any requested tools, and
//! feeds the results back until an `<answer>` appears or the budget runs
//! out. Sessions are built per request by a [`Researcher`], which owns the
//! shared provider, tool registry, and prompts.
//!
//! # Architecture
//!
//! ```text
//! ResearchRequest → Researcher::session()
//!   └── ResearchSession (Init → Reasoning ⇄ ToolDispatch → Complete)
//!       ├── ModelAdapter → LlmProvider   (retry, chunk aggregation)
//!       ├── parse                         (<answer>, <tool_call> markup)
//!       ├── ToolDispatcher → ToolRegistry (concurrent, isolated)
//!       └── SessionObserver               (EventEmitter for streaming)
//! ```

pub mod adapter;
pub mod client;
pub mod config;
pub mod executor;
pub mod message;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod research;
pub mod session;
pub mod sources;
pub mod stream;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use adapter::{ModelAdapter, RetryPolicy};
pub use client::create_provider;
pub use config::{ResearchConfig, ResearchConfigBuilder};
pub use message::{
    ChatRequest, ChatResponse, ConversationMessage, GenerationParams, Role, Source, SourceKind,
    TokenUsage,
};
pub use prompt::PromptSet;
pub use provider::{DeltaStream, LlmProvider, StreamDelta, ToolCallDelta};
pub use research::{ResearchRequest, Researcher};
pub use session::{
    NoopObserver, Phase, ResearchResult, ResearchSession, ResearchState, SessionObserver,
};
pub use stream::{ApiMessage, MessageType, ResearchResponse, ResearchStream, StreamEvent};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult};
