//! Deep research agent.
//!
//! Runs a bounded conversation loop against a language model: the model
//! either answers, or asks for tools (web search, page fetch, scholarly
//! search, code execution, file lookup) whose results are fed back until a
//! final answer appears or the iteration budget runs out. Intermediate steps
//! can be streamed to a caller as ordered events.
//!
//! # Architecture
//!
//! ```text
//! caller → Researcher (per-request ResearchSession)
//!   ├── ModelAdapter (retry/backoff, stream chunk aggregation)
//!   │   └── LlmProvider (OpenAI-compatible)
//!   ├── ToolDispatcher → ToolRegistry → dyn Tool
//!   └── EventEmitter (passive tap) → StreamEvent channel → caller
//! ```

pub mod agent;
pub mod cli;
pub mod error;
#[cfg(feature = "server")]
pub mod server;
pub mod tools;

pub use agent::{
    ConversationMessage, ResearchConfig, ResearchResult, ResearchSession, Researcher, Role,
    StreamEvent,
};
pub use error::{AgentError, CommandError, Result};
