//! CLI layer for the research agent.
//!
//! Provides the command-line interface using clap, with commands for
//! running research, listing tools, and serving the HTTP API.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
