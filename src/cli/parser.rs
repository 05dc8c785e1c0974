//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Deep research agent.
///
/// Answers open-ended questions by letting a language model search the web,
/// read pages, and run code until it can give a sourced answer.
#[derive(Parser, Debug)]
#[command(name = "deep-research")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Research a question and print the answer.
    #[command(after_help = r#"Examples:
  deep-research research "What changed in HTTP/3?"
  deep-research research "Compare CRDT libraries" --instructions "Focus on Rust"
  deep-research research "Latest fusion records" --stream --format json
"#)]
    Research {
        /// The research question.
        query: String,

        /// Extra instructions appended to the question.
        #[arg(short, long)]
        instructions: Option<String>,

        /// Maximum model calls for this session.
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Model identifier (overrides `DR_MODEL`).
        #[arg(short, long)]
        model: Option<String>,

        /// Skip the per-turn reasoning instruction.
        #[arg(long)]
        no_reasoning: bool,

        /// Print intermediate steps as they happen.
        #[arg(long)]
        stream: bool,

        /// Session id to use instead of a generated one.
        #[arg(long)]
        session_id: Option<String>,

        /// Directory with custom prompt files.
        #[arg(long)]
        prompt_dir: Option<PathBuf>,
    },

    /// List the tools available to the model.
    Tools,

    /// Write the default prompt files for editing.
    InitPrompts {
        /// Target directory (default: ~/.config/deep-research/prompts).
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Serve the research API over HTTP.
    #[cfg(feature = "server")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on.
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
    },
}
