//! CLI command implementations.
//!
//! Each command writes its result to the supplied writer. Async work runs on
//! a runtime created per command.

use std::io::Write;
use std::path::Path;

use futures_util::StreamExt;

use crate::agent::config::ResearchConfig;
use crate::agent::prompt::PromptSet;
use crate::agent::research::{ResearchRequest, Researcher};
use crate::agent::stream::{ResearchResponse, StreamEvent};
use crate::agent::tool::ToolRegistry;
use crate::cli::output::{OutputFormat, format_event, format_research, format_tools};
use crate::cli::parser::{Cli, Commands};
use crate::error::{CommandError, Result};
use crate::tools::ToolsConfig;

/// Options for the research command.
#[derive(Debug, Clone, Default)]
pub struct ResearchParams<'a> {
    /// The research question.
    pub query: &'a str,
    /// Extra instructions appended to the question.
    pub instructions: Option<&'a str>,
    /// Per-session iteration ceiling override.
    pub max_iterations: Option<u32>,
    /// Model override.
    pub model: Option<&'a str>,
    /// Disable the reasoning instruction.
    pub no_reasoning: bool,
    /// Print events as they happen.
    pub stream: bool,
    /// Fixed session id.
    pub session_id: Option<&'a str>,
    /// Prompt directory override.
    pub prompt_dir: Option<&'a Path>,
}

/// Executes the parsed CLI command.
///
/// # Errors
///
/// Returns an error if configuration is invalid, output cannot be written,
/// or the research session does not succeed.
pub fn execute(cli: &Cli, out: &mut dyn Write) -> Result<()> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Research {
            query,
            instructions,
            max_iterations,
            model,
            no_reasoning,
            stream,
            session_id,
            prompt_dir,
        } => {
            let params = ResearchParams {
                query,
                instructions: instructions.as_deref(),
                max_iterations: *max_iterations,
                model: model.as_deref(),
                no_reasoning: *no_reasoning,
                stream: *stream,
                session_id: session_id.as_deref(),
                prompt_dir: prompt_dir.as_deref(),
            };
            cmd_research(&params, format, out)
        }
        Commands::Tools => cmd_tools(format, out),
        Commands::InitPrompts { dir } => cmd_init_prompts(dir.as_deref(), format, out),
        #[cfg(feature = "server")]
        Commands::Serve { host, port } => cmd_serve(host, *port),
    }
}

fn build_config(params: &ResearchParams<'_>) -> Result<ResearchConfig> {
    let mut builder = ResearchConfig::builder().from_env();
    if let Some(n) = params.max_iterations {
        builder = builder.max_iterations(n);
    }
    if let Some(model) = params.model {
        builder = builder.model(model);
    }
    if params.no_reasoning {
        builder = builder.reasoning(false);
    }
    if let Some(dir) = params.prompt_dir {
        builder = builder.prompt_dir(dir);
    }
    Ok(builder.build()?)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}"))
    })
}

fn cmd_research(
    params: &ResearchParams<'_>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let config = build_config(params)?;
    let researcher = Researcher::from_config(config)?;

    let mut request = ResearchRequest::new(params.query);
    if let Some(instructions) = params.instructions {
        request = request.with_instructions(instructions);
    }
    if let Some(id) = params.session_id {
        request = request.with_session_id(id);
    }

    let rt = runtime()?;
    let failure = if params.stream {
        rt.block_on(stream_research(&researcher, request, format, out))?
    } else {
        rt.block_on(run_research(&researcher, request, format, out))?
    };

    match failure {
        Some(error) => Err(CommandError::ExecutionFailed(format!(
            "Research failed: {error}"
        ))),
        None => Ok(()),
    }
}

/// Runs to completion and prints the result. Returns the failure, if any.
async fn run_research(
    researcher: &Researcher,
    request: ResearchRequest,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    let result = tokio::select! {
        result = researcher.start_research(request) => result,
        _ = tokio::signal::ctrl_c() => {
            return Err(CommandError::ExecutionFailed("interrupted".to_string()));
        }
    };

    let response = ResearchResponse::from(&result);
    match format {
        OutputFormat::Text => writeln!(out, "{}", format_research(&response))?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&response)?)?,
    }

    Ok(response.error.or_else(|| {
        (!response.success).then(|| "research session did not complete".to_string())
    }))
}

/// Prints events as they arrive. Returns the failure, if any.
async fn stream_research(
    researcher: &Researcher,
    request: ResearchRequest,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    let mut stream = researcher.stream_research(request);
    let mut failure = None;

    loop {
        let event = tokio::select! {
            event = stream.next() => event,
            _ = tokio::signal::ctrl_c() => {
                return Err(CommandError::ExecutionFailed("interrupted".to_string()));
            }
        };
        let Some(event) = event else { break };

        match format {
            OutputFormat::Text => writeln!(out, "{}\n", format_event(&event))?,
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(&event)?)?,
        }
        out.flush()?;

        if let StreamEvent::Error(e) = event {
            failure = Some(e.error);
        }
    }

    Ok(failure)
}

fn cmd_tools(format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let registry = ToolRegistry::with_defaults(&ToolsConfig::from_env());
    let definitions = registry.definitions();
    match format {
        OutputFormat::Text => writeln!(out, "{}", format_tools(&definitions))?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&definitions)?)?,
    }
    Ok(())
}

fn cmd_init_prompts(dir: Option<&Path>, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    let target_dir = dir
        .map(Path::to_path_buf)
        .or_else(PromptSet::default_dir)
        .ok_or_else(|| {
            CommandError::ExecutionFailed(
                "Cannot determine prompt directory; pass --dir".to_string(),
            )
        })?;

    let written = PromptSet::write_defaults(&target_dir)?;

    match format {
        OutputFormat::Text => {
            if written.is_empty() {
                writeln!(
                    out,
                    "Prompt files already exist in {}",
                    target_dir.display()
                )?;
            } else {
                for path in &written {
                    writeln!(out, "Wrote {}", path.display())?;
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::json!({
                "directory": target_dir.display().to_string(),
                "written": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        }
    }
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(host: &str, port: u16) -> Result<()> {
    let config = ResearchConfig::from_env()?;
    let researcher = Researcher::from_config(config)?;

    runtime()?
        .block_on(crate::server::serve(researcher, host, port))
        .map_err(|e| CommandError::ExecutionFailed(format!("Server error: {e:#}")))
}
