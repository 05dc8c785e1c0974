//! Code execution in a child interpreter process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{info, warn};

use crate::agent::tool::{Tool, ToolResult};

/// Runs code with `<bin> -c <code>` under a deadline.
///
/// The child is killed when the deadline passes or the call is dropped.
#[derive(Debug, Clone)]
pub struct PythonInterpreterTool {
    bin: String,
    timeout: Duration,
}

impl PythonInterpreterTool {
    /// Creates an interpreter tool.
    #[must_use]
    pub fn new(bin: &str, timeout: Duration) -> Self {
        Self {
            bin: bin.to_string(),
            timeout,
        }
    }
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let mut output = String::new();
    if !stdout.trim().is_empty() {
        output.push_str("STDOUT:\n");
        output.push_str(stdout.trim_end());
        output.push('\n');
    }
    if !stderr.trim().is_empty() {
        output.push_str("STDERR:\n");
        output.push_str(stderr.trim_end());
        output.push('\n');
    }
    if output.is_empty() {
        "Code executed successfully (no output)".to_string()
    } else {
        output.trim_end().to_string()
    }
}

#[async_trait]
impl Tool for PythonInterpreterTool {
    fn name(&self) -> &str {
        "python_interpreter"
    }

    fn description(&self) -> &str {
        "Executes Python code in a sandboxed environment. The code must be provided within <code> and </code> tags."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to execute. Use print() to produce output."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(code) = args
            .get("code")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
        else {
            return ToolResult::failure(
                "No Python code provided. Code must be enclosed in <code> and </code> tags.",
            );
        };

        info!(bin = %self.bin, code_len = code.len(), "executing code");

        let child = Command::new(&self.bin)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(bin = %self.bin, error = %e, "failed to start interpreter");
                return ToolResult::failure(format!(
                    "Failed to start interpreter '{}': {e}",
                    self.bin
                ));
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::failure(format!("Code execution failed: {e}")),
            Err(_) => {
                return ToolResult::failure(format!(
                    "Code execution timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                output.status.to_string()
            } else {
                stderr.trim().to_string()
            };
            return ToolResult::failure(format!("Code execution failed: {detail}"));
        }

        ToolResult::ok(format_output(&stdout, &stderr)).with_metadata(json!({
            "code_length": code.len(),
            "has_stdout": !stdout.trim().is_empty(),
            "has_stderr": !stderr.trim().is_empty(),
        }))
    }
}
