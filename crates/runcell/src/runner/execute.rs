//! Execution step for code running
//!
//! Runs the compiled or interpreted program with the request's stdin and
//! classifies how it ended.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::config::{Config, Language};
use crate::sandbox::{self, ProcessOutcome, ProcessOutput, RunOptions, SandboxError, Workspace};
use crate::types::{ExecutionResult, Phase, trim_trailing_newline};

/// Run the program in the workspace
#[instrument(skip_all, fields(language = %language.name))]
pub async fn execute(
    workspace: &Workspace,
    config: &Config,
    language: &Language,
    stdin: Option<&str>,
) -> Result<ExecutionResult, SandboxError> {
    let command = sandbox::build(&language.run.command, &language.run.env, workspace, language)?;
    debug!(%command, "running");

    let outcome = sandbox::run(
        &command,
        RunOptions {
            cwd: workspace.root().to_path_buf(),
            stdin: stdin.map(|s| s.as_bytes().to_vec()),
            timeout: Duration::from_millis(language.run.timeout_ms),
            output_limit: config.limits.output_limit,
            path: config.path.clone(),
        },
    )
    .await?;

    let result = match outcome {
        ProcessOutcome::TimedOut { elapsed } => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "program timed out");
            ExecutionResult::Timeout { phase: Phase::Run }
        }
        ProcessOutcome::Completed(output) => classify(output),
    };
    Ok(result)
}

/// Map a finished program onto a result
///
/// A program killed for flooding stdout still reports the prefix it wrote.
/// Any other run is judged by its exit status.
fn classify(output: ProcessOutput) -> ExecutionResult {
    if output.stopped_for_output && output.stdout.truncated {
        info!(limit = output.stdout.bytes.len(), "stdout truncated");
        return ExecutionResult::Success {
            stdout: trim_trailing_newline(output.stdout.to_string_lossy()),
            truncated: true,
        };
    }

    if output.status.success() && !output.stderr.truncated {
        return ExecutionResult::Success {
            stdout: trim_trailing_newline(output.stdout.to_string_lossy()),
            truncated: output.stdout.truncated,
        };
    }

    debug!(status = %output.status, "program failed");
    let stderr = output.stderr.to_string_lossy();
    let diagnostics = if stderr.trim().is_empty() {
        format!("program exited with {}", output.status)
    } else {
        stderr
    };

    ExecutionResult::RuntimeFailure {
        diagnostics,
        exit_code: output.status.code(),
        signal: output.status.signal(),
        truncated: output.stderr.truncated,
    }
}
