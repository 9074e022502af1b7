//! Compilation step for code execution
//!
//! Runs the language's compiler inside the workspace and turns a failed
//! build into a terminal result.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::config::{Config, Language};
use crate::sandbox::{self, ProcessOutcome, ProcessOutput, RunOptions, SandboxError, Workspace};
use crate::types::{ExecutionResult, Phase};

/// Compile the workspace source
///
/// Returns `None` when the build succeeded and the run phase should follow,
/// or the terminal result when it did not. Interpreted languages always
/// return `None`.
#[instrument(skip_all, fields(language = %language.name))]
pub async fn compile(
    workspace: &Workspace,
    config: &Config,
    language: &Language,
) -> Result<Option<ExecutionResult>, SandboxError> {
    let Some(ref compile) = language.compile else {
        return Ok(None);
    };

    let command = sandbox::build(&compile.command, &compile.env, workspace, language)?;
    debug!(%command, "compiling");

    let outcome = sandbox::run(
        &command,
        RunOptions {
            cwd: workspace.root().to_path_buf(),
            stdin: None,
            timeout: Duration::from_millis(compile.timeout_ms),
            output_limit: config.limits.output_limit,
            path: config.path.clone(),
        },
    )
    .await?;

    match outcome {
        ProcessOutcome::TimedOut { elapsed } => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "compilation timed out");
            Ok(Some(ExecutionResult::Timeout {
                phase: Phase::Compile,
            }))
        }
        ProcessOutcome::Completed(output) if output.is_success() => {
            debug!(elapsed_ms = output.elapsed.as_millis() as u64, "compilation succeeded");
            Ok(None)
        }
        ProcessOutcome::Completed(output) => {
            info!(status = %output.status, "compilation failed");
            Ok(Some(ExecutionResult::CompileFailure {
                diagnostics: diagnostics(&output),
            }))
        }
    }
}

/// Compiler output, stdout first, or a status line when the compiler said nothing
fn diagnostics(output: &ProcessOutput) -> String {
    let mut text = output.stdout.to_string_lossy();
    let stderr = output.stderr.to_string_lossy();
    if !text.is_empty() && !stderr.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&stderr);

    if text.trim().is_empty() {
        format!("compiler exited with {}", output.status)
    } else {
        text
    }
}
