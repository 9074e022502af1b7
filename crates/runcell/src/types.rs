use std::fmt;

use serde::{Deserialize, Serialize};

/// Request to compile (if needed) and run a snippet of source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Source code, written verbatim into the workspace
    pub source_code: String,

    /// Language ID (e.g., "cpp", "python")
    pub language_id: String,

    /// Data fed to the program's standard input during the run phase
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    pub fn new(language_id: impl Into<String>, source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            language_id: language_id.into(),
            stdin: None,
        }
    }

    /// Set the standard input for the run phase
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// One of the two ordered steps an execution may pass through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Compile => f.write_str("compile"),
            Phase::Run => f.write_str("run"),
        }
    }
}

/// Outcome of an accepted execution request
///
/// Compile and runtime failures are ordinary outcomes of running untrusted
/// code and are reported here rather than as errors. Only infrastructure
/// problems end up in [`ExecutionResult::EngineError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The run phase exited with code zero
    Success {
        /// Captured standard output, minus a single trailing newline
        stdout: String,
        /// Output hit the capture ceiling and the program was stopped
        truncated: bool,
    },

    /// The compiler exited with a non-zero status
    CompileFailure {
        /// Compiler stdout and stderr, passed through verbatim
        diagnostics: String,
    },

    /// The program exited with a non-zero status or was killed by a signal
    RuntimeFailure {
        /// Captured standard error, passed through verbatim
        diagnostics: String,
        exit_code: Option<i32>,
        signal: Option<i32>,
        truncated: bool,
    },

    /// A phase exceeded its deadline
    Timeout { phase: Phase },

    /// Workspace or process infrastructure failed
    EngineError { message: String },
}

impl ExecutionResult {
    /// Check if the program ran to a zero exit
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Short machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionResult::Success { .. } => "success",
            ExecutionResult::CompileFailure { .. } => "compile_failure",
            ExecutionResult::RuntimeFailure { .. } => "runtime_failure",
            ExecutionResult::Timeout { .. } => "timeout",
            ExecutionResult::EngineError { .. } => "engine_error",
        }
    }

    pub(crate) fn engine_error(message: impl fmt::Display) -> Self {
        ExecutionResult::EngineError {
            message: message.to_string(),
        }
    }
}

/// Size ceilings applied at the engine boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    /// Largest accepted source file in bytes
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    /// Largest accepted stdin payload in bytes
    #[serde(default = "default_max_stdin_bytes")]
    pub max_stdin_bytes: usize,

    /// Capture ceiling per output stream in bytes
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
}

impl Limits {
    /// 1 kibibyte in bytes
    pub const KIB: usize = 1024;
    /// 1 mebibyte in bytes
    pub const MIB: usize = 1024 * 1024;

    /// Largest request body the HTTP boundary needs to accept
    pub fn max_request_bytes(&self) -> usize {
        // JSON escaping can grow the payload; leave room for it and the envelope
        (self.max_source_bytes + self.max_stdin_bytes) * 2 + 16 * Self::KIB
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            max_stdin_bytes: default_max_stdin_bytes(),
            output_limit: default_output_limit(),
        }
    }
}

fn default_max_source_bytes() -> usize {
    64 * Limits::KIB
}

fn default_max_stdin_bytes() -> usize {
    Limits::MIB
}

fn default_output_limit() -> usize {
    Limits::MIB
}

/// Trim a single trailing newline (`\n` or `\r\n`)
pub(crate) fn trim_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
