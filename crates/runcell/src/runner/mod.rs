//! Execution orchestrator for Runcell
//!
//! Validates a request, acquires a workspace, drives the compile and run
//! phases and tears the workspace down again.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::config::{Config, Language};
use crate::sandbox::{SandboxError, Workspace, WorkspaceManager};
use crate::types::{ExecutionRequest, ExecutionResult};

mod compile;
mod execute;

/// Reasons a request is turned away before any resource is allocated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
}

/// Stages an execution moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Validating,
    WorkspaceReady,
    Compiling,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Validating => "validating",
            ExecutionState::WorkspaceReady => "workspace_ready",
            ExecutionState::Compiling => "compiling",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of a single execution
#[derive(Debug)]
struct StateTrace {
    current: ExecutionState,
}

impl StateTrace {
    fn new() -> Self {
        Self {
            current: ExecutionState::Validating,
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug!(from = %self.current, to = %next, "execution state");
        self.current = next;
    }

    fn finish(&mut self, result: &ExecutionResult) {
        if result.is_success() {
            self.advance(ExecutionState::Completed);
        } else {
            self.advance(ExecutionState::Failed);
        }
    }
}

/// Starter snippet and language listing for editors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarterTemplate {
    pub language_id: String,
    pub template: String,
    pub supported_languages: Vec<String>,
}

/// Runs execution requests against a fixed language configuration
///
/// Cloning is cheap; clones share the configuration and the admission gate.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<Config>,
    workspaces: WorkspaceManager,
    permits: Arc<Semaphore>,
}

impl Engine {
    /// Create a new engine with the given configuration
    pub fn new(config: Config) -> Self {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config: Arc::new(config),
            workspaces,
            permits,
        }
    }

    /// Create a new engine with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of executions that could start right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Starter snippet for a language, plus every supported language ID
    pub fn template(&self, language_id: &str) -> Result<StarterTemplate, RequestError> {
        let language = self
            .config
            .get_language(language_id)
            .map_err(|_| RequestError::UnsupportedLanguage(language_id.to_owned()))?;

        Ok(StarterTemplate {
            language_id: language_id.to_owned(),
            template: language.template.clone().unwrap_or_default(),
            supported_languages: self
                .config
                .language_ids()
                .into_iter()
                .map(str::to_owned)
                .collect(),
        })
    }

    /// Compile (if needed) and run a request
    ///
    /// Rejections come back as [`RequestError`] before any workspace exists.
    /// Everything after that, including infrastructure failures, is an
    /// [`ExecutionResult`], and the workspace is always removed first.
    #[instrument(skip(self, request), fields(language = %request.language_id))]
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, RequestError> {
        let mut state = StateTrace::new();
        let language = self.validate(&request).inspect_err(|e| {
            debug!(error = %e, "request rejected");
        })?;

        // Admission gate, held until the workspace is gone
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "admission gate closed");
                state.advance(ExecutionState::Failed);
                return Ok(ExecutionResult::engine_error("execution slots unavailable"));
            }
        };

        let mut workspace = match self.workspaces.create().await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "failed to create workspace");
                state.advance(ExecutionState::Failed);
                return Ok(ExecutionResult::engine_error(e));
            }
        };

        let result = match self
            .run_phases(&workspace, language, &request, &mut state)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, workspace = %workspace.root().display(), "execution infrastructure failed");
                ExecutionResult::engine_error(e)
            }
        };
        state.finish(&result);

        workspace.destroy().await;

        info!(result = result.kind(), "execution finished");
        Ok(result)
    }

    /// Check a request against the configuration without touching the host
    fn validate(&self, request: &ExecutionRequest) -> Result<&Language, RequestError> {
        if request.language_id.trim().is_empty() {
            return Err(RequestError::InvalidRequest(
                "languageId is required".to_owned(),
            ));
        }
        if request.source_code.trim().is_empty() {
            return Err(RequestError::InvalidRequest(
                "sourceCode is required".to_owned(),
            ));
        }

        let limits = &self.config.limits;
        if request.source_code.len() > limits.max_source_bytes {
            return Err(RequestError::InvalidRequest(format!(
                "sourceCode exceeds {} bytes",
                limits.max_source_bytes
            )));
        }
        if let Some(ref stdin) = request.stdin
            && stdin.len() > limits.max_stdin_bytes
        {
            return Err(RequestError::InvalidRequest(format!(
                "stdin exceeds {} bytes",
                limits.max_stdin_bytes
            )));
        }

        self.config
            .get_language(&request.language_id)
            .map_err(|_| RequestError::UnsupportedLanguage(request.language_id.clone()))
    }

    async fn run_phases(
        &self,
        workspace: &Workspace,
        language: &Language,
        request: &ExecutionRequest,
        state: &mut StateTrace,
    ) -> Result<ExecutionResult, SandboxError> {
        workspace
            .write_file(
                language.source_name.as_str(),
                request.source_code.as_bytes(),
            )
            .await?;
        state.advance(ExecutionState::WorkspaceReady);

        if language.is_compiled() {
            state.advance(ExecutionState::Compiling);
            if let Some(failure) = compile::compile(workspace, &self.config, language).await? {
                return Ok(failure);
            }
        }

        state.advance(ExecutionState::Running);
        execute::execute(
            workspace,
            &self.config,
            language,
            request.stdin.as_deref(),
        )
        .await
    }
}
