//! Workspace and process plumbing
//!
//! This module owns everything that touches the host: per-request workspace
//! directories, building argument vectors from language templates, and
//! supervising the compiler and program processes.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::sandbox::command::{
    BuiltCommand, CommandError, Placeholder, build, validate_template,
};
pub use crate::sandbox::process::{
    Captured, ExitStatus, ProcessOutcome, ProcessOutput, RunOptions, run,
};
pub use crate::sandbox::workspace::{Workspace, WorkspaceManager};

mod command;
mod process;
mod workspace;

/// Errors that occur while provisioning workspaces or supervising processes
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create workspace at {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    WaitFailed(#[source] std::io::Error),

    #[error("invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
