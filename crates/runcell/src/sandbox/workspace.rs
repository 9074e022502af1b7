//! Workspace lifecycle management
//!
//! Manages the creation, use, and removal of per-request workspace
//! directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::sandbox::SandboxError;

/// Prefix of every workspace directory name
const WORKSPACE_PREFIX: &str = "ws-";

/// Creates workspaces under a shared root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory under which workspaces are created
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, uniquely named workspace
    ///
    /// The leaf directory is created with `create_dir`, so a name collision
    /// fails instead of handing out a directory someone else owns.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn create(&self) -> Result<Workspace, SandboxError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: self.root.clone(),
                source,
            })?;

        let name = format!("{WORKSPACE_PREFIX}{}", Uuid::new_v4().simple());
        let path = self.root.join(name);

        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&path)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: path.clone(),
                source,
            })?;

        // Hand out an absolute root so templates never depend on the cwd
        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);

        debug!(workspace = %path.display(), "workspace created");

        Ok(Workspace {
            root: path,
            destroyed: false,
        })
    }
}

/// An ephemeral directory owned by exactly one execution
///
/// # Cleanup
///
/// Call [`destroy()`](Self::destroy) once the execution is finished. If the
/// workspace is dropped first (a panic, or the request future being
/// cancelled), `Drop` removes the directory synchronously instead.
#[derive(Debug)]
pub struct Workspace {
    /// Absolute path of the workspace directory
    root: PathBuf,

    /// Whether the directory has been removed
    destroyed: bool,
}

impl Workspace {
    /// Get the absolute path of the workspace directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to a file inside the workspace
    ///
    /// Returns an error if the path contains path traversal attempts.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.root.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content), fields(workspace = %self.root.display()))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Check if the workspace has already been removed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Recursively remove the workspace directory
    ///
    /// Idempotent. Failures are logged and swallowed: by the time a
    /// workspace is torn down the execution result is already decided.
    #[instrument(skip(self), fields(workspace = %self.root.display()))]
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("workspace already gone");
            }
            Err(e) => warn!(error = %e, "failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        warn!(
            workspace = %self.root.display(),
            "workspace dropped without explicit destroy, removing synchronously"
        );

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(workspace = %self.root.display(), error = %e, "best-effort removal failed");
            }
        }
    }
}
