use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_COMPILE_TIMEOUT_MS, DEFAULT_EXEC_PATH, DEFAULT_RUN_TIMEOUT_MS, EnvVar,
    FileName, Language, RunConfig,
};
use crate::types::Limits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../runcell.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Runcell
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-request workspaces are created.
    ///
    /// Defaults to `runcell` inside the system temp directory.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Maximum number of executions allowed to run at the same time.
    ///
    /// Further requests wait for a free slot before a workspace is created.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// PATH handed to compiler and program processes
    #[serde(default = "default_exec_path")]
    pub path: String,

    /// Size ceilings for source, stdin and captured output
    #[serde(default)]
    pub limits: Limits,

    /// HTTP service settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

/// Settings for the HTTP boundary
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            max_concurrent: default_max_concurrent(),
            path: default_exec_path(),
            limits: Limits::default(),
            server: ServerConfig::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Sorted list of configured language IDs
    pub fn language_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("runcell")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_exec_path() -> String {
    DEFAULT_EXEC_PATH.to_owned()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_owned()
}
