//! A library for compiling and running untrusted code snippets.
//!
//! Runcell takes a source snippet and a language ID, writes the snippet into
//! a private throwaway workspace, compiles it if the language needs it, runs
//! it under a wall-clock deadline and reports a single classified result.
//!
//! # Features
//!
//! - **Multi-language** - Compiled and interpreted languages described in TOML.
//! - **Disposable workspaces** - One uniquely named directory per request, always removed.
//! - **Supervised processes** - Hard deadlines, bounded output, whole process groups killed.
//! - **No shell** - Command templates expand to argument vectors handed straight to the OS.
//! - **Admission control** - A fixed number of executions run at once.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use runner::{Engine, ExecutionState, RequestError, StarterTemplate};
pub use sandbox::SandboxError;
pub use types::{ExecutionRequest, ExecutionResult, Limits, Phase};

pub mod config;
pub mod runner;
pub mod sandbox;
pub mod types;
