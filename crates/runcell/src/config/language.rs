use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::config::ConfigError;

const INVALID_FILE_NAME_CHARS: [char; 3] = ['/', '\\', '\0'];

/// Default PATH for compiler and program processes
pub const DEFAULT_EXEC_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Default compile-phase deadline in milliseconds
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 10_000;

/// Default run-phase deadline in milliseconds
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 5_000;

/// Toolchain profile for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C++ (GCC)")
    pub name: String,

    /// File name the source is written to inside the workspace
    pub source_name: FileName,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,

    /// Starter snippet offered to editors
    #[serde(default)]
    pub template: Option<String>,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Get the compiled artifact name, if the language has a compile step
    pub fn output_name(&self) -> Option<&FileName> {
        self.compile.as_ref().map(|compile| &compile.output_name)
    }
}

/// A bare file name with no directory components
///
/// Source and artifact names come from trusted configuration, but they are
/// joined onto workspace paths, so anything that could walk out of the
/// workspace is rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(ConfigError::InvalidFileName(name.to_owned()));
        }
        let contains_invalid = name.chars().any(|c| INVALID_FILE_NAME_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileName(name.to_owned()));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileName::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file name without '/' or '\\' characters",
            )
        })
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<std::path::Path> for FileName {
    fn as_ref(&self) -> &std::path::Path {
        self.0.as_ref()
    }
}

/// An environment variable written as `NAME=value` in configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        match entry.split_once('=') {
            Some((name, value)) if !name.is_empty() && !name.contains('\0') => Ok(Self {
                name: name.to_owned(),
                value: value.to_owned(),
            }),
            _ => Err(ConfigError::Invalid(format!(
                "environment entry '{entry}' is not of the form NAME=value"
            ))),
        }
    }
}

impl Serialize for EnvVar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("{}={}", self.name, self.value))
    }
}

impl<'de> Deserialize<'de> for EnvVar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EnvVar::parse(&s).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(&s), &"an entry of the form NAME=value")
        })
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}, {workspace}
    pub command: Vec<String>,

    /// Compiled artifact name in the workspace (e.g., "main")
    #[serde(default = "default_output_name")]
    pub output_name: FileName,

    /// Environment variables to set during compilation (values may use placeholders)
    #[serde(default)]
    pub env: Vec<EnvVar>,

    /// Compile-phase deadline in milliseconds
    #[serde(default = "default_compile_timeout_ms")]
    pub timeout_ms: u64,
}

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}, {workspace}
    pub command: Vec<String>,

    /// Environment variables to set (values may use placeholders)
    #[serde(default)]
    pub env: Vec<EnvVar>,

    /// Run-phase deadline in milliseconds
    #[serde(default = "default_run_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_output_name() -> FileName {
    FileName("main".to_owned())
}

fn default_compile_timeout_ms() -> u64 {
    DEFAULT_COMPILE_TIMEOUT_MS
}

fn default_run_timeout_ms() -> u64 {
    DEFAULT_RUN_TIMEOUT_MS
}
