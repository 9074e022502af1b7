//! Configuration file loading for Runcell
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};
use crate::sandbox::validate_template;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Every command template is expanded against dummy paths here, so a bad
    /// placeholder is a load error rather than a per-request failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_owned(),
            ));
        }
        if self.limits.output_limit == 0 {
            return Err(ConfigError::Invalid(
                "limits.output_limit must be at least 1".to_owned(),
            ));
        }

        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if lang.run.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has zero run timeout"
                )));
            }
            validate_template(&lang.run.command, &lang.run.env, lang.is_compiled()).map_err(
                |e| ConfigError::Invalid(format!("language '{id}' run command: {e}")),
            )?;

            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if compile.timeout_ms == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has zero compile timeout"
                    )));
                }
                if compile.output_name == lang.source_name {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' compiles '{}' onto itself",
                        lang.source_name
                    )));
                }
                validate_template(&compile.command, &compile.env, true).map_err(|e| {
                    ConfigError::Invalid(format!("language '{id}' compile command: {e}"))
                })?;
            }
        }

        Ok(())
    }
}
