//! Configuration
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `recourse.toml` in the working directory, or the file named by
//!    `RECOURSE_CONFIG_PATH` / [`ConfigBuilder::config_path`]
//! 3. Environment variables such as `RECOURSE__SUPPRESSION__MAX_SUPPRESSED=16`
//! 4. Explicit builder overrides
//!
//! A `.env` file is loaded (if present) before the environment is read.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::terminator::TerminationMode;

/// Default config file name (searched in the working directory)
pub const DEFAULT_CONFIG_FILE: &str = "recourse.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "RECOURSE_CONFIG_PATH";

/// Prefix of environment overrides (`RECOURSE__SECTION__KEY`)
pub const ENV_PREFIX: &str = "RECOURSE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub suppression: SuppressionConfig,
    pub terminator: TerminatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    /// Cap on suppressed conditions per primary; unbounded when absent
    pub max_suppressed: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminatorConfig {
    pub mode: TerminationMode,
    /// Process exit code used in `exit` mode
    pub exit_code: i32,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            mode: TerminationMode::Unwind,
            exit_code: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default layers without overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.terminator.mode == TerminationMode::Exit && self.terminator.exit_code == 0 {
            return Err(ConfigError::Invalid(
                "terminator.exit_code must be non-zero in exit mode".to_string(),
            ));
        }
        if !(0..=255).contains(&self.terminator.exit_code) {
            return Err(ConfigError::Invalid(format!(
                "terminator.exit_code {} is outside 0..=255",
                self.terminator.exit_code
            )));
        }
        Ok(())
    }
}

/// Builder for [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    max_suppressed: Option<usize>,
    termination_mode: Option<TerminationMode>,
    skip_environment: bool,
}

impl ConfigBuilder {
    /// Set the config file path (overrides default search)
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn max_suppressed(mut self, cap: Option<usize>) -> Self {
        self.max_suppressed = cap;
        self
    }

    pub fn termination_mode(mut self, mode: Option<TerminationMode>) -> Self {
        self.termination_mode = mode;
        self
    }

    /// Ignore `.env`, `RECOURSE_CONFIG_PATH` and `RECOURSE__*` variables
    pub fn skip_environment(mut self, skip: bool) -> Self {
        self.skip_environment = skip;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_environment {
            dotenvy::dotenv().ok();
        }

        let explicit_path = self.config_path.clone().or_else(|| {
            if self.skip_environment {
                None
            } else {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            }
        });

        let mut builder = config::Config::builder();

        builder = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path));
                }
                builder.add_source(config::File::from(path.as_path()))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        if !self.skip_environment {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Config = builder.build()?.try_deserialize()?;

        if let Some(cap) = self.max_suppressed {
            config.suppression.max_suppressed = Some(cap);
        }
        if let Some(mode) = self.termination_mode {
            config.terminator.mode = mode;
        }

        config.validate()?;
        Ok(config)
    }
}
