//! Initialization
//!
//! Installs the process-wide configuration and diagnostic sink. Calling it
//! is optional: until it runs, the engine uses [`Config::default`] and
//! reports unhandled conditions through `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use recourse_core::init::InitBuilder;
//! use recourse_core::terminator::{JsonSink, TerminationMode};
//!
//! InitBuilder::new()
//!     .config_path("./recourse.toml")
//!     .max_suppressed(32)
//!     .termination_mode(TerminationMode::Exit)
//!     .sink(Arc::new(JsonSink::new(std::io::stderr())))
//!     .init()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::Config;
use crate::terminator::{DiagnosticSink, TerminationMode};

/// Global initialization state
static INIT_STATE: OnceLock<InitState> = OnceLock::new();

/// Configuration used before (or without) initialization
static DEFAULTS: OnceLock<Config> = OnceLock::new();

struct InitState {
    config: Config,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl fmt::Debug for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitState")
            .field("config", &self.config)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Options for initializing the engine
#[derive(Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Cap on suppressed conditions (overrides config file and env vars)
    pub max_suppressed: Option<usize>,

    /// Termination mode (overrides config file and env vars)
    pub termination_mode: Option<TerminationMode>,

    /// Sink receiving termination reports
    pub sink: Option<Arc<dyn DiagnosticSink>>,
}

impl fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitOptions")
            .field("config_path", &self.config_path)
            .field("max_suppressed", &self.max_suppressed)
            .field("termination_mode", &self.termination_mode)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    /// Create a new builder with default options
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn max_suppressed(mut self, cap: usize) -> Self {
        self.options.max_suppressed = Some(cap);
        self
    }

    pub fn termination_mode(mut self, mode: TerminationMode) -> Self {
        self.options.termination_mode = Some(mode);
        self
    }

    /// Set the sink for termination reports
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.options.sink = Some(sink);
        self
    }

    /// Initialize with the configured options
    pub fn init(self) -> Result<()> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the engine with the given options
///
/// Loads configuration and installs the sink. Calling this function
/// multiple times is safe - subsequent calls are no-ops.
pub fn initialize(options: InitOptions) -> Result<()> {
    if INIT_STATE.get().is_some() {
        return Ok(());
    }

    let config = Config::builder()
        .config_path(options.config_path.map(PathBuf::from))
        .max_suppressed(options.max_suppressed)
        .termination_mode(options.termination_mode)
        .build()
        .context("Failed to load configuration")?;

    debug!(?config, "initializing");

    let state = InitState {
        config,
        sink: options.sink,
    };

    // A concurrent initializer may have won the race; that is still success
    if INIT_STATE.set(state).is_err() && INIT_STATE.get().is_none() {
        return Err(anyhow!("Initialization state could not be stored"));
    }

    Ok(())
}

/// Check if the engine has been initialized
pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// The active configuration (defaults until initialized)
pub fn settings() -> &'static Config {
    match INIT_STATE.get() {
        Some(state) => &state.config,
        None => DEFAULTS.get_or_init(Config::default),
    }
}

/// The sink installed at initialization, if any
pub(crate) fn installed_sink() -> Option<Arc<dyn DiagnosticSink>> {
    INIT_STATE.get().and_then(|state| state.sink.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_before_init() {
        // Other tests never initialize, so the values must match the defaults
        let config = settings();
        assert_eq!(config.terminator.mode, TerminationMode::Unwind);
        assert_eq!(config.suppression.max_suppressed, None);
    }

    #[test]
    #[ignore] // Installs process-wide state shared by every other test
    fn test_init_is_idempotent() {
        InitBuilder::new().max_suppressed(4).init().unwrap();
        InitBuilder::new().max_suppressed(9).init().unwrap();

        assert!(is_initialized());
        assert_eq!(settings().suppression.max_suppressed, Some(4));
    }
}
