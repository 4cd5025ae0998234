//! Adapter configuration.
//!
//! Values come from a toml file (`~/.config/cobdap/config.toml` by default), command line flags
//! override them. Resolved [`Settings`] are immutable and shared between all sessions.

use crate::debugger::DebuggerOptions;
use crate::error::Error;
use crate::muted_error;
use crate::position::CommandRegistry;
use log::{debug, info};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:4711";
pub const DEFAULT_DIALECT: &str = "iscobol";

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DebuggerConfig {
    /// Debugger executable, a launch request may override it.
    pub program: Option<String>,
    /// Arguments passed before the debugged program.
    pub args: Vec<String>,
}

/// Content of the configuration file, every key is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AdapterConfig {
    pub listen: Option<String>,
    pub dialect: Option<String>,
    pub debugger: DebuggerConfig,
    pub command_timeout_ms: Option<u64>,
    pub startup_timeout_ms: Option<u64>,
    /// Fold source names to upper case before comparing them.
    pub ignore_case: bool,
    /// File with additional grammars and dialects.
    pub dialects_file: Option<PathBuf>,
}

impl AdapterConfig {
    const DEFAULT_PATH: &'static str = ".config/cobdap/config.toml";

    /// Load configuration from `path`, or from the default location if `path` is [`None`].
    ///
    /// A missing default file is not an error, default configuration is used instead.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data = match path {
            Some(path) => read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?,
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                let path = home.join(Self::DEFAULT_PATH);
                match muted_error!(read_to_string(&path), "default config not loaded:") {
                    Some(data) => {
                        debug!(target: "dap", "load config {}", path.display());
                        data
                    }
                    None => return Ok(Self::default()),
                }
            }
        };

        Self::from_toml(&data).context("parse config file")
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::de::from_str(data)?)
    }
}

/// Command line values that take precedence over the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<String>,
    pub dialect: Option<String>,
    pub debugger: Option<String>,
    pub dialects_file: Option<PathBuf>,
}

/// Resolved configuration shared by all sessions.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: String,
    pub dialect: String,
    pub debugger: DebuggerConfig,
    pub options: DebuggerOptions,
    pub ignore_case: bool,
    pub registry: Arc<CommandRegistry>,
}

impl Settings {
    /// Merge file configuration with command line overrides and load the command registry.
    ///
    /// Registry errors (invalid grammars, unknown dialect) are reported here, before any
    /// client connects.
    pub fn resolve(config: AdapterConfig, overrides: Overrides) -> Result<Self, Error> {
        let mut registry = CommandRegistry::with_builtin()?;
        if let Some(file) = overrides.dialects_file.or(config.dialects_file) {
            info!(target: "dap", "load dialects from {}", file.display());
            registry.merge_file(&file)?;
        }

        let dialect = overrides
            .dialect
            .or(config.dialect)
            .unwrap_or_else(|| DEFAULT_DIALECT.to_string());
        registry.dialect(&dialect)?;

        let mut debugger = config.debugger;
        if let Some(program) = overrides.debugger {
            debugger.program = Some(program);
        }

        let defaults = DebuggerOptions::default();
        let options = DebuggerOptions {
            command_timeout: config
                .command_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            startup_timeout: config
                .startup_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.startup_timeout),
        };

        Ok(Self {
            listen: overrides
                .listen
                .or(config.listen)
                .unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            dialect,
            debugger,
            options,
            ignore_case: config.ignore_case,
            registry: Arc::new(registry),
        })
    }
}
