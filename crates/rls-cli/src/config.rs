//! Configuration for the `rls` tool
//!
//! Loads configuration from:
//! 1. config.yaml - schema directory, principal attributes, logging
//! 2. .env file - local overrides
//!
//! Environment variables always override config.yaml values.

use std::path::{Path, PathBuf};

use rls_compiler::{PolicyCompiler, TemplateResolver, DEFAULT_ATTRIBUTES};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

/// Where entity schemas live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub directory: PathBuf,

    /// Seconds between reload polls in `watch`
    pub poll_interval_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./schemas"),
            poll_interval_secs: 5,
        }
    }
}

/// Principal attributes that `{{user.<attr>}}` templates may reference
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrincipalConfig {
    pub attributes: Vec<String>,
}

impl Default for PrincipalConfig {
    fn default() -> Self {
        Self {
            attributes: DEFAULT_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Attach an evaluation trace to every decision
    pub trace: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: console (stderr), file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schemas: SchemaConfig,
    pub principal: PrincipalConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file means built-in defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigFileError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigFileError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RLS_SCHEMA_DIR") {
            self.schemas.directory = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("RLS_POLL_INTERVAL_SECS") {
            self.schemas.poll_interval_secs =
                secs.parse().map_err(|_| ConfigFileError::InvalidEnvVar {
                    name: "RLS_POLL_INTERVAL_SECS".to_string(),
                    value: secs.clone(),
                })?;
        }
        if let Some(attributes) = lookup("RLS_PRINCIPAL_ATTRIBUTES") {
            self.principal.attributes = attributes
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(trace) = lookup("RLS_TRACE") {
            self.evaluation.trace = match trace.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigFileError::InvalidEnvVar {
                        name: "RLS_TRACE".to_string(),
                        value: trace,
                    })
                }
            };
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Compiler that accepts exactly the configured principal attributes
    pub fn compiler(&self) -> PolicyCompiler {
        PolicyCompiler::new(TemplateResolver::new(
            self.principal.attributes.iter().cloned(),
        ))
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}
