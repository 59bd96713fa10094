#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Main Chancery configuration loaded from chancery.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChanceryConfig {
    /// Expression sandbox limits
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resource caps applied to every compiled expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Upper bound on script operations per evaluation
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum nested call levels
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum expression nesting depth
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum array length an expression may build
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    /// Maximum map size an expression may build
    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,

    /// Maximum string length an expression may build
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
            max_string_size: default_max_string_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub default_level: String,

    /// Console sink format
    #[serde(default)]
    pub console_output: ConsoleOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: default_log_level(),
            console_output: ConsoleOutput::default(),
        }
    }
}

/// Console output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleOutput {
    #[default]
    Text,
    Json,
}

fn default_max_operations() -> u64 {
    50_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_array_size() -> usize {
    10_000
}

fn default_max_map_size() -> usize {
    10_000
}

fn default_max_string_size() -> usize {
    65_536
}

fn default_log_level() -> String {
    "info".to_string()
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from a directory (dir/chancery.toml), falling back to
    /// defaults when the file is absent. Environment variables override
    /// file values.
    pub fn load_from_dir(dir: &Path) -> Result<ChanceryConfig, AppError> {
        let config_path = dir.join("chancery.toml");
        let config_file = Self::load_from_file(&config_path)?;

        let mut config = config_file.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load config from a specific file path; Ok(None) if it doesn't exist.
    pub fn load_from_file(path: &Path) -> Result<Option<ChanceryConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: ChanceryConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    fn apply_env_overrides(config: &mut ChanceryConfig) {
        if let Ok(level) = env::var("CHANCERY_LOG_LEVEL") {
            config.logging.default_level = level;
        }
        if let Ok(max_ops_str) = env::var("CHANCERY_SANDBOX_MAX_OPERATIONS") {
            if let Ok(max_ops) = max_ops_str.parse::<u64>() {
                config.sandbox.max_operations = max_ops;
            }
        }
    }

    /// Validate configuration values
    pub fn validate_config(config: &ChanceryConfig) -> Result<(), AppError> {
        if config.sandbox.max_operations == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "sandbox.max_operations must be >= 1".to_string(),
            ));
        }
        if config.sandbox.max_call_levels == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "sandbox.max_call_levels must be >= 1".to_string(),
            ));
        }
        if config.sandbox.max_expr_depth == 0 {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "sandbox.max_expr_depth must be >= 1".to_string(),
            ));
        }
        if config.logging.default_level.is_empty() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "logging.default_level cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
