//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryConfig {
    /// Send identical scan queries to the backend only once
    #[serde(default = "default_dedup_scan_queries")]
    pub dedup_scan_queries: bool,

    /// Reject queries needing more scans than this (0 = unlimited)
    #[serde(default)]
    pub max_scan_queries: usize,

    /// Group value for series missing a grouped label, unless the query sets one
    #[serde(default)]
    pub group_empty: String,
}

fn default_dedup_scan_queries() -> bool {
    true
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            dedup_scan_queries: default_dedup_scan_queries(),
            max_scan_queries: 0,
            group_empty: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tally").join("config.toml")),
            Some(PathBuf::from("/etc/tally/config.toml")),
            Some(PathBuf::from("./tally.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Query overrides
        if let Some(dedup) = var("TALLY_DEDUP_SCANS") {
            match dedup.parse() {
                Ok(v) => self.query.dedup_scan_queries = v,
                Err(_) => tracing::warn!("Ignoring invalid TALLY_DEDUP_SCANS: {}", dedup),
            }
        }
        if let Some(max) = var("TALLY_MAX_SCANS") {
            match max.parse() {
                Ok(v) => self.query.max_scan_queries = v,
                Err(_) => tracing::warn!("Ignoring invalid TALLY_MAX_SCANS: {}", max),
            }
        }
        if let Some(empty) = var("TALLY_GROUP_EMPTY") {
            self.query.group_empty = empty;
        }

        // Logging overrides
        if let Some(level) = var("TALLY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TALLY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tally Configuration
#
# Environment variables override these settings:
# - TALLY_DEDUP_SCANS
# - TALLY_MAX_SCANS
# - TALLY_GROUP_EMPTY
# - TALLY_LOG_LEVEL
# - TALLY_LOG_FORMAT

[query]
# Send identical scan queries to the backend only once
dedup_scan_queries = true

# Maximum scan queries per evaluation (0 = unlimited)
max_scan_queries = 0

# Group value for series that lack a grouped label
group_empty = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.query, QueryConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query]\nmax_scan_queries = 16\ngroup_empty = \"none\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.query.max_scan_queries, 16);
        assert_eq!(config.query.group_empty, "none");
        assert!(config.query.dedup_scan_queries);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_errors() {
        let err = Config::load(Path::new("/nonexistent/tally.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query\nmax_scan_queries = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TALLY_DEDUP_SCANS", "false"),
            ("TALLY_MAX_SCANS", "not-a-number"),
            ("TALLY_GROUP_EMPTY", "-"),
            ("TALLY_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert!(!config.query.dedup_scan_queries);
        assert_eq!(config.query.max_scan_queries, 0);
        assert_eq!(config.query.group_empty, "-");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }
}
