use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration or building analyzers from it
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid threshold {name}: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Missing pattern list: {0}")]
    MissingPatterns(&'static str),
}

/// Configuration for LogLens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where log files are discovered
    #[serde(default)]
    pub logs: LogsConfig,
    /// Result store
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Report output
    #[serde(default)]
    pub output: OutputConfig,
    /// Performance analyzer thresholds
    pub performance_thresholds: PerformanceThresholds,
    /// Security analyzer patterns
    pub security: SecurityConfig,
    /// Anomaly detector parameters
    #[serde(default)]
    pub anomaly_detection: AnomalyConfig,
    /// Notification delivery
    #[serde(default)]
    pub alerting: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Directory scanned for log files
    pub source_dir: PathBuf,
    /// File extension of log files, without the dot
    pub extension: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        LogsConfig {
            source_dir: PathBuf::from("logs"),
            extension: "log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("data/loglens.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "json", "jsonl", or "console"
    pub format: String,
    /// Output file path (stdout when absent)
    pub file_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            format: "console".to_string(),
            file_path: None,
        }
    }
}

/// Performance thresholds, response times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// Mean response time above which an endpoint is slow
    pub slow_endpoint_avg: f64,
    /// Batch 95th percentile above which overall latency is an issue
    pub slow_endpoint_p95: f64,
    /// Fraction of requests with status >= 400
    pub high_error_rate: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        PerformanceThresholds {
            slow_endpoint_avg: 1.0,
            slow_endpoint_p95: 2.0,
            high_error_rate: 0.05,
        }
    }
}

impl PerformanceThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("slow_endpoint_avg", self.slow_endpoint_avg),
            ("slow_endpoint_p95", self.slow_endpoint_p95),
            ("high_error_rate", self.high_error_rate),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.high_error_rate > 1.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "high_error_rate",
                value: self.high_error_rate,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Regexes matched case-insensitively against request endpoints
    pub attack_patterns: Vec<String>,
    /// Regexes for reconnaissance probes
    pub scan_patterns: Vec<String>,
    /// File with one known-bad address per line
    pub suspicious_ips_file: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            attack_patterns: [
                r"\.\./",
                r"/etc/(passwd|shadow|hosts)",
                r"union(\s|%20|\+)+(all(\s|%20|\+)+)?select",
                r"(\s|%20|')(or|and)(\s|%20|\+)+'?1'?='?1",
                r"(<|%3c)script",
                r"javascript:",
                r"(;|%3b|\|)\s*(cat|ls|id|wget|curl|bash|sh)\b",
                r"=(https?|ftp)(://|%3a%2f%2f)",
                r"%00",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            scan_patterns: [
                r"wp-login\.php",
                r"/wp-admin",
                r"xmlrpc\.php",
                r"phpmyadmin",
                r"/\.env",
                r"/\.git",
                r"\.(bak|old|swp|sql)$",
                r"/(manager/html|administrator|admin\.php)",
                r"/cgi-bin/",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            suspicious_ips_file: None,
        }
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attack_patterns.is_empty() {
            return Err(ConfigError::MissingPatterns("security.attack_patterns"));
        }
        if self.scan_patterns.is_empty() {
            return Err(ConfigError::MissingPatterns("security.scan_patterns"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub z_score_threshold: f64,
    /// Smallest series any statistical test will look at
    pub min_data_points: usize,
    /// Analysis window in seconds
    pub window_size: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            z_score_threshold: 3.0,
            min_data_points: 10,
            window_size: 3600,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.z_score_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "z_score_threshold",
                value: threshold,
            });
        }
        Ok(())
    }
}

/// Alert delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Minimum seconds between two notifications of the same type
    pub throttle_period: u64,
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            enabled: false,
            throttle_period: 3600,
            webhooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    /// "POST" (default) or "PUT"
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logs: LogsConfig::default(),
            database: DatabaseConfig::default(),
            output: OutputConfig::default(),
            performance_thresholds: PerformanceThresholds::default(),
            security: SecurityConfig::default(),
            anomaly_detection: AnomalyConfig::default(),
            alerting: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
