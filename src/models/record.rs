//! Structured log records produced by the parser

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grammar a record was parsed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    CombinedTime,
    Combined,
    Common,
    Error,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::CombinedTime => "combined_time",
            LogFormat::Combined => "combined",
            LogFormat::Common => "common",
            LogFormat::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "combined_time" => Some(LogFormat::CombinedTime),
            "combined" => Some(LogFormat::Combined),
            "common" => Some(LogFormat::Common),
            "error" => Some(LogFormat::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of log a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Access,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Access => "access",
            LogKind::Error => "error",
        }
    }
}

/// A single request from an access log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub timestamp: Option<NaiveDateTime>,
    pub ip_address: String,
    pub user: String,
    pub method: String,
    pub endpoint: String,
    pub protocol: String,
    /// HTTP status, 0 when the field could not be read
    pub status: u16,
    pub bytes_sent: u64,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    /// Seconds, 0.0 when the grammar carries no timing field
    pub response_time: f64,
    pub log_format: LogFormat,
}

impl AccessRecord {
    pub fn log_type(&self) -> LogKind {
        LogKind::Access
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// A single line from an error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: Option<NaiveDateTime>,
    /// Level or module tag, e.g. `error` or `core:warn`
    pub level: String,
    pub client_ip: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn log_type(&self) -> LogKind {
        LogKind::Error
    }
}

/// Output of `parse_line`
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Access(AccessRecord),
    Error(ErrorRecord),
}

impl LogRecord {
    pub fn log_type(&self) -> LogKind {
        match self {
            LogRecord::Access(_) => LogKind::Access,
            LogRecord::Error(_) => LogKind::Error,
        }
    }

    pub fn into_access(self) -> Option<AccessRecord> {
        match self {
            LogRecord::Access(record) => Some(record),
            LogRecord::Error(_) => None,
        }
    }

    pub fn into_error(self) -> Option<ErrorRecord> {
        match self {
            LogRecord::Error(record) => Some(record),
            LogRecord::Access(_) => None,
        }
    }
}
