pub mod alerting;
pub mod analyzers;
pub mod config;
pub mod input;
pub mod models;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use alerting::{AlertDispatcher, AlertQueue, AlertThrottle, Notification, SummaryCollector, SummaryStats};
pub use analyzers::{AnomalyDetector, PerformanceAnalyzer, SecurityAnalyzer};
pub use config::{Config, ConfigError};
pub use models::{AccessRecord, ErrorRecord, LogFormat, LogKind, LogRecord};
pub use parser::{ApacheLogParser, ParseError};
pub use pipeline::{BatchReport, Pipeline};
pub use storage::{LogStore, SqliteLogStore, StorageError};
