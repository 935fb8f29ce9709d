pub mod event;
pub mod metric;
pub mod record;

pub use event::{IpThreatScore, SecurityEvent, SecurityEventType, Severity, ThreatLevel};
pub use metric::{AnomalyRecord, IssueKind, PerformanceIssue, PerformanceMetric, METRIC_TIME_WINDOW};
pub use record::{AccessRecord, ErrorRecord, LogFormat, LogKind, LogRecord};
