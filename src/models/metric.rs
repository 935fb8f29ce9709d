use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Severity;

/// Nominal window attached to per-endpoint metrics, in seconds
pub const METRIC_TIME_WINDOW: i64 = 3600;

/// One row of the `performance_metrics` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: NaiveDateTime,
    pub metric_name: String,
    pub metric_value: f64,
    pub endpoint: String,
    pub time_window: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighOverallResponseTime,
    HighErrorRate,
    SlowEndpoint,
}

/// A threshold violation found by the performance analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub description: String,
    pub metric: f64,
}

/// A statistically unusual observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub timestamp: NaiveDateTime,
    pub metric_name: String,
    pub expected_value: f64,
    pub actual_value: f64,
    pub z_score: f64,
    pub source: Option<String>,
}
