//! Performance analysis
//!
//! Latency statistics, status code distribution and traffic volume over a
//! batch of access records, plus the threshold violations derived from them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{buckets, now, stats};
use crate::config::{ConfigError, PerformanceThresholds};
use crate::models::{
    AccessRecord, IssueKind, PerformanceIssue, PerformanceMetric, Severity, METRIC_TIME_WINDOW,
};

/// Endpoints with fewer requests than this produce no stored metrics
pub const MIN_ENDPOINT_SAMPLES: usize = 5;

pub const DEFAULT_TRAFFIC_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub count: usize,
    pub mean_time: f64,
    pub median_time: f64,
    pub max_time: f64,
    pub p95_time: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeAnalysis {
    /// `None` for an empty batch
    pub overall_stats: Option<ResponseTimeStats>,
    pub endpoint_stats: BTreeMap<String, EndpointStats>,
    pub slow_endpoints: BTreeMap<String, EndpointStats>,
    pub performance_metrics: Vec<PerformanceMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointErrors {
    pub error_count: usize,
    pub total_count: usize,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCodeAnalysis {
    pub status_counts: BTreeMap<u16, usize>,
    pub error_rate: f64,
    pub error_endpoints: BTreeMap<String, EndpointErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficAnalysis {
    pub traffic_pattern: BTreeMap<NaiveDateTime, usize>,
    pub peak_times: BTreeMap<NaiveDateTime, usize>,
    /// Requests per interval above which an interval is a peak
    pub peak_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub timestamp: NaiveDateTime,
    pub response_time_analysis: ResponseTimeAnalysis,
    pub status_code_analysis: StatusCodeAnalysis,
    pub traffic_analysis: TrafficAnalysis,
    pub issues_detected: Vec<PerformanceIssue>,
    pub performance_metrics: Vec<PerformanceMetric>,
}

impl PerformanceReport {
    pub fn empty() -> Self {
        PerformanceReport {
            timestamp: now(),
            response_time_analysis: ResponseTimeAnalysis::default(),
            status_code_analysis: StatusCodeAnalysis::default(),
            traffic_analysis: TrafficAnalysis::default(),
            issues_detected: Vec::new(),
            performance_metrics: Vec::new(),
        }
    }
}

pub struct PerformanceAnalyzer {
    thresholds: PerformanceThresholds,
}

impl PerformanceAnalyzer {
    pub fn new(thresholds: PerformanceThresholds) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        log::debug!("Performance analyzer initialized with {:?}", thresholds);
        Ok(PerformanceAnalyzer { thresholds })
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    pub fn analyze_response_times(&self, records: &[AccessRecord]) -> ResponseTimeAnalysis {
        if records.is_empty() {
            log::warn!("No response time data available for analysis");
            return ResponseTimeAnalysis::default();
        }

        let times: Vec<f64> = records.iter().map(|r| r.response_time).collect();
        let sorted = stats::sorted(&times);
        let overall = ResponseTimeStats {
            mean: stats::mean(&times).unwrap_or_default(),
            median: stats::quantile_sorted(&sorted, 0.5).unwrap_or_default(),
            p95: stats::quantile_sorted(&sorted, 0.95).unwrap_or_default(),
            p99: stats::quantile_sorted(&sorted, 0.99).unwrap_or_default(),
            max: sorted.last().copied().unwrap_or_default(),
        };

        log::info!(
            "Overall response time stats - Mean: {:.3}s, 95th percentile: {:.3}s, Max: {:.3}s",
            overall.mean,
            overall.p95,
            overall.max
        );

        let mut grouped: BTreeMap<&str, Vec<&AccessRecord>> = BTreeMap::new();
        for record in records {
            grouped.entry(record.endpoint.as_str()).or_default().push(record);
        }

        let endpoint_stats: BTreeMap<String, EndpointStats> = grouped
            .into_iter()
            .map(|(endpoint, group)| (endpoint.to_string(), summarize_endpoint(&group)))
            .collect();

        let slow_endpoints = endpoint_stats
            .iter()
            .filter(|(_, s)| s.mean_time > self.thresholds.slow_endpoint_avg)
            .map(|(endpoint, s)| (endpoint.clone(), s.clone()))
            .collect();

        let timestamp = now();
        let mut performance_metrics = Vec::new();
        for (endpoint, s) in endpoint_stats.iter() {
            if s.count < MIN_ENDPOINT_SAMPLES {
                continue;
            }
            for (name, value) in [
                ("mean_response_time", s.mean_time),
                ("p95_response_time", s.p95_time),
                ("error_rate", s.error_rate),
            ] {
                performance_metrics.push(PerformanceMetric {
                    timestamp,
                    metric_name: name.to_string(),
                    metric_value: value,
                    endpoint: endpoint.clone(),
                    time_window: METRIC_TIME_WINDOW,
                });
            }
        }

        ResponseTimeAnalysis {
            overall_stats: Some(overall),
            endpoint_stats,
            slow_endpoints,
            performance_metrics,
        }
    }

    pub fn analyze_status_codes(&self, records: &[AccessRecord]) -> StatusCodeAnalysis {
        if records.is_empty() {
            log::warn!("No status code data available for analysis");
            return StatusCodeAnalysis::default();
        }

        let mut status_counts = BTreeMap::new();
        let mut per_endpoint: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        let mut error_count = 0usize;

        for record in records {
            *status_counts.entry(record.status).or_insert(0usize) += 1;
            let entry = per_endpoint.entry(record.endpoint.as_str()).or_insert((0, 0));
            entry.1 += 1;
            if record.is_error() {
                entry.0 += 1;
                error_count += 1;
            }
        }

        let error_rate = error_count as f64 / records.len() as f64;

        log::info!("Status code distribution: {:?}", status_counts);
        log::info!("Overall error rate: {:.2}%", error_rate * 100.0);
        if error_rate > self.thresholds.high_error_rate {
            log::warn!("High error rate detected: {:.2}%", error_rate * 100.0);
        }

        let error_endpoints = per_endpoint
            .into_iter()
            .filter(|(_, (errors, _))| *errors > 0)
            .map(|(endpoint, (errors, total))| {
                (
                    endpoint.to_string(),
                    EndpointErrors {
                        error_count: errors,
                        total_count: total,
                        error_rate: errors as f64 / total as f64,
                    },
                )
            })
            .collect();

        StatusCodeAnalysis {
            status_counts,
            error_rate,
            error_endpoints,
        }
    }

    /// Count requests per `interval`, flagging intervals above the series'
    /// own 95th percentile as peaks
    pub fn analyze_traffic_patterns(
        &self,
        records: &[AccessRecord],
        interval: Duration,
    ) -> TrafficAnalysis {
        let width = interval.as_secs() as i64;
        if width <= 0 {
            log::error!("Traffic interval must be at least one second");
            return TrafficAnalysis::default();
        }

        let traffic = buckets::request_counts(records, width);
        if traffic.is_empty() {
            log::warn!("No timestamp data available for traffic analysis");
            return TrafficAnalysis::default();
        }

        let counts: Vec<f64> = traffic.values().map(|&c| c as f64).collect();
        let threshold = stats::quantile(&counts, 0.95);
        let peak_times = match threshold {
            Some(t) => traffic
                .iter()
                .filter(|(_, &count)| count as f64 > t)
                .map(|(ts, count)| (*ts, *count))
                .collect(),
            None => BTreeMap::new(),
        };

        log::info!("Traffic pattern analyzed with interval {}s", width);
        log::info!(
            "Identified {} peak traffic intervals (threshold {:?})",
            peak_times.len(),
            threshold
        );

        TrafficAnalysis {
            traffic_pattern: traffic,
            peak_times,
            peak_threshold: threshold,
        }
    }

    /// Ordered request counts per `interval`, suitable for the traffic
    /// anomaly test
    pub fn request_count_series(
        &self,
        records: &[AccessRecord],
        interval: Duration,
    ) -> Vec<(NaiveDateTime, f64)> {
        buckets::request_counts(records, interval.as_secs() as i64)
            .into_iter()
            .map(|(ts, count)| (ts, count as f64))
            .collect()
    }

    pub fn generate_performance_report(&self, records: &[AccessRecord]) -> PerformanceReport {
        log::info!("Generating performance report for {} records", records.len());

        let response_time_analysis = self.analyze_response_times(records);
        let status_code_analysis = self.analyze_status_codes(records);
        let traffic_analysis = self.analyze_traffic_patterns(records, DEFAULT_TRAFFIC_INTERVAL);

        let mut issues = Vec::new();

        if let Some(overall) = &response_time_analysis.overall_stats {
            if overall.p95 > self.thresholds.slow_endpoint_p95 {
                issues.push(PerformanceIssue {
                    kind: IssueKind::HighOverallResponseTime,
                    severity: Severity::Medium,
                    endpoint: None,
                    description: format!(
                        "95th percentile response time ({:.2}s) exceeds threshold ({}s)",
                        overall.p95, self.thresholds.slow_endpoint_p95
                    ),
                    metric: overall.p95,
                });
            }
        }

        if status_code_analysis.error_rate > self.thresholds.high_error_rate {
            issues.push(PerformanceIssue {
                kind: IssueKind::HighErrorRate,
                severity: Severity::High,
                endpoint: None,
                description: format!(
                    "Error rate ({:.2}%) exceeds threshold ({:.2}%)",
                    status_code_analysis.error_rate * 100.0,
                    self.thresholds.high_error_rate * 100.0
                ),
                metric: status_code_analysis.error_rate,
            });
        }

        for (endpoint, s) in &response_time_analysis.slow_endpoints {
            issues.push(PerformanceIssue {
                kind: IssueKind::SlowEndpoint,
                severity: Severity::Medium,
                endpoint: Some(endpoint.clone()),
                description: format!(
                    "Endpoint {} has slow average response time ({:.2}s)",
                    endpoint, s.mean_time
                ),
                metric: s.mean_time,
            });
        }

        let performance_metrics = response_time_analysis.performance_metrics.clone();
        PerformanceReport {
            timestamp: now(),
            response_time_analysis,
            status_code_analysis,
            traffic_analysis,
            issues_detected: issues,
            performance_metrics,
        }
    }
}

fn summarize_endpoint(group: &[&AccessRecord]) -> EndpointStats {
    let times: Vec<f64> = group.iter().map(|r| r.response_time).collect();
    let sorted = stats::sorted(&times);
    let errors = group.iter().filter(|r| r.is_error()).count();

    EndpointStats {
        count: group.len(),
        mean_time: stats::mean(&times).unwrap_or_default(),
        median_time: stats::quantile_sorted(&sorted, 0.5).unwrap_or_default(),
        max_time: sorted.last().copied().unwrap_or_default(),
        p95_time: stats::quantile_sorted(&sorted, 0.95).unwrap_or_default(),
        error_rate: errors as f64 / group.len().max(1) as f64,
    }
}
