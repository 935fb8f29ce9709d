//! Statistical anomaly detection
//!
//! Each test takes a plain series and returns the indices of the points it
//! flags. `prepare_anomaly_records` turns those indices into
//! [`AnomalyRecord`]s scored against the whole series.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{buckets, now, stats};
use crate::config::AnomalyConfig;
use crate::models::{AccessRecord, AnomalyRecord};

/// Width of the buckets the error rate test works on
pub const ERROR_RATE_BUCKET_SECS: i64 = 300;

const ROLLING_WINDOW: usize = 5;
const ROLLING_MIN_PERIODS: usize = 3;
const IQR_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies_detected: usize,
    pub anomaly_records: Vec<AnomalyRecord>,
}

impl AnomalyReport {
    fn from_records(anomaly_records: Vec<AnomalyRecord>) -> Self {
        AnomalyReport {
            anomalies_detected: anomaly_records.len(),
            anomaly_records,
        }
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        log::debug!(
            "Anomaly detector initialized with z-score threshold: {}",
            config.z_score_threshold
        );
        AnomalyDetector { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    fn enough_points(&self, len: usize, what: &str) -> bool {
        if len < self.config.min_data_points {
            log::warn!(
                "Not enough data points for {} anomaly detection: {} < {}",
                what,
                len,
                self.config.min_data_points
            );
            return false;
        }
        true
    }

    /// Flag points whose z-score against the rest of the series exceeds the
    /// threshold.
    ///
    /// Each point is compared with the mean and sample deviation of the
    /// other points, so a single extreme value does not inflate the spread
    /// it is measured against. A series with no spread at all flags nothing,
    /// and neither does a point whose peers are all equal. Spreads within
    /// rounding noise of the mean count as zero.
    pub fn detect_response_time_anomalies(&self, values: &[f64]) -> Vec<usize> {
        if !self.enough_points(values.len(), "response time") || values.len() < 3 {
            return Vec::new();
        }

        let n = values.len() as f64;
        let (mean, m2) = mean_and_m2(values);
        let tolerance = stats::spread_tolerance(mean);

        let Some(spread) = stats::population_std(values) else {
            return Vec::new();
        };
        if spread <= tolerance {
            return Vec::new();
        }

        // A point is only scored when the others have a measurable spread.
        // Removing a point from `m2` cancels terms of size `|x - mean|`, so
        // anything below that noise floor counts as no spread.
        let anomalies: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, &x)| {
                let rest_mean = (n * mean - x) / (n - 1.0);
                let rest_m2 = m2 - (x - mean) * (x - rest_mean);
                let noise_floor = 2.0 * tolerance * (x - mean).abs().max(tolerance);
                if rest_m2 <= noise_floor {
                    return false;
                }
                let rest_std = (rest_m2 / (n - 2.0)).sqrt();
                rest_std > tolerance
                    && (x - rest_mean).abs() / rest_std > self.config.z_score_threshold
            })
            .map(|(i, _)| i)
            .collect();

        log::info!(
            "Detected {} anomalies in {} data points using z-score method",
            anomalies.len(),
            values.len()
        );
        anomalies
    }

    /// Flag points outside `rolling mean ± threshold × rolling std`, where the
    /// rolling statistics cover up to five preceding points. Points with
    /// fewer than three predecessors use the whole series instead.
    ///
    /// This differs on purpose from a trailing `rolling(window=5,
    /// min_periods=3)` ending at the current point. A point inside its own
    /// five-point window has a z-score of at most 1.79, so the default
    /// threshold of 3 would never fire. As a result index 2 uses the global
    /// statistics rather than a three-point window.
    pub fn detect_traffic_anomalies(&self, series: &[f64]) -> Vec<usize> {
        if !self.enough_points(series.len(), "traffic") {
            return Vec::new();
        }

        let global_mean = stats::mean(series).unwrap_or(0.0);
        let global_std = stats::sample_std(series).unwrap_or(0.0);
        let threshold = self.config.z_score_threshold;
        let tolerance = stats::spread_tolerance(global_mean);

        let anomalies: Vec<usize> = series
            .iter()
            .enumerate()
            .filter(|(i, &value)| {
                let window = &series[i.saturating_sub(ROLLING_WINDOW)..*i];
                let (mean, std) = if window.len() >= ROLLING_MIN_PERIODS {
                    (
                        stats::mean(window).unwrap_or(global_mean),
                        stats::sample_std(window).unwrap_or(global_std),
                    )
                } else {
                    (global_mean, global_std)
                };
                let band = (threshold * std).max(tolerance);
                value > mean + band || value < mean - band
            })
            .map(|(i, _)| i)
            .collect();

        log::info!(
            "Detected {} traffic anomalies in {} time points",
            anomalies.len(),
            series.len()
        );
        anomalies
    }

    /// Flag rates above `Q3 + 1.5 × IQR`. Low rates are never anomalous.
    pub fn detect_error_rate_anomalies(&self, rates: &[f64]) -> Vec<usize> {
        if !self.enough_points(rates.len(), "error rate") {
            return Vec::new();
        }

        let sorted = stats::sorted(rates);
        let (Some(q1), Some(q3)) = (
            stats::quantile_sorted(&sorted, 0.25),
            stats::quantile_sorted(&sorted, 0.75),
        ) else {
            return Vec::new();
        };
        let upper = q3 + IQR_FACTOR * (q3 - q1);

        let anomalies: Vec<usize> = rates
            .iter()
            .enumerate()
            .filter(|(_, &rate)| rate > upper)
            .map(|(i, _)| i)
            .collect();

        log::info!(
            "Detected {} error rate anomalies in {} time points",
            anomalies.len(),
            rates.len()
        );
        anomalies
    }

    /// Build records for flagged `indices` of `values`. The expected value is
    /// the series mean and the z-score uses the population deviation.
    /// Points without a timestamp are stamped with the current time.
    pub fn prepare_anomaly_records(
        &self,
        indices: &[usize],
        values: &[f64],
        metric_name: &str,
        timestamps: &[Option<NaiveDateTime>],
        source: Option<&str>,
    ) -> Vec<AnomalyRecord> {
        let mean = stats::mean(values).unwrap_or(0.0);
        let std = stats::population_std(values).unwrap_or(0.0);
        let current_time = now();

        indices
            .iter()
            .filter_map(|&i| {
                let Some(&value) = values.get(i) else {
                    log::error!("Anomaly index {} out of range for {}", i, metric_name);
                    return None;
                };
                Some(AnomalyRecord {
                    timestamp: timestamps.get(i).copied().flatten().unwrap_or(current_time),
                    metric_name: metric_name.to_string(),
                    expected_value: mean,
                    actual_value: value,
                    z_score: stats::z_score(value, mean, std),
                    source: source.map(str::to_string),
                })
            })
            .collect()
    }

    /// Response time and error rate tests over one batch
    pub fn analyze_logs(&self, records: &[AccessRecord], source: Option<&str>) -> AnomalyReport {
        if records.is_empty() {
            log::warn!("No log data available for anomaly detection");
            return AnomalyReport::default();
        }

        let mut found = Vec::new();

        let response_times: Vec<f64> = records.iter().map(|r| r.response_time).collect();
        let indices = self.detect_response_time_anomalies(&response_times);
        if !indices.is_empty() {
            let timestamps: Vec<Option<NaiveDateTime>> =
                records.iter().map(|r| r.timestamp).collect();
            found.extend(self.prepare_anomaly_records(
                &indices,
                &response_times,
                "response_time",
                &timestamps,
                source,
            ));
        }

        let has_timestamps = records.iter().any(|r| r.timestamp.is_some());
        if records.len() >= self.config.min_data_points && has_timestamps {
            let error_rates = buckets::error_rates(records, ERROR_RATE_BUCKET_SECS);
            let (stamps, rates): (Vec<Option<NaiveDateTime>>, Vec<f64>) =
                error_rates.into_iter().map(|(ts, rate)| (Some(ts), rate)).unzip();
            let indices = self.detect_error_rate_anomalies(&rates);
            if !indices.is_empty() {
                found.extend(self.prepare_anomaly_records(
                    &indices,
                    &rates,
                    "error_rate",
                    &stamps,
                    source,
                ));
            }
        }

        AnomalyReport::from_records(found)
    }

    /// Traffic test over an ordered request count series
    pub fn analyze_traffic(
        &self,
        series: &[(NaiveDateTime, f64)],
        source: Option<&str>,
    ) -> AnomalyReport {
        let (stamps, counts): (Vec<Option<NaiveDateTime>>, Vec<f64>) =
            series.iter().map(|(ts, count)| (Some(*ts), *count)).unzip();
        let indices = self.detect_traffic_anomalies(&counts);
        AnomalyReport::from_records(self.prepare_anomaly_records(
            &indices,
            &counts,
            "request_count",
            &stamps,
            source,
        ))
    }
}

// Mean and sum of squared deviations, accumulated with Welford's update
fn mean_and_m2(values: &[f64]) -> (f64, f64) {
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, &x) in values.iter().enumerate() {
        let delta = x - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (x - mean);
    }
    (mean, m2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{access, at};

    const RESPONSE_TIMES: [f64; 10] = [0.1, 0.12, 0.11, 0.09, 0.13, 0.12, 0.11, 0.10, 0.12, 1.5];

    fn detector(min_data_points: usize) -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig {
            min_data_points,
            ..Default::default()
        })
    }

    #[test]
    fn test_response_time_outlier() {
        let anomalies = detector(10).detect_response_time_anomalies(&RESPONSE_TIMES);
        assert_eq!(anomalies, vec![9]);
    }

    #[test]
    fn test_response_time_no_spread() {
        let d = detector(10);
        for value in [0.1, 0.2, 0.3, 0.7, 0.123, 0.005] {
            for len in 10..20 {
                let series = vec![value; len];
                assert!(
                    d.detect_response_time_anomalies(&series).is_empty(),
                    "constant {} x {} flagged",
                    value,
                    len
                );
            }
        }
    }

    #[test]
    fn test_response_time_rounding_noise_not_flagged() {
        let mut series = vec![0.2; 9];
        series.push(0.2 + 1e-12);
        assert!(detector(10).detect_response_time_anomalies(&series).is_empty());
    }

    #[test]
    fn test_traffic_constant_fractional_series() {
        assert!(detector(10).detect_traffic_anomalies(&[0.1; 15]).is_empty());
    }

    #[test]
    fn test_too_few_points() {
        let d = detector(10);
        let values = &RESPONSE_TIMES[..9];
        assert!(d.detect_response_time_anomalies(values).is_empty());
        assert!(d.detect_traffic_anomalies(values).is_empty());
        assert!(d.detect_error_rate_anomalies(values).is_empty());
    }

    #[test]
    fn test_error_rate_iqr() {
        let anomalies = detector(5).detect_error_rate_anomalies(&[0.0, 0.0, 0.05, 0.0, 0.6]);
        assert_eq!(anomalies, vec![4]);
    }

    #[test]
    fn test_error_rate_ignores_low_values() {
        let anomalies = detector(5).detect_error_rate_anomalies(&[0.5, 0.5, 0.5, 0.5, 0.0]);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_traffic_spike() {
        let series = [10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 100.0, 11.0];
        assert_eq!(detector(10).detect_traffic_anomalies(&series), vec![10]);
    }

    #[test]
    fn test_traffic_flat_series() {
        assert!(detector(10).detect_traffic_anomalies(&[7.0; 15]).is_empty());
    }

    #[test]
    fn test_prepare_records() {
        let d = detector(10);
        let mut timestamps = vec![None; 10];
        timestamps[9] = Some(at("2023-10-10 13:00:00"));

        let records =
            d.prepare_anomaly_records(&[9, 42], &RESPONSE_TIMES, "response_time", &timestamps, Some("access.log"));
        assert_eq!(records.len(), 1);

        let record = &records[0];
        let mean = stats::mean(&RESPONSE_TIMES).unwrap();
        let std = stats::population_std(&RESPONSE_TIMES).unwrap();
        assert_eq!(record.timestamp, at("2023-10-10 13:00:00"));
        assert_eq!(record.metric_name, "response_time");
        assert!((record.expected_value - mean).abs() < 1e-12);
        assert_eq!(record.actual_value, 1.5);
        assert!((record.z_score - (1.5 - mean) / std).abs() < 1e-12);
        assert_eq!(record.source.as_deref(), Some("access.log"));
    }

    #[test]
    fn test_analyze_logs_response_time() {
        let records: Vec<AccessRecord> = RESPONSE_TIMES
            .iter()
            .map(|&t| access("10.0.0.1", "GET", "/", 200, t))
            .collect();

        let report = detector(10).analyze_logs(&records, Some("access.log"));
        assert_eq!(report.anomalies_detected, 1);
        assert_eq!(report.anomaly_records[0].actual_value, 1.5);
        assert_eq!(report.anomaly_records[0].metric_name, "response_time");
    }

    #[test]
    fn test_analyze_logs_nine_rows() {
        let records: Vec<AccessRecord> = RESPONSE_TIMES[..9]
            .iter()
            .map(|&t| access("10.0.0.1", "GET", "/", 500, t))
            .collect();
        let report = detector(10).analyze_logs(&records, None);
        assert_eq!(report, AnomalyReport::default());
    }

    #[test]
    fn test_analyze_logs_error_rate() {
        // Five 5-minute buckets, the last one mostly failing
        let mut records = Vec::new();
        for (minute, errors) in [(0, 0), (5, 0), (10, 1), (15, 0), (20, 12)] {
            for i in 0..20 {
                let status = if i < errors { 500 } else { 200 };
                let mut r = access("10.0.0.1", "GET", "/", status, 0.1);
                r.timestamp = Some(at(&format!("2023-10-10 12:{:02}:{:02}", minute, i)));
                records.push(r);
            }
        }

        let report = detector(5).analyze_logs(&records, Some("access.log"));
        assert_eq!(report.anomalies_detected, 1);
        let record = &report.anomaly_records[0];
        assert_eq!(record.metric_name, "error_rate");
        assert_eq!(record.timestamp, at("2023-10-10 12:20:00"));
        assert!((record.actual_value - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_analyze_traffic() {
        let series: Vec<(NaiveDateTime, f64)> = [10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 100.0, 11.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| (at(&format!("2023-10-10 {:02}:00:00", i)), c))
            .collect();

        let report = detector(10).analyze_traffic(&series, None);
        assert_eq!(report.anomalies_detected, 1);
        assert_eq!(report.anomaly_records[0].timestamp, at("2023-10-10 10:00:00"));
        assert_eq!(report.anomaly_records[0].metric_name, "request_count");
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(detector(10).analyze_logs(&[], None), AnomalyReport::default());
        assert_eq!(detector(10).analyze_traffic(&[], None), AnomalyReport::default());
    }
}
