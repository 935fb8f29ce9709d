//! Batch orchestration
//!
//! Runs the three analyzers over the same read-only batch on tokio's
//! blocking pool and collects their reports.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analyzers::{
    AnomalyDetector, AnomalyReport, PerformanceAnalyzer, PerformanceReport, SecurityAnalyzer,
    SecurityReport,
};
use crate::config::{Config, ConfigError};
use crate::models::AccessRecord;

/// Combined results of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub source: Option<String>,
    pub record_count: usize,
    pub performance: PerformanceReport,
    pub security: SecurityReport,
    pub anomalies: AnomalyReport,
}

pub struct Pipeline {
    performance: Arc<PerformanceAnalyzer>,
    security: Arc<SecurityAnalyzer>,
    anomaly: Arc<AnomalyDetector>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.anomaly_detection.validate()?;
        Ok(Pipeline {
            performance: Arc::new(PerformanceAnalyzer::new(
                config.performance_thresholds.clone(),
            )?),
            security: Arc::new(SecurityAnalyzer::new(&config.security)?),
            anomaly: Arc::new(AnomalyDetector::new(config.anomaly_detection.clone())),
        })
    }

    pub fn performance(&self) -> &PerformanceAnalyzer {
        &self.performance
    }

    pub fn anomaly_detector(&self) -> &AnomalyDetector {
        &self.anomaly
    }

    /// Analyze one batch. An analyzer that panics is logged and contributes
    /// its empty report instead.
    pub async fn run(&self, records: Vec<AccessRecord>, source: Option<&str>) -> BatchReport {
        let record_count = records.len();
        let batch: Arc<[AccessRecord]> = records.into();
        log::info!(
            "Analyzing {} records from {}",
            record_count,
            source.unwrap_or("unknown source")
        );

        let performance = {
            let analyzer = Arc::clone(&self.performance);
            let batch = Arc::clone(&batch);
            isolate("performance", move || analyzer.generate_performance_report(&batch), PerformanceReport::empty)
        };
        let security = {
            let analyzer = Arc::clone(&self.security);
            let batch = Arc::clone(&batch);
            isolate("security", move || analyzer.analyze_logs(&batch), SecurityReport::default)
        };
        let anomalies = {
            let detector = Arc::clone(&self.anomaly);
            let batch = Arc::clone(&batch);
            let source = source.map(str::to_string);
            isolate(
                "anomaly",
                move || detector.analyze_logs(&batch, source.as_deref()),
                AnomalyReport::default,
            )
        };

        let (performance, security, anomalies) = tokio::join!(performance, security, anomalies);

        BatchReport {
            source: source.map(str::to_string),
            record_count,
            performance,
            security,
            anomalies,
        }
    }
}

/// Run `work` on the blocking pool, substituting `fallback()` if it panics
async fn isolate<T, W, F>(name: &str, work: W, fallback: F) -> T
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    F: FnOnce() -> T,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("{} analysis failed: {}", name, e);
            fallback()
        }
    }
}
