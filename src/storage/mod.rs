//! Result storage
//!
//! Parsed records and analysis results are written to a relational store so
//! they can be queried across runs.

pub mod sqlite_store;

pub use sqlite_store::SqliteLogStore;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AccessRecord, AnomalyRecord, ErrorRecord, PerformanceMetric, SecurityEvent};
use crate::pipeline::BatchReport;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Response time summary of one endpoint as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointResponseStats {
    pub endpoint: String,
    pub requests: usize,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub error_count: usize,
}

/// Row count of every table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub access_logs: usize,
    pub error_logs: usize,
    pub performance_metrics: usize,
    pub security_events: usize,
    pub anomalies: usize,
}

/// Storage backend for records and analysis results
///
/// Every `store_*` method returns the number of rows inserted.
pub trait LogStore: Send + Sync {
    fn store_access_logs(
        &self,
        records: &[AccessRecord],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError>;

    fn store_error_logs(
        &self,
        records: &[ErrorRecord],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError>;

    fn store_performance_metrics(
        &self,
        metrics: &[PerformanceMetric],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError>;

    fn store_security_events(
        &self,
        events: &[SecurityEvent],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError>;

    /// Anomalies carry their own source
    fn store_anomalies(&self, anomalies: &[AnomalyRecord]) -> Result<usize, StorageError>;

    /// Access records with `start <= timestamp <= end`, oldest first
    fn get_access_logs_by_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<AccessRecord>, StorageError>;

    /// Error records with `start <= timestamp <= end`, oldest first
    fn get_error_logs_by_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ErrorRecord>, StorageError>;

    /// Per-endpoint response time summary, slowest first. Either bound may
    /// be left open.
    fn get_response_time_stats_by_endpoint(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<EndpointResponseStats>, StorageError>;

    fn table_counts(&self) -> Result<TableCounts, StorageError>;

    /// Store the metrics, events and anomalies of a batch report
    fn store_batch_report(&self, report: &BatchReport) -> Result<usize, StorageError> {
        let source = report.source.as_deref();
        let mut stored = self.store_performance_metrics(&report.performance.performance_metrics, source)?;
        stored += self.store_security_events(&report.security.security_events, source)?;
        stored += self.store_anomalies(&report.anomalies.anomaly_records)?;
        Ok(stored)
    }
}
