//! Alerting module for webhook notifications
//!
//! Analysis results are turned into [`Notification`]s, throttled per alert
//! type and delivered asynchronously to the configured webhooks.

use crate::config::{AlertConfig, WebhookConfig};
use crate::models::{AccessRecord, AnomalyRecord, PerformanceIssue, SecurityEvent};
use crate::pipeline::BatchReport;
use chrono::{Local, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

const SUBJECT_PREFIX: &str = "[LogLens Alert]";

/// Errors that can occur during alert dispatch
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Alert channel closed")]
    ChannelClosed,
}

/// A message for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub content: String,
    pub details: Option<serde_json::Value>,
    /// Throttling key, e.g. `performance` or `security`
    pub alert_type: String,
}

impl Notification {
    pub fn new(subject: impl Into<String>, content: impl Into<String>, alert_type: impl Into<String>) -> Self {
        Notification {
            subject: subject.into(),
            content: content.into(),
            details: None,
            alert_type: alert_type.into(),
        }
    }

    pub fn with_details<T: Serialize + ?Sized>(mut self, details: &T) -> Result<Self, AlertError> {
        self.details = Some(serde_json::to_value(details)?);
        Ok(self)
    }

    /// JSON body sent to webhooks
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "subject": format!("{} {}", SUBJECT_PREFIX, self.subject),
            "content": &self.content,
            "details": &self.details,
            "alert_type": &self.alert_type,
            "alert_time": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        })
    }
}

/// Alert for performance issues, `None` when there are none
pub fn performance_alert(issues: &[PerformanceIssue]) -> Result<Option<Notification>, AlertError> {
    if issues.is_empty() {
        return Ok(None);
    }
    Notification::new(
        format!("Performance Issues Detected: {} issue(s)", issues.len()),
        "The following performance issues were detected in the log analysis:",
        "performance",
    )
    .with_details(issues)
    .map(Some)
}

/// Alert for security events, `None` when there are none
pub fn security_alert(events: &[SecurityEvent]) -> Result<Option<Notification>, AlertError> {
    if events.is_empty() {
        return Ok(None);
    }
    Notification::new(
        format!("Security Threats Detected: {} event(s)", events.len()),
        "The following security threats were detected in the log analysis:",
        "security",
    )
    .with_details(events)
    .map(Some)
}

/// Alert for anomalies, `None` when there are none
pub fn anomaly_alert(anomalies: &[AnomalyRecord]) -> Result<Option<Notification>, AlertError> {
    if anomalies.is_empty() {
        return Ok(None);
    }
    Notification::new(
        format!("Anomalies Detected: {} anomaly(ies)", anomalies.len()),
        "The following anomalies were detected in the log analysis:",
        "anomaly",
    )
    .with_details(anomalies)
    .map(Some)
}

/// Every alert a batch report warrants
pub fn batch_alerts(report: &BatchReport) -> Result<Vec<Notification>, AlertError> {
    let alerts = [
        performance_alert(&report.performance.issues_detected)?,
        security_alert(&report.security.security_events)?,
        anomaly_alert(&report.anomalies.anomaly_records)?,
    ];
    Ok(alerts.into_iter().flatten().collect())
}

/// Totals over an analysis period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_logs: usize,
    pub unique_ips: usize,
    pub avg_response_time: f64,
    /// Fraction of requests with status >= 400
    pub error_rate: f64,
    pub security_events: usize,
    pub performance_issues: usize,
    pub anomalies: usize,
}

/// Accumulates [`SummaryStats`] across batches
#[derive(Debug, Default)]
pub struct SummaryCollector {
    ips: HashSet<String>,
    total_logs: usize,
    response_time_sum: f64,
    errors: usize,
    security_events: usize,
    performance_issues: usize,
    anomalies: usize,
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
}

impl SummaryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_records(&mut self, records: &[AccessRecord]) {
        for record in records {
            self.total_logs += 1;
            self.response_time_sum += record.response_time;
            if record.is_error() {
                self.errors += 1;
            }
            if !self.ips.contains(&record.ip_address) {
                self.ips.insert(record.ip_address.clone());
            }
            if let Some(ts) = record.timestamp {
                self.first = Some(self.first.map_or(ts, |first| first.min(ts)));
                self.last = Some(self.last.map_or(ts, |last| last.max(ts)));
            }
        }
    }

    pub fn add_report(&mut self, report: &BatchReport) {
        self.security_events += report.security.security_events.len();
        self.performance_issues += report.performance.issues_detected.len();
        self.anomalies += report.anomalies.anomalies_detected;
    }

    /// Earliest and latest record timestamps seen so far
    pub fn timeframe(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        self.first.zip(self.last)
    }

    pub fn stats(&self) -> SummaryStats {
        let (avg_response_time, error_rate) = if self.total_logs == 0 {
            (0.0, 0.0)
        } else {
            let n = self.total_logs as f64;
            (self.response_time_sum / n, self.errors as f64 / n)
        };
        SummaryStats {
            total_logs: self.total_logs,
            unique_ips: self.ips.len(),
            avg_response_time,
            error_rate,
            security_events: self.security_events,
            performance_issues: self.performance_issues,
            anomalies: self.anomalies,
        }
    }
}

/// Summary of an analysis period, sent as a `daily_summary` alert
pub fn daily_summary(stats: &SummaryStats, timeframe: (NaiveDateTime, NaiveDateTime)) -> Notification {
    let (start, end) = timeframe;
    let period = format!(
        "{} to {}",
        start.format("%Y-%m-%d %H:%M"),
        end.format("%Y-%m-%d %H:%M")
    );

    let mut summary = Notification::new(
        format!("Daily Log Analysis Summary: {}", start.format("%Y-%m-%d")),
        format!("Log Analysis Summary for period: {}", period),
        "daily_summary",
    );
    summary.details = Some(serde_json::json!({
        "analysis_period": period,
        "total_logs_processed": stats.total_logs,
        "unique_ip_addresses": stats.unique_ips,
        "average_response_time": format!("{:.3}s", stats.avg_response_time),
        "error_rate": format!("{:.2}%", stats.error_rate * 100.0),
        "security_events": stats.security_events,
        "performance_issues": stats.performance_issues,
        "anomalies_detected": stats.anomalies,
    }));
    summary
}

/// At most one notification per alert type per period
#[derive(Debug)]
pub struct AlertThrottle {
    period: Duration,
    last_sent: HashMap<String, Instant>,
}

impl AlertThrottle {
    pub fn new(period: Duration) -> Self {
        AlertThrottle {
            period,
            last_sent: HashMap::new(),
        }
    }

    /// True if a notification of `alert_type` must be held back at `now`.
    /// A notification that passes is recorded as sent.
    pub fn should_throttle_at(&mut self, alert_type: &str, now: Instant) -> bool {
        if let Some(last) = self.last_sent.get(alert_type) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.period {
                log::info!(
                    "Throttling {} notification (last sent {}s ago)",
                    alert_type,
                    elapsed.as_secs()
                );
                return true;
            }
        }
        self.last_sent.insert(alert_type.to_string(), now);
        false
    }

    pub fn should_throttle(&mut self, alert_type: &str) -> bool {
        self.should_throttle_at(alert_type, Instant::now())
    }
}

/// Async alert dispatcher
pub struct AlertDispatcher {
    config: AlertConfig,
    client: Client,
    throttle: Mutex<AlertThrottle>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        let throttle = AlertThrottle::new(Duration::from_secs(config.throttle_period));
        if config.enabled {
            log::info!("Alert dispatcher initialized with {} webhook(s)", config.webhooks.len());
        } else {
            log::info!("Alerting disabled");
        }
        AlertDispatcher {
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            throttle: Mutex::new(throttle),
        }
    }

    /// Create a channel for queueing notifications
    pub fn create_channel() -> (mpsc::Sender<Notification>, mpsc::Receiver<Notification>) {
        mpsc::channel(100)
    }

    /// Deliver queued notifications until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<Notification>) -> usize {
        log::info!("Alert dispatcher started");

        let mut delivered = 0;
        while let Some(notification) = rx.recv().await {
            if self.send(&notification).await {
                delivered += 1;
            }
        }

        log::info!("Alert dispatcher stopped");
        delivered
    }

    /// Send one notification. Returns false when it was dropped because
    /// alerting is disabled, it was throttled, or no webhook accepted it.
    pub async fn send(&self, notification: &Notification) -> bool {
        if !self.config.enabled {
            log::info!("Notifications are disabled, alert not sent: {}", notification.subject);
            return false;
        }

        let throttled = self
            .throttle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .should_throttle(&notification.alert_type);
        if throttled {
            return false;
        }

        if self.config.webhooks.is_empty() {
            log::warn!("No webhooks configured, alert not sent: {}", notification.subject);
            return false;
        }

        log::info!("Dispatching alert: {}", notification.subject);
        match self.dispatch(notification).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to dispatch alert: {}", e);
                false
            }
        }
    }

    /// Send to every webhook, returning the first failure
    async fn dispatch(&self, notification: &Notification) -> Result<(), AlertError> {
        let payload = notification.payload();
        let mut errors = Vec::new();

        for webhook in &self.config.webhooks {
            if let Err(e) = self.send_webhook(webhook, &payload).await {
                log::error!("Webhook {} failed: {}", webhook.name, e);
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.remove(0))
        }
    }

    async fn send_webhook(
        &self,
        config: &WebhookConfig,
        payload: &serde_json::Value,
    ) -> Result<(), AlertError> {
        let method = config.method.as_deref().unwrap_or("POST");

        let mut request = match method.to_uppercase().as_str() {
            "PUT" => self.client.put(&config.url),
            _ => self.client.post(&config.url),
        };

        if let Some(ref headers) = config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(payload).send().await?;

        if !response.status().is_success() {
            log::warn!(
                "Webhook {} returned non-success status: {}",
                config.name,
                response.status()
            );
        }

        Ok(())
    }
}

/// Sync-friendly handle for queueing notifications to a running dispatcher
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<Notification>,
}

impl AlertQueue {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        AlertQueue { tx }
    }

    /// Queue without blocking; a full or closed queue drops the notification
    pub fn queue_alert(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    log::warn!("Alert queue full, dropping alert");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Alert queue closed");
                }
            }
        }
    }

    pub async fn queue_alert_async(&self, notification: Notification) -> Result<(), AlertError> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| AlertError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueKind, SecurityEventType, Severity};

    fn issue() -> PerformanceIssue {
        PerformanceIssue {
            kind: IssueKind::HighErrorRate,
            severity: Severity::High,
            endpoint: None,
            description: "Error rate (12.00%) exceeds threshold (5.00%)".to_string(),
            metric: 0.12,
        }
    }

    fn event() -> SecurityEvent {
        SecurityEvent {
            timestamp: chrono::NaiveDate::from_ymd_opt(2023, 10, 10)
                .unwrap()
                .and_hms_opt(13, 55, 36)
                .unwrap(),
            event_type: SecurityEventType::AttackPattern,
            severity: Severity::High,
            ip_address: "6.6.6.6".to_string(),
            endpoint: "/../../../etc/passwd".to_string(),
            description: "Potential attack pattern detected".to_string(),
        }
    }

    #[test]
    fn test_throttle_per_type() {
        let mut throttle = AlertThrottle::new(Duration::from_secs(3600));
        let start = Instant::now();

        assert!(!throttle.should_throttle_at("security", start));
        assert!(throttle.should_throttle_at("security", start + Duration::from_secs(10)));
        assert!(!throttle.should_throttle_at("performance", start + Duration::from_secs(10)));
        assert!(!throttle.should_throttle_at("security", start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_builders_skip_empty_inputs() {
        assert!(performance_alert(&[]).unwrap().is_none());
        assert!(security_alert(&[]).unwrap().is_none());
        assert!(anomaly_alert(&[]).unwrap().is_none());
    }

    #[test]
    fn test_security_alert_details() {
        let alert = security_alert(&[event(), event()]).unwrap().unwrap();
        assert_eq!(alert.alert_type, "security");
        assert_eq!(alert.subject, "Security Threats Detected: 2 event(s)");

        let details = alert.details.unwrap();
        assert_eq!(details[0]["event_type"], "attack_pattern");
        assert_eq!(details[0]["severity"], "high");
    }

    #[test]
    fn test_payload_prefixes_subject() {
        let alert = performance_alert(&[issue()]).unwrap().unwrap();
        let payload = alert.payload();
        assert_eq!(payload["subject"], "[LogLens Alert] Performance Issues Detected: 1 issue(s)");
        assert_eq!(payload["alert_type"], "performance");
        assert_eq!(payload["details"][0]["kind"], "high_error_rate");
    }

    #[test]
    fn test_daily_summary() {
        use crate::analyzers::test_support::{access, at};

        let mut records = vec![
            access("10.0.0.1", "GET", "/", 200, 0.1),
            access("10.0.0.2", "GET", "/", 500, 0.3),
            access("10.0.0.1", "GET", "/", 404, 0.2),
            access("10.0.0.3", "GET", "/", 200, 0.2),
        ];
        records[0].timestamp = Some(at("2023-10-10 08:00:00"));
        records[3].timestamp = Some(at("2023-10-10 18:30:00"));

        let mut collector = SummaryCollector::new();
        collector.add_records(&records);
        let mut performance = crate::analyzers::PerformanceReport::empty();
        performance.issues_detected = vec![issue()];
        let report = BatchReport {
            source: None,
            record_count: records.len(),
            performance,
            security: crate::analyzers::SecurityReport {
                security_events: vec![event(), event()],
                ..Default::default()
            },
            anomalies: Default::default(),
        };
        collector.add_report(&report);

        let stats = collector.stats();
        assert_eq!(stats.total_logs, 4);
        assert_eq!(stats.unique_ips, 3);
        assert!((stats.avg_response_time - 0.2).abs() < 1e-9);
        assert_eq!(stats.error_rate, 0.5);
        assert_eq!(stats.security_events, 2);
        assert_eq!(stats.performance_issues, 1);
        assert_eq!(stats.anomalies, 0);

        let timeframe = collector.timeframe().unwrap();
        assert_eq!(timeframe, (at("2023-10-10 08:00:00"), at("2023-10-10 18:30:00")));

        let summary = daily_summary(&stats, timeframe);
        assert_eq!(summary.alert_type, "daily_summary");
        assert_eq!(summary.subject, "Daily Log Analysis Summary: 2023-10-10");
        assert_eq!(
            summary.content,
            "Log Analysis Summary for period: 2023-10-10 08:00 to 2023-10-10 18:30"
        );
        let details = summary.details.unwrap();
        assert_eq!(details["total_logs_processed"], 4);
        assert_eq!(details["unique_ip_addresses"], 3);
        assert_eq!(details["average_response_time"], "0.200s");
        assert_eq!(details["error_rate"], "50.00%");
        assert_eq!(details["security_events"], 2);
    }

    #[test]
    fn test_empty_collector() {
        let collector = SummaryCollector::new();
        assert_eq!(collector.timeframe(), None);
        assert_eq!(collector.stats(), SummaryStats::default());
    }

    #[test]
    fn test_disabled_dispatcher_drops() {
        let dispatcher = AlertDispatcher::new(AlertConfig::default());
        let alert = Notification::new("subject", "content", "general");
        assert!(!tokio_test::block_on(dispatcher.send(&alert)));
        // Dropped before the throttle was consulted
        assert!(!dispatcher.throttle.lock().unwrap().should_throttle("general"));
    }

    #[tokio::test]
    async fn test_enabled_without_webhooks_is_throttled_once_sent() {
        let config = AlertConfig {
            enabled: true,
            throttle_period: 3600,
            webhooks: vec![],
        };
        let dispatcher = AlertDispatcher::new(config);
        let alert = Notification::new("subject", "content", "general");

        assert!(!dispatcher.send(&alert).await);
        // The first attempt consumed the slot for this type
        let throttled = dispatcher
            .throttle
            .lock()
            .unwrap()
            .should_throttle("general");
        assert!(throttled);
    }

    #[tokio::test]
    async fn test_alert_queue_send() {
        let (tx, mut rx) = AlertDispatcher::create_channel();
        let queue = AlertQueue::new(tx);
        assert!(!queue.is_closed());

        queue.queue_alert(Notification::new("one", "content", "general"));
        queue
            .queue_alert_async(Notification::new("two", "content", "general"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().subject, "one");
        assert_eq!(rx.recv().await.unwrap().subject, "two");
    }

    #[tokio::test]
    async fn test_run_stops_when_queue_dropped() {
        let (tx, rx) = AlertDispatcher::create_channel();
        let dispatcher = AlertDispatcher::new(AlertConfig::default());
        let handle = tokio::spawn(dispatcher.run(rx));

        let queue = AlertQueue::new(tx);
        queue.queue_alert(Notification::new("subject", "content", "general"));
        drop(queue);

        assert_eq!(handle.await.unwrap(), 0);
    }
}
