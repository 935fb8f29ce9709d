pub mod anomaly;
pub mod buckets;
pub mod performance;
pub mod security;
pub mod stats;

pub use anomaly::{AnomalyDetector, AnomalyReport};
pub use performance::{PerformanceAnalyzer, PerformanceReport};
pub use security::{SecurityAnalyzer, SecurityReport};

use chrono::NaiveDateTime;

/// Wall-clock time used to stamp results that have no time of their own
pub(crate) fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDateTime;

    use crate::models::{AccessRecord, LogFormat};

    pub fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    pub fn access(ip: &str, method: &str, endpoint: &str, status: u16, response_time: f64) -> AccessRecord {
        AccessRecord {
            timestamp: Some(at("2023-10-10 12:00:00")),
            ip_address: ip.to_string(),
            user: "-".to_string(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            protocol: "HTTP/1.1".to_string(),
            status,
            bytes_sent: 512,
            referrer: None,
            user_agent: None,
            response_time,
            log_format: LogFormat::CombinedTime,
        }
    }
}
