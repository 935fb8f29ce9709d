use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AttackPattern,
    ScanAttempt,
    SuspiciousIp,
    BruteForceAttempt,
    UnusualMethod,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::AttackPattern => "attack_pattern",
            SecurityEventType::ScanAttempt => "scan_attempt",
            SecurityEventType::SuspiciousIp => "suspicious_ip",
            SecurityEventType::BruteForceAttempt => "brute_force_attempt",
            SecurityEventType::UnusualMethod => "unusual_method",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Contribution of one event of this severity to an IP threat score
    pub fn weight(&self) -> u64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 5,
            Severity::High => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: NaiveDateTime,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub ip_address: String,
    pub endpoint: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn from_score(score: u64) -> Self {
        if score >= 20 {
            ThreatLevel::High
        } else if score >= 10 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

/// Aggregated threat score for one source address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpThreatScore {
    pub ip_address: String,
    pub score: u64,
    pub threat_level: ThreatLevel,
    pub events: BTreeMap<SecurityEventType, usize>,
}
