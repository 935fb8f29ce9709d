//! Security analysis
//!
//! Five independent passes over a batch of access records. A request can be
//! reported by several passes; each pass is an orthogonal signal and every
//! event it emits counts toward the source address' threat score.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::now;
use crate::config::{ConfigError, SecurityConfig};
use crate::models::{
    AccessRecord, IpThreatScore, SecurityEvent, SecurityEventType, Severity, ThreatLevel,
};

/// Failed requests from one address needed before it counts as brute force
pub const BRUTE_FORCE_THRESHOLD: usize = 5;

const LOGIN_KEYWORDS: [&str; 5] = ["login", "signin", "auth", "wp-login", "admin"];
// 404 is taken as a failed attempt too, which also catches plain probing of
// absent login pages.
const FAILED_LOGIN_STATUSES: [u16; 3] = [401, 403, 404];

const SAFE_METHODS: [&str; 3] = ["GET", "POST", "HEAD"];
const FLAGGED_METHODS: [&str; 5] = ["PUT", "DELETE", "TRACE", "CONNECT", "OPTIONS"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub security_events: Vec<SecurityEvent>,
    pub ip_threat_scores: BTreeMap<String, IpThreatScore>,
    pub potential_threats: usize,
}

pub struct SecurityAnalyzer {
    attack_patterns: Vec<Regex>,
    scan_patterns: Vec<Regex>,
    suspicious_ips: HashSet<String>,
}

impl SecurityAnalyzer {
    /// Compile the pattern lists and load the suspicious address file.
    ///
    /// Patterns that fail to compile are logged and skipped.
    pub fn new(config: &SecurityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let analyzer = SecurityAnalyzer {
            attack_patterns: compile_patterns(&config.attack_patterns),
            scan_patterns: compile_patterns(&config.scan_patterns),
            suspicious_ips: load_suspicious_ips(config.suspicious_ips_file.as_deref()),
        };

        log::debug!(
            "Security analyzer initialized: {} attack patterns, {} scan patterns, {} suspicious IPs",
            analyzer.attack_patterns.len(),
            analyzer.scan_patterns.len(),
            analyzer.suspicious_ips.len()
        );
        Ok(analyzer)
    }

    pub fn attack_pattern_count(&self) -> usize {
        self.attack_patterns.len()
    }

    pub fn scan_pattern_count(&self) -> usize {
        self.scan_patterns.len()
    }

    pub fn is_suspicious(&self, ip: &str) -> bool {
        self.suspicious_ips.contains(ip)
    }

    pub fn analyze_logs(&self, records: &[AccessRecord]) -> SecurityReport {
        if records.is_empty() {
            log::warn!("No log data available for security analysis");
            return SecurityReport::default();
        }

        log::info!("Analyzing {} log entries for security threats", records.len());

        let mut events = self.detect_attack_patterns(records);
        events.extend(self.detect_scanning_attempts(records));
        events.extend(self.detect_suspicious_ips(records));
        events.extend(self.detect_brute_force_attempts(records));
        events.extend(self.detect_unusual_methods(records));

        let ip_threat_scores = calculate_ip_threat_scores(&events);

        log::info!("Detected {} potential security events", events.len());

        SecurityReport {
            potential_threats: events.len(),
            security_events: events,
            ip_threat_scores,
        }
    }

    pub fn detect_attack_patterns(&self, records: &[AccessRecord]) -> Vec<SecurityEvent> {
        first_match_events(
            records,
            &self.attack_patterns,
            SecurityEventType::AttackPattern,
            Severity::High,
            "Potential attack pattern detected",
        )
    }

    pub fn detect_scanning_attempts(&self, records: &[AccessRecord]) -> Vec<SecurityEvent> {
        first_match_events(
            records,
            &self.scan_patterns,
            SecurityEventType::ScanAttempt,
            Severity::Medium,
            "Potential scanning attempt detected",
        )
    }

    /// One event per listed address seen in the batch
    pub fn detect_suspicious_ips(&self, records: &[AccessRecord]) -> Vec<SecurityEvent> {
        if self.suspicious_ips.is_empty() {
            return Vec::new();
        }

        let mut by_ip: BTreeMap<&str, Vec<&AccessRecord>> = BTreeMap::new();
        for record in records {
            if self.suspicious_ips.contains(&record.ip_address) {
                by_ip.entry(record.ip_address.as_str()).or_default().push(record);
            }
        }

        let batch_time = now();
        by_ip
            .into_iter()
            .map(|(ip, group)| {
                let first = group[0];
                log::warn!("Activity from known suspicious IP: {} ({} requests)", ip, group.len());
                SecurityEvent {
                    timestamp: first.timestamp.unwrap_or(batch_time),
                    event_type: SecurityEventType::SuspiciousIp,
                    severity: Severity::High,
                    ip_address: ip.to_string(),
                    endpoint: first.endpoint.clone(),
                    description: format!(
                        "Activity from known suspicious IP: {} ({} requests)",
                        ip,
                        group.len()
                    ),
                }
            })
            .collect()
    }

    /// One event per address with at least `BRUTE_FORCE_THRESHOLD` failed
    /// requests to login-like endpoints
    pub fn detect_brute_force_attempts(&self, records: &[AccessRecord]) -> Vec<SecurityEvent> {
        let mut failures: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records.iter().filter(|r| is_failed_login(r)) {
            *failures.entry(record.ip_address.as_str()).or_insert(0) += 1;
        }

        let batch_time = now();
        failures
            .into_iter()
            .filter(|(_, count)| *count >= BRUTE_FORCE_THRESHOLD)
            .map(|(ip, count)| {
                log::warn!("Potential brute force attempt: {} failed login attempts from {}", count, ip);
                SecurityEvent {
                    timestamp: batch_time,
                    event_type: SecurityEventType::BruteForceAttempt,
                    severity: Severity::High,
                    ip_address: ip.to_string(),
                    endpoint: "multiple".to_string(),
                    description: format!(
                        "Potential brute force attempt: {} failed login attempts from {}",
                        count, ip
                    ),
                }
            })
            .collect()
    }

    /// One event per (method, address) pair using a flagged HTTP method
    pub fn detect_unusual_methods(&self, records: &[AccessRecord]) -> Vec<SecurityEvent> {
        let mut groups: BTreeMap<(&str, &str), Vec<&AccessRecord>> = BTreeMap::new();
        for record in records {
            let method = record.method.as_str();
            if !SAFE_METHODS.contains(&method) && FLAGGED_METHODS.contains(&method) {
                groups
                    .entry((method, record.ip_address.as_str()))
                    .or_default()
                    .push(record);
            }
        }

        let batch_time = now();
        groups
            .into_iter()
            .map(|((method, ip), group)| {
                let first = group[0];
                log::warn!("Unusual HTTP method {} used by {} ({} requests)", method, ip, group.len());
                SecurityEvent {
                    timestamp: first.timestamp.unwrap_or(batch_time),
                    event_type: SecurityEventType::UnusualMethod,
                    severity: Severity::Medium,
                    ip_address: ip.to_string(),
                    endpoint: first.endpoint.clone(),
                    description: format!(
                        "Unusual HTTP method {} used by {} ({} requests)",
                        method,
                        ip,
                        group.len()
                    ),
                }
            })
            .collect()
    }
}

/// Sum severity weights per address. The result does not depend on the
/// order of `events`.
pub fn calculate_ip_threat_scores(events: &[SecurityEvent]) -> BTreeMap<String, IpThreatScore> {
    let mut scores: BTreeMap<String, IpThreatScore> = BTreeMap::new();

    for event in events {
        if event.ip_address.is_empty() {
            continue;
        }
        let entry = scores
            .entry(event.ip_address.clone())
            .or_insert_with(|| IpThreatScore {
                ip_address: event.ip_address.clone(),
                score: 0,
                threat_level: ThreatLevel::Low,
                events: BTreeMap::new(),
            });
        entry.score += event.severity.weight();
        *entry.events.entry(event.event_type).or_insert(0) += 1;
    }

    for score in scores.values_mut() {
        score.threat_level = ThreatLevel::from_score(score.score);
    }
    scores
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::error!("Invalid regex pattern '{}': {}", pattern, e);
                    None
                }
            }
        })
        .collect()
}

/// One address per line; blank lines and `#` comments are ignored. A
/// missing or unreadable file yields an empty set.
pub fn load_suspicious_ips(path: Option<&Path>) -> HashSet<String> {
    let Some(path) = path else {
        return HashSet::new();
    };

    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let ips: HashSet<String> = contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect();
            log::info!("Loaded {} suspicious IPs from {:?}", ips.len(), path);
            ips
        }
        Err(e) => {
            log::warn!("Failed to load suspicious IPs from {:?}: {}", path, e);
            HashSet::new()
        }
    }
}

fn first_match_events(
    records: &[AccessRecord],
    patterns: &[Regex],
    event_type: SecurityEventType,
    severity: Severity,
    label: &str,
) -> Vec<SecurityEvent> {
    let batch_time = now();
    let mut events = Vec::new();

    for record in records {
        // Only the first matching pattern is reported for a request
        let Some(pattern) = patterns.iter().find(|p| p.is_match(&record.endpoint)) else {
            continue;
        };
        log::warn!(
            "{} from {}: {} in {}",
            label,
            record.ip_address,
            pattern.as_str(),
            record.endpoint
        );
        events.push(SecurityEvent {
            timestamp: record.timestamp.unwrap_or(batch_time),
            event_type,
            severity,
            ip_address: record.ip_address.clone(),
            endpoint: record.endpoint.clone(),
            description: format!("{}: {}", label, pattern.as_str()),
        });
    }
    events
}

fn is_failed_login(record: &AccessRecord) -> bool {
    if !FAILED_LOGIN_STATUSES.contains(&record.status) {
        return false;
    }
    let endpoint = record.endpoint.to_lowercase();
    LOGIN_KEYWORDS.iter().any(|k| endpoint.contains(k))
}
