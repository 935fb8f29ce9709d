//! Report output
//!
//! Writes batch reports to stdout or a file as pretty JSON, one JSON object
//! per line, or a human readable summary.

use crate::models::ThreatLevel;
use crate::pipeline::BatchReport;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Output handler for batch reports
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    /// Unknown names fall back to the console summary
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            other => {
                log::warn!("Unknown output format '{}', using console", other);
                OutputFormat::Console
            }
        }
    }
}

impl OutputHandler {
    /// Reports go to `file_path` (appended) when given, stdout otherwise
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> Result<Self, OutputError> {
        let writer: Option<Box<dyn Write + Send>> = match file_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            None => None,
        };

        Ok(OutputHandler { format, writer })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn write_report(&mut self, report: &BatchReport) -> Result<(), OutputError> {
        let output = match self.format {
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(report)?),
            OutputFormat::Jsonl => format!("{}\n", serde_json::to_string(report)?),
            OutputFormat::Console => console_summary(report),
        };
        self.write_output(&output)
    }

    fn write_output(&mut self, data: &str) -> Result<(), OutputError> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(data.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}

fn console_summary(report: &BatchReport) -> String {
    let mut out = String::new();
    let source = report.source.as_deref().unwrap_or("batch");
    let _ = writeln!(out, "== {} ({} records) ==", source, report.record_count);

    let perf = &report.performance;
    match &perf.response_time_analysis.overall_stats {
        Some(s) => {
            let _ = writeln!(
                out,
                "Response time: mean {:.3}s, median {:.3}s, p95 {:.3}s, max {:.3}s",
                s.mean, s.median, s.p95, s.max
            );
        }
        None => {
            let _ = writeln!(out, "Response time: no data");
        }
    }
    let _ = writeln!(
        out,
        "Error rate: {:.2}%",
        perf.status_code_analysis.error_rate * 100.0
    );
    let _ = writeln!(out, "Performance issues: {}", perf.issues_detected.len());
    for issue in &perf.issues_detected {
        let _ = writeln!(out, "  [{}] {}", issue.severity, issue.description);
    }

    let security = &report.security;
    let _ = writeln!(out, "Potential threats: {}", security.potential_threats);
    for score in security.ip_threat_scores.values() {
        if score.threat_level != ThreatLevel::Low {
            let _ = writeln!(
                out,
                "  {} score {} ({:?})",
                score.ip_address, score.score, score.threat_level
            );
        }
    }

    let _ = writeln!(out, "Anomalies: {}", report.anomalies.anomalies_detected);
    for anomaly in &report.anomalies.anomaly_records {
        let _ = writeln!(
            out,
            "  {} at {}: {:.3} (expected {:.3}, z {:.2})",
            anomaly.metric_name,
            anomaly.timestamp.format("%Y-%m-%d %H:%M:%S"),
            anomaly.actual_value,
            anomaly.expected_value,
            anomaly.z_score
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{AnomalyReport, PerformanceReport, SecurityReport};

    fn report() -> BatchReport {
        BatchReport {
            source: Some("access.log".to_string()),
            record_count: 3,
            performance: PerformanceReport::empty(),
            security: SecurityReport::default(),
            anomalies: AnomalyReport::default(),
        }
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::from_name("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("jsonl"), OutputFormat::Jsonl);
        assert_eq!(OutputFormat::from_name("xml"), OutputFormat::Console);
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.jsonl");

        let mut handler = OutputHandler::new(OutputFormat::Jsonl, Some(path.clone())).unwrap();
        handler.write_report(&report()).unwrap();
        handler.write_report(&report()).unwrap();
        handler.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: BatchReport = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.record_count, 3);
        assert_eq!(parsed.source.as_deref(), Some("access.log"));
    }

    #[test]
    fn test_console_summary() {
        let summary = console_summary(&report());
        assert!(summary.starts_with("== access.log (3 records) =="));
        assert!(summary.contains("Response time: no data"));
        assert!(summary.contains("Potential threats: 0"));
        assert!(summary.contains("Anomalies: 0"));
    }
}
